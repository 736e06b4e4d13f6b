//! `governator tail`: multiplex the log tails of active workers,
//! prefixing each line with `[<task-id>:<stream>]`.
//!
//! Workers come and go, so the set of tailed files is refreshed from
//! the index every second. Each tailer starts at the end of its file
//! and forwards new lines into one channel; Ctrl-C exits.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

pub async fn run(both: bool) -> Result<()> {
    let layout = crate::initialized_layout()?;

    let (tx, rx) = mpsc::channel::<String>(256);
    let mut lines = ReceiverStream::new(rx);
    let mut tailed: HashSet<PathBuf> = HashSet::new();
    let mut refresh = tokio::time::interval(Duration::from_secs(1));

    println!("tailing active workers (ctrl-c to exit)");
    loop {
        tokio::select! {
            _ = refresh.tick() => {
                spawn_new_tailers(&layout, both, &mut tailed, &tx);
            }
            line = lines.next() => {
                match line {
                    Some(line) => println!("{line}"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Start a tailer for every active worker log we are not yet following.
fn spawn_new_tailers(
    layout: &governator_store::layout::Layout,
    both: bool,
    tailed: &mut HashSet<PathBuf>,
    tx: &mpsc::Sender<String>,
) {
    let Ok(index) = crate::status_cmd::load_index_snapshot(layout) else {
        return;
    };

    for task in index.tasks.iter().filter(|t| t.pid != 0) {
        let attempt_dir = PathBuf::from(&task.worker_state_dir);
        if attempt_dir.as_os_str().is_empty() {
            continue;
        }
        let mut streams = vec![("stdout", attempt_dir.join("stdout.log"))];
        if both {
            streams.push(("stderr", attempt_dir.join("stderr.log")));
        }
        for (stream, path) in streams {
            if !path.exists() || !tailed.insert(path.clone()) {
                continue;
            }
            let prefix = format!("[{}:{}]", task.id, stream);
            let tx = tx.clone();
            tokio::spawn(tail_file(path, prefix, tx));
        }
    }
}

/// Follow one file from its current end, forwarding new lines.
async fn tail_file(path: PathBuf, prefix: String, tx: mpsc::Sender<String>) {
    let Ok(file) = std::fs::File::open(&path) else {
        return;
    };
    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::End(0)).is_err() {
        return;
    }

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let mut buf = String::new();
    loop {
        poll.tick().await;
        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = format!("{prefix} {}", buf.trim_end());
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
        if tx.is_closed() {
            return;
        }
    }
}
