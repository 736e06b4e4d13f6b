mod dag_cmd;
mod init_cmd;
mod start_cmd;
mod status_cmd;
mod stop_cmd;
mod tail_cmd;
mod tui;
mod why_cmd;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use governator_store::layout::Layout;

const VERSION_LINE: &str = concat!(
    "version=",
    env!("CARGO_PKG_VERSION"),
    " commit=",
    env!("GOVERNATOR_COMMIT"),
    " built_at=",
    env!("GOVERNATOR_BUILT_AT"),
);

#[derive(Parser)]
#[command(
    name = "governator",
    about = "Waterfall supervisor orchestrating non-interactive LLM coding workers",
    disable_version_flag = true
)]
struct Cli {
    /// Print version information
    #[arg(short = 'V', long = "version", global = true)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the directory layout, seed config, and make the initial commit
    Init {
        /// Worker CLI to dispatch (codex|claude|gemini)
        #[arg(long)]
        agent: Option<String>,
        /// Global concurrency cap
        #[arg(long)]
        concurrency: Option<u32>,
        /// Reasoning-effort level (low|medium|high)
        #[arg(long)]
        reasoning_effort: Option<String>,
        /// Base branch merged task branches land on
        #[arg(long)]
        branch: Option<String>,
        /// Worker timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Detach a supervisor process
    #[command(visible_aliases = ["plan", "execute"])]
    Start,
    /// Run the supervisor in the foreground (internal; used by `start`)
    #[command(hide = true)]
    Supervise,
    /// Print task counts and per-task rows
    Status {
        /// Open a live view
        #[arg(short = 'i', long = "interactive")]
        interactive: bool,
    },
    /// Print the dependency graph
    Dag,
    /// Explain blocked and failed tasks from recent logs
    Why {
        /// Supervisor log lines to show
        #[arg(short = 's', default_value_t = 20)]
        supervisor_lines: usize,
        /// Worker stdout lines to show per troubled task
        #[arg(short = 't', default_value_t = 20)]
        task_lines: usize,
    },
    /// Multiplex tails of active workers' logs
    Tail {
        /// Tail stdout only (default)
        #[arg(long, conflicts_with = "both")]
        stdout: bool,
        /// Tail both stdout and stderr
        #[arg(long)]
        both: bool,
    },
    /// Signal the supervisor to shut down
    Stop {
        /// Also TERM active workers
        #[arg(short = 'w', long = "worker")]
        workers: bool,
    },
    /// Stop then start
    Restart {
        /// Also TERM active workers while stopping
        #[arg(short = 'w', long = "worker")]
        workers: bool,
    },
    /// Forcefully clear supervisor state and lock
    Reset {
        /// Also TERM recorded worker PIDs
        #[arg(short = 'w', long = "worker")]
        workers: bool,
    },
    /// Print version information
    Version,
    /// Generate shell completions
    #[command(hide = true)]
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Locate the enclosing repository root and its governator layout.
fn repo_layout() -> Result<Layout> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(&cwd)
        .output()
        .context("failed to run git")?;
    if !output.status.success() {
        anyhow::bail!("not inside a git worktree; run `governator init` in a git repository");
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Layout::new(root))
}

/// Layout that must already be initialized.
fn initialized_layout() -> Result<Layout> {
    let layout = repo_layout()?;
    if !layout.is_initialized() {
        anyhow::bail!("governator is not initialized here; run `governator init`");
    }
    Ok(layout)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version || matches!(cli.command, Some(Commands::Version)) {
        println!("{VERSION_LINE}");
        return;
    }

    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        std::process::exit(2);
    };

    // `supervise` owns its own logging (everything goes to the
    // supervisor log); the rest log to stderr.
    if !matches!(command, Commands::Supervise) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let result: Result<()> = match command {
        Commands::Init {
            agent,
            concurrency,
            reasoning_effort,
            branch,
            timeout,
        } => init_cmd::run(init_cmd::InitOptions {
            agent,
            concurrency,
            reasoning_effort,
            branch,
            timeout,
        }),
        Commands::Start => start_cmd::run_start(),
        Commands::Supervise => start_cmd::run_supervise().await,
        Commands::Status { interactive } => {
            if interactive {
                tui::run_live_view().await
            } else {
                status_cmd::run()
            }
        }
        Commands::Dag => dag_cmd::run(),
        Commands::Why {
            supervisor_lines,
            task_lines,
        } => why_cmd::run(supervisor_lines, task_lines),
        Commands::Tail { stdout: _, both } => tail_cmd::run(both).await,
        Commands::Stop { workers } => stop_cmd::run_stop(workers),
        Commands::Restart { workers } => stop_cmd::run_restart(workers),
        Commands::Reset { workers } => stop_cmd::run_reset(workers),
        Commands::Version => unreachable!("handled above"),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "governator",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
