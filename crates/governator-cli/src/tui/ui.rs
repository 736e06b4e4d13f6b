//! Live-view rendering using ratatui.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};

use governator_store::models::TaskState;

use super::app::App;

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(3),    // task table
            Constraint::Length(1), // key hints
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_tasks(f, app, chunks[1]);
    render_hints(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let text = format!(
        " {}\n {}",
        app.supervisor_line,
        app.counts.summary_line()
    );
    let header = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" governator "),
    );
    f.render_widget(header, area);
}

fn render_tasks(f: &mut Frame, app: &App, area: Rect) {
    let header_cells = ["Task", "State", "Role", "PID", "Attempts", "Note"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let header = Row::new(header_cells).height(1);

    let rows = app.rows.iter().enumerate().map(|(i, row)| {
        let style = if i == app.selected {
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let pid = if row.pid == 0 {
            "-".to_string()
        } else {
            row.pid.to_string()
        };
        Row::new(vec![
            Cell::from(row.id.clone()),
            Cell::from(state_colored(row.state)),
            Cell::from(row.role.clone()),
            Cell::from(pid),
            Cell::from(format!("{}/{}", row.attempts_failed, row.attempts_total)),
            Cell::from(row.blocked_reason.clone()),
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(25),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Tasks "));

    f.render_widget(table, area);
}

fn render_hints(f: &mut Frame, area: Rect) {
    let hints = Paragraph::new(" q quit | j/k move | g top ")
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hints, area);
}

fn state_colored(state: TaskState) -> ratatui::text::Span<'static> {
    let color = match state {
        TaskState::Merged => Color::Green,
        TaskState::Failed | TaskState::Conflict => Color::Red,
        TaskState::Blocked => Color::Magenta,
        TaskState::Tested | TaskState::Reviewed | TaskState::Mergeable => Color::Cyan,
        TaskState::Worked | TaskState::Resolved => Color::Blue,
        TaskState::Triaged | TaskState::Backlog => Color::Gray,
        TaskState::Obsolete => Color::DarkGray,
    };
    ratatui::text::Span::styled(state.to_string(), Style::default().fg(color))
}
