//! Live-view application state.

use governator_core::status::{self, Counts, TaskRow};
use governator_store::layout::Layout;

pub struct App {
    layout: Layout,
    pub counts: Counts,
    pub rows: Vec<TaskRow>,
    pub supervisor_line: String,
    pub selected: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            counts: Counts::default(),
            rows: Vec::new(),
            supervisor_line: String::new(),
            selected: 0,
            should_quit: false,
        }
    }

    /// Reload the index snapshot and supervisor state. Failures leave
    /// the previous data on screen.
    pub fn refresh(&mut self) {
        if let Ok(index) = crate::status_cmd::load_index_snapshot(&self.layout) {
            self.counts = status::counts(&index);
            self.rows = status::rows(&index);
            if self.selected >= self.rows.len() && !self.rows.is_empty() {
                self.selected = self.rows.len() - 1;
            }
        }
        self.supervisor_line = crate::status_cmd::supervisor_line(&self.layout);
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if !self.rows.is_empty() && self.selected < self.rows.len() - 1 {
            self.selected += 1;
        }
    }
}
