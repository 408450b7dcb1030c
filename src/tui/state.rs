use crate::model::{
    HistoryRecord, PromptTemplate, RunEvent, RunOutcome, RunPhase, RunProgress, RunStatus, Topic,
};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::collections::BTreeSet;

pub const TAB_RUN: usize = 0;
pub const TAB_HISTORY: usize = 1;
pub const TAB_PROMPTS: usize = 2;
pub const TAB_HELP: usize = 3;
pub const TAB_COUNT: usize = 4;

const MAX_LOG_LINES: usize = 200;

pub struct UiState {
    pub tab: usize,
    pub phase: RunPhase,
    pub info: String,

    // Run tab
    pub queue: Vec<Topic>,
    pub queue_source: Option<std::path::PathBuf>,
    pub progress: RunProgress,
    pub completed_ids: BTreeSet<i64>,
    pub run_records: Vec<HistoryRecord>,
    pub run_log: Vec<String>,

    // Prompts tab
    pub prompts: Vec<PromptTemplate>,
    pub prompt_cursor: usize,
    pub selected_prompt: Option<String>,

    // History tab
    pub history: Vec<HistoryRecord>,
    pub history_selected: usize, // 0 = most recent
    pub history_scroll_offset: usize,
    pub history_loaded_count: usize,
    pub initial_history_load_size: usize,
    pub history_detail_view: bool,
    pub history_detail_scroll: usize,
    pub last_exported_path: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: TAB_RUN,
            phase: RunPhase::Idle,
            info: String::new(),
            queue: Vec::new(),
            queue_source: None,
            progress: RunProgress::default(),
            completed_ids: BTreeSet::new(),
            run_records: Vec::new(),
            run_log: Vec::new(),
            prompts: Vec::new(),
            prompt_cursor: 0,
            selected_prompt: None,
            history: Vec::new(),
            history_selected: 0,
            history_scroll_offset: 0,
            history_loaded_count: 0,
            initial_history_load_size: 66,
            history_detail_view: false,
            history_detail_scroll: 0,
            last_exported_path: None,
        }
    }
}

impl UiState {
    pub fn is_running(&self) -> bool {
        self.phase == RunPhase::Running
    }

    /// Template the next run will use.
    pub fn active_prompt(&self) -> Option<&PromptTemplate> {
        match self.selected_prompt.as_deref() {
            Some(id) => self.prompts.iter().find(|p| p.id == id),
            None => self.prompts.first(),
        }
    }

    pub fn selected_record(&self) -> Option<&HistoryRecord> {
        self.history.get(self.history_selected)
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.run_log.push(line.into());
        if self.run_log.len() > MAX_LOG_LINES {
            let _ = self.run_log.drain(0..(self.run_log.len() - MAX_LOG_LINES));
        }
    }

    /// Reset per-run state before a new run is requested.
    pub fn begin_run(&mut self) {
        self.progress = RunProgress {
            total: self.queue.len(),
            ..Default::default()
        };
        self.completed_ids.clear();
        self.run_records.clear();
        self.run_log.clear();
    }

    /// Fold an engine event into the view state. `RunFinished` is handled by
    /// the caller because it touches the stores.
    pub fn apply_event(&mut self, ev: RunEvent) {
        match ev {
            RunEvent::RunStarted { total } => {
                self.phase = RunPhase::Running;
                self.progress.total = total;
                self.info = format!("Running {total} topic(s)");
            }
            RunEvent::TopicStarted { index, topic } => {
                self.log(format!(
                    "[{}/{}] {}",
                    index + 1,
                    self.progress.total,
                    crate::render::subject_for(&topic)
                ));
            }
            RunEvent::TopicCompleted { index, record } => {
                self.log(format!(
                    "[{}/{}] Saved: {}",
                    index + 1,
                    self.progress.total,
                    record.prompt
                ));
                self.run_records.push(*record);
            }
            RunEvent::Progress(p) => {
                self.completed_ids = p.completed_ids.clone();
                self.progress = p;
            }
            RunEvent::Info(info) => {
                let msg = info.to_message();
                self.log(msg.clone());
                self.info = msg;
            }
            RunEvent::RunFinished { outcome } => self.finish_run(*outcome),
        }
    }

    /// Settle the phase and status line for a finished run.
    pub fn finish_run(&mut self, outcome: RunOutcome) {
        self.info = match &outcome.status {
            RunStatus::Completed => {
                self.phase = RunPhase::Completed;
                format!("Run completed: {}/{} topic(s)", outcome.cursor, outcome.total)
            }
            RunStatus::Cancelled => {
                // A stopped run goes back to idle; completed topics stay in history.
                self.phase = RunPhase::Idle;
                self.progress = RunProgress {
                    total: self.queue.len(),
                    ..Default::default()
                };
                format!("Run stopped after {}/{} topic(s)", outcome.cursor, outcome.total)
            }
            RunStatus::Failed(f) if f.is_invalid_credential() => {
                self.phase = RunPhase::Failed;
                "Invalid API key. Check --api-key, OPENAI_API_KEY or the saved keys".to_string()
            }
            RunStatus::Failed(f) => {
                self.phase = RunPhase::Failed;
                format!("Run failed: {f}")
            }
        };
        if outcome.unsaved.is_some() {
            self.info.push_str(" (last reply not saved; see the run log)");
        }
        let line = self.info.clone();
        self.log(line);
    }

    /// Replace the history list, keeping the selection in range.
    pub fn set_history(&mut self, history: Vec<HistoryRecord>) {
        self.history = history;
        self.history_loaded_count = self.history.len();
        self.clamp_history_selection();
    }

    pub fn clamp_history_selection(&mut self) {
        if self.history.is_empty() {
            self.history_selected = 0;
            self.history_scroll_offset = 0;
            self.history_detail_view = false;
            return;
        }
        if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len() - 1;
        }
        if self.history_scroll_offset > self.history_selected {
            self.history_scroll_offset = self.history_selected;
        }
    }

    pub fn history_up(&mut self) {
        if self.history_selected > 0 {
            self.history_selected -= 1;
            if self.history_selected < self.history_scroll_offset {
                self.history_scroll_offset = self.history_selected;
            }
        }
    }

    pub fn history_down(&mut self, visible: usize) {
        if self.history_selected + 1 < self.history.len() {
            self.history_selected += 1;
            let visible = visible.max(1);
            if self.history_selected >= self.history_scroll_offset + visible {
                self.history_scroll_offset = self.history_selected + 1 - visible;
            }
        }
    }

    pub fn prompt_up(&mut self) {
        self.prompt_cursor = self.prompt_cursor.saturating_sub(1);
    }

    pub fn prompt_down(&mut self) {
        if self.prompt_cursor + 1 < self.prompts.len() {
            self.prompt_cursor += 1;
        }
    }

    /// Make the template under the cursor the one runs use.
    pub fn select_prompt_under_cursor(&mut self) -> Option<&PromptTemplate> {
        let p = self.prompts.get(self.prompt_cursor)?;
        self.selected_prompt = Some(p.id.clone());
        Some(p)
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
