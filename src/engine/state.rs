use crate::model::{RunProgress, Topic};
use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancellation flag. Setting it is synchronous; the engine observes
/// it at its checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Mutable state of one run, owned by the engine task.
#[derive(Debug)]
pub struct RunState {
    queue: Vec<Topic>,
    cursor: usize,
    cancel: CancelFlag,
    completed_ids: BTreeSet<i64>,
}

impl RunState {
    pub fn new(queue: Vec<Topic>, cancel: CancelFlag) -> Self {
        Self {
            queue,
            cursor: 0,
            cancel,
            completed_ids: BTreeSet::new(),
        }
    }

    pub fn current(&self) -> Option<&Topic> {
        self.queue.get(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.queue.len()
    }

    pub fn has_remaining(&self) -> bool {
        self.cursor < self.queue.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn completed_ids(&self) -> &BTreeSet<i64> {
        &self.completed_ids
    }

    /// Commit the topic at the cursor and move on.
    pub fn complete_current(&mut self) {
        if let Some(t) = self.queue.get(self.cursor) {
            self.completed_ids.insert(t.id);
            self.cursor += 1;
        }
    }

    pub fn progress(&self, current: Option<Topic>) -> RunProgress {
        RunProgress {
            current_topic: current,
            completed_ids: self.completed_ids.clone(),
            cursor: self.cursor,
            total: self.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: i64) -> Topic {
        Topic {
            id,
            name: format!("T{id}"),
            period: "p".into(),
            topic: "t".into(),
        }
    }

    #[test]
    fn cursor_advances_monotonically() {
        let mut s = RunState::new(vec![topic(1), topic(2)], CancelFlag::new());
        assert_eq!(s.current().map(|t| t.id), Some(1));
        s.complete_current();
        assert_eq!(s.cursor(), 1);
        s.complete_current();
        assert!(!s.has_remaining());
        // Past the end nothing changes.
        s.complete_current();
        assert_eq!(s.cursor(), 2);
        assert_eq!(s.completed_ids().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let s = RunState::new(vec![topic(1)], flag.clone());
        assert!(!s.is_cancelled());
        flag.cancel();
        flag.cancel();
        assert!(s.is_cancelled());
    }
}
