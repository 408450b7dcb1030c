//! Run lifecycle controller.
//!
//! Owns start/stop orchestration and emits events for presentation layers.

use crate::engine::{BatchEngine, CancelFlag, CompletionProvider};
use crate::error::{RunFailure, ValidationError};
use crate::model::{
    BatchJob, InfoEvent, PromptTemplate, RunConfig, RunEvent, RunOutcome, RunPhase, RunStatus,
};
use crate::storage::HistoryStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers to control runs.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(BatchJob),
    Stop,
    Quit,
}

/// Internal handle for a running batch task.
struct RunCtx {
    cancel: CancelFlag,
    handle: tokio::task::JoinHandle<RunOutcome>,
}

/// Start/stop surface over the batch engine. At most one run at a time.
pub(crate) struct Runner {
    cfg: RunConfig,
    provider: Arc<dyn CompletionProvider>,
    history: HistoryStore,
    active: Option<RunCtx>,
    last_phase: RunPhase,
}

impl Runner {
    pub fn new(cfg: RunConfig, provider: Arc<dyn CompletionProvider>, history: HistoryStore) -> Self {
        Self {
            cfg,
            provider,
            history,
            active: None,
            last_phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        if self.active.is_some() {
            RunPhase::Running
        } else {
            self.last_phase
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Validate the job and spawn the engine. On error nothing changes.
    pub fn start(
        &mut self,
        job: BatchJob,
        event_tx: UnboundedSender<RunEvent>,
    ) -> Result<(), ValidationError> {
        if self.active.is_some() {
            return Err(ValidationError::AlreadyRunning);
        }
        let template = validate_job(&job)?;

        let cancel = CancelFlag::new();
        let engine = BatchEngine::new(self.cfg.clone(), self.provider.clone(), self.history.clone());
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            engine
                .run(job.queue, template, job.credential, cancel2, event_tx)
                .await
        });
        self.active = Some(RunCtx { cancel, handle });
        Ok(())
    }

    /// Request cancellation of the active run. Returns whether a run was
    /// signalled; without one this does nothing.
    pub fn stop(&self) -> bool {
        match &self.active {
            Some(ctx) => {
                ctx.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the active run to finish and return its outcome.
    ///
    /// Safe to drop mid-wait: the task handle stays in place until the run
    /// has actually been observed to finish.
    pub async fn wait(&mut self) -> Option<RunOutcome> {
        let ctx = self.active.as_mut()?;
        let joined = (&mut ctx.handle).await;
        self.active = None;
        let outcome = joined.unwrap_or_else(|e| RunOutcome {
            status: RunStatus::Failed(RunFailure::Internal(e.to_string())),
            cursor: 0,
            total: 0,
            completed_ids: Default::default(),
            unsaved: None,
        });
        self.last_phase = match outcome.status {
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::Cancelled => RunPhase::Cancelled,
            RunStatus::Failed(_) => RunPhase::Failed,
        };
        Some(outcome)
    }
}

/// Preconditions checked before a run enters the running state.
pub(crate) fn validate_job(job: &BatchJob) -> Result<PromptTemplate, ValidationError> {
    if job.credential.trim().is_empty() {
        return Err(ValidationError::MissingCredential);
    }
    let template = job.template.clone().ok_or(ValidationError::MissingTemplate)?;
    let mut seen = HashSet::new();
    for t in &job.queue {
        if !seen.insert(t.id) {
            return Err(ValidationError::DuplicateTopicId(t.id));
        }
    }
    Ok(template)
}

/// Orchestrate runs based on UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    mut runner: Runner,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) {
    let mut quit_pending = false;
    let mut cmd_open = true;
    // Cancel watchdog: the in-flight provider call cannot be interrupted, so keep the UI informed.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if cmd_open => {
                match cmd {
                    Some(UiCommand::Start(job)) => {
                        if let Err(e) = runner.start(job, event_tx.clone()) {
                            tracing::warn!(error = %e, "run rejected");
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::Rejected(e.to_string())));
                        }
                    }
                    Some(UiCommand::Stop) => {
                        if runner.stop() {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(
                                "Stopping…".into(),
                            )));
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    None => {
                        // The UI is gone; a closed channel would report None on every poll.
                        cmd_open = false;
                        quit_pending = true;
                        if !runner.stop() {
                            break;
                        }
                    }
                    Some(UiCommand::Quit) => {
                        // Quit waits for the current run to settle so history writes are not cut off.
                        quit_pending = true;
                        if !runner.stop() {
                            break;
                        }
                    }
                }
            }
            maybe_done = async {
                if runner.is_active() {
                    return runner.wait().await;
                }
                futures::future::pending().await
            } => {
                if let Some(outcome) = maybe_done {
                    cancel_deadline = None;
                    let _ = event_tx.send(RunEvent::RunFinished { outcome: Box::new(outcome) });
                    if quit_pending {
                        break;
                    }
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && runner.is_active() {
                        let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(
                            "Still stopping… waiting for the current request to finish".into(),
                        )));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{GatedProvider, ScriptedProvider};
    use crate::error::ProviderError;
    use crate::model::{ResponseFormat, Topic};
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn queue() -> Vec<Topic> {
        vec![
            Topic {
                id: 1,
                name: "A".into(),
                period: "p".into(),
                topic: "t".into(),
            },
            Topic {
                id: 2,
                name: "B".into(),
                period: "p".into(),
                topic: "t".into(),
            },
        ]
    }

    fn template() -> PromptTemplate {
        PromptTemplate {
            id: "1".into(),
            name: "Essay".into(),
            content: "Write.".into(),
            response_format: ResponseFormat::Json,
            columns: vec!["title".into()],
            updated_at: None,
        }
    }

    fn job(queue: Vec<Topic>) -> BatchJob {
        BatchJob {
            queue,
            template: Some(template()),
            credential: "sk-test".into(),
        }
    }

    fn cfg(delay_ms: u64) -> RunConfig {
        RunConfig {
            delay: Duration::from_millis(delay_ms),
            poll_interval: Duration::from_millis(5),
            strict_output: false,
        }
    }

    fn runner(
        provider: Arc<dyn CompletionProvider>,
        delay_ms: u64,
    ) -> (tempfile::TempDir, HistoryStore, Runner) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("chat-history.json"));
        let runner = Runner::new(cfg(delay_ms), provider, store.clone());
        (dir, store, runner)
    }

    #[tokio::test]
    async fn two_topics_complete_in_order() {
        let provider = Arc::new(ScriptedProvider::always("{\"title\":\"x\"}"));
        let (_dir, store, mut runner) = runner(provider, 0);
        let (tx, _rx) = mpsc::unbounded_channel();

        runner.start(job(queue()), tx).unwrap();
        assert_eq!(runner.phase(), RunPhase::Running);
        let outcome = runner.wait().await.unwrap();

        assert!(matches!(outcome.status, RunStatus::Completed));
        assert_eq!(runner.phase(), RunPhase::Completed);
        assert_eq!(outcome.completed_ids.into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(outcome.cursor, 2);
        let prompts: Vec<_> = store.load().unwrap().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn records_match_queue_length_for_larger_queues() {
        for n in [1i64, 3, 7] {
            let provider = Arc::new(ScriptedProvider::always("{\"title\":\"x\"}"));
            let (_dir, store, mut runner) = runner(provider.clone(), 0);
            let (tx, _rx) = mpsc::unbounded_channel();
            let q: Vec<Topic> = (1..=n)
                .map(|id| Topic {
                    id,
                    name: format!("T{id}"),
                    period: "p".into(),
                    topic: "t".into(),
                })
                .collect();

            runner.start(job(q.clone()), tx).unwrap();
            let outcome = runner.wait().await.unwrap();

            assert!(matches!(outcome.status, RunStatus::Completed));
            let names: Vec<_> = store.load().unwrap().into_iter().map(|r| r.prompt).collect();
            let expected: Vec<_> = q.iter().map(|t| t.name.clone()).collect();
            assert_eq!(names, expected);
            assert_eq!(outcome.completed_ids.len(), n as usize);
            assert_eq!(provider.calls(), n as usize);
        }
    }

    #[tokio::test]
    async fn invalid_credential_on_first_call_persists_nothing() {
        let provider = Arc::new(ScriptedProvider::script(vec![Err(
            ProviderError::InvalidCredential,
        )]));
        let (_dir, store, mut runner) = runner(provider.clone(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();

        runner.start(job(queue()), tx).unwrap();
        let outcome = runner.wait().await.unwrap();

        match &outcome.status {
            RunStatus::Failed(f) => assert!(f.is_invalid_credential()),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(runner.phase(), RunPhase::Failed);
        assert!(store.load().unwrap().is_empty());
        assert_eq!(provider.calls(), 1);
        assert!(outcome.completed_ids.is_empty());
    }

    #[tokio::test]
    async fn failure_on_item_k_persists_k_minus_one() {
        let n = 5;
        for k in 1..=n {
            let mut script: Vec<Result<String, ProviderError>> =
                (1..k).map(|_| Ok("{\"title\":\"x\"}".to_string())).collect();
            script.push(Err(ProviderError::Network("boom".into())));
            let provider = Arc::new(ScriptedProvider::script(script));
            let (_dir, store, mut runner) = runner(provider.clone(), 0);
            let (tx, _rx) = mpsc::unbounded_channel();
            let q: Vec<Topic> = (1..=n as i64)
                .map(|id| Topic {
                    id,
                    name: format!("T{id}"),
                    period: "p".into(),
                    topic: "t".into(),
                })
                .collect();

            runner.start(job(q), tx).unwrap();
            let outcome = runner.wait().await.unwrap();

            match &outcome.status {
                RunStatus::Failed(f) => assert!(!f.is_invalid_credential()),
                other => panic!("expected failure, got {other:?}"),
            }
            assert_eq!(store.load().unwrap().len(), k - 1);
            // Items k+1..n are never rendered or sent.
            assert_eq!(provider.prompts.lock().unwrap().len(), k);
        }
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let provider = Arc::new(ScriptedProvider::always("{}"));
        let (_dir, store, runner) = runner(provider.clone(), 0);
        assert!(!runner.stop());
        assert!(!runner.stop());
        assert_eq!(runner.phase(), RunPhase::Idle);
        assert_eq!(provider.calls(), 0);
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_during_call_prevents_further_items() {
        let provider = Arc::new(GatedProvider::default());
        let (_dir, store, mut runner) = runner(provider.clone(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();

        runner.start(job(queue()), tx).unwrap();
        provider.entered.notified().await;
        assert!(runner.stop());
        assert!(runner.stop());
        provider.release.notify_one();
        let outcome = runner.wait().await.unwrap();

        assert!(matches!(outcome.status, RunStatus::Cancelled));
        assert_eq!(runner.phase(), RunPhase::Cancelled);
        // The in-flight result is discarded at the post-call checkpoint.
        assert!(outcome.completed_ids.is_empty());
        assert_eq!(outcome.cursor, 0);
        assert!(store.load().unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_during_delay_keeps_completed_items() {
        let provider = Arc::new(ScriptedProvider::always("{\"title\":\"x\"}"));
        let (_dir, store, mut runner) = runner(provider.clone(), 60_000);
        let (tx, mut rx) = mpsc::unbounded_channel();

        runner.start(job(queue()), tx).unwrap();
        // Wait for the first topic to be committed, then stop while waiting.
        loop {
            match rx.recv().await {
                Some(RunEvent::TopicCompleted { .. }) => break,
                Some(_) => continue,
                None => panic!("engine ended early"),
            }
        }
        runner.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(5), runner.wait())
            .await
            .expect("stop should interrupt the delay")
            .unwrap();

        assert!(matches!(outcome.status, RunStatus::Cancelled));
        assert_eq!(outcome.completed_ids.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(outcome.cursor, 1);
        assert_eq!(store.load().unwrap().len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn validation_errors_leave_runner_idle() {
        let provider = Arc::new(ScriptedProvider::always("{}"));
        let (_dir, _store, mut runner) = runner(provider.clone(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut no_key = job(queue());
        no_key.credential = "   ".into();
        assert_eq!(
            runner.start(no_key, tx.clone()),
            Err(ValidationError::MissingCredential)
        );

        let mut no_template = job(queue());
        no_template.template = None;
        assert_eq!(
            runner.start(no_template, tx.clone()),
            Err(ValidationError::MissingTemplate)
        );

        let mut dup = queue();
        dup[1].id = 1;
        assert_eq!(
            runner.start(job(dup), tx),
            Err(ValidationError::DuplicateTopicId(1))
        );

        assert_eq!(runner.phase(), RunPhase::Idle);
        assert!(!runner.is_active());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let provider = Arc::new(GatedProvider::default());
        let (_dir, _store, mut runner) = runner(provider.clone(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();

        runner.start(job(queue()), tx.clone()).unwrap();
        assert_eq!(
            runner.start(job(queue()), tx),
            Err(ValidationError::AlreadyRunning)
        );
        runner.stop();
        provider.release.notify_one();
        runner.wait().await.unwrap();
        assert!(!runner.is_active());
    }

    #[tokio::test]
    async fn empty_queue_completes_immediately() {
        let provider = Arc::new(ScriptedProvider::always("{}"));
        let (_dir, _store, mut runner) = runner(provider.clone(), 0);
        let (tx, _rx) = mpsc::unbounded_channel();
        runner.start(job(Vec::new()), tx).unwrap();
        let outcome = runner.wait().await.unwrap();
        assert!(matches!(outcome.status, RunStatus::Completed));
        assert_eq!(outcome.total, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn controller_reports_rejections_and_completion() {
        let provider = Arc::new(ScriptedProvider::always("{\"title\":\"x\"}"));
        let (_dir, _store, runner) = runner(provider, 0);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctrl = tokio::spawn(run_controller(runner, event_tx, cmd_rx));

        let mut bad = job(queue());
        bad.template = None;
        cmd_tx.send(UiCommand::Start(bad)).unwrap();
        cmd_tx.send(UiCommand::Start(job(queue()))).unwrap();

        let mut rejected = false;
        let outcome = loop {
            match event_rx.recv().await {
                Some(RunEvent::Info(InfoEvent::Rejected(_))) => rejected = true,
                Some(RunEvent::RunFinished { outcome }) => break outcome,
                Some(_) => {}
                None => panic!("controller ended early"),
            }
        };
        assert!(rejected);
        assert!(matches!(outcome.status, RunStatus::Completed));

        cmd_tx.send(UiCommand::Quit).unwrap();
        tokio::time::timeout(Duration::from_secs(5), ctrl)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_command_channel_waits_for_in_flight_call() {
        let provider = Arc::new(GatedProvider::default());
        let (_dir, store, runner) = runner(provider.clone(), 0);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let mut ctrl = tokio::spawn(run_controller(runner, event_tx, cmd_rx));

        cmd_tx.send(UiCommand::Start(job(queue()))).unwrap();
        provider.entered.notified().await;
        cmd_tx.send(UiCommand::Quit).unwrap();
        drop(cmd_tx);

        // Paused time only advances once every task is idle, so a controller
        // that keeps polling the closed channel never lets this timeout fire.
        assert!(tokio::time::timeout(Duration::from_secs(60), &mut ctrl)
            .await
            .is_err());

        provider.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), ctrl)
            .await
            .unwrap()
            .unwrap();

        let mut finished = None;
        while let Ok(ev) = event_rx.try_recv() {
            if let RunEvent::RunFinished { outcome } = ev {
                finished = Some(outcome);
            }
        }
        let outcome = finished.expect("run outcome reported before exit");
        assert!(matches!(outcome.status, RunStatus::Cancelled));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
