//! Sequential batch engine.
//!
//! Drives render → provider → history for each queued topic, one at a time,
//! honoring a shared cancellation flag at fixed checkpoints.

pub mod openai;
pub mod provider;
mod state;

pub use provider::{Completion, CompletionProvider};
pub use state::CancelFlag;
use state::RunState;

use crate::error::RunFailure;
use crate::model::{
    HistoryRecord, InfoEvent, PromptTemplate, ResponseFormat, RunConfig, RunEvent, RunOutcome,
    RunStatus, Topic,
};
use crate::render;
use crate::storage::HistoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const MIN_POLL: Duration = Duration::from_millis(1);

pub struct BatchEngine {
    cfg: RunConfig,
    provider: Arc<dyn CompletionProvider>,
    history: HistoryStore,
}

impl BatchEngine {
    pub fn new(cfg: RunConfig, provider: Arc<dyn CompletionProvider>, history: HistoryStore) -> Self {
        Self {
            cfg,
            provider,
            history,
        }
    }

    /// Process `queue` in order. Never returns early on its own: the outcome
    /// says whether the run completed, was cancelled, or failed.
    pub async fn run(
        self,
        queue: Vec<Topic>,
        template: PromptTemplate,
        credential: String,
        cancel: CancelFlag,
        event_tx: mpsc::UnboundedSender<RunEvent>,
    ) -> RunOutcome {
        let mut state = RunState::new(queue, cancel);
        let _ = event_tx.send(RunEvent::RunStarted {
            total: state.total(),
        });
        tracing::info!(total = state.total(), template = %template.name, "batch run started");

        let status = loop {
            let Some(topic) = state.current().cloned() else {
                break RunStatus::Completed;
            };
            let index = state.cursor();
            let _ = event_tx.send(RunEvent::Progress(state.progress(Some(topic.clone()))));

            // Checkpoint 1: before any work on this topic.
            if state.is_cancelled() {
                break RunStatus::Cancelled;
            }

            let _ = event_tx.send(RunEvent::TopicStarted {
                index,
                topic: topic.clone(),
            });
            let prompt = render::render(&topic, &template);
            tracing::debug!(topic_id = topic.id, %prompt, "rendered prompt");

            let text = match self.provider.complete(&prompt, &credential).await {
                Ok(c) => render::strip_code_fences(&c.text),
                Err(e) => {
                    tracing::warn!(topic_id = topic.id, error = %e, "provider call failed; aborting run");
                    break RunStatus::Failed(RunFailure::Provider(e));
                }
            };

            if self.cfg.strict_output && template.response_format == ResponseFormat::Json {
                if let Err(source) = render::validate_json_output(&text, &template.columns) {
                    tracing::warn!(topic_id = topic.id, error = %source, "model output rejected");
                    break RunStatus::Failed(RunFailure::MalformedOutput {
                        topic_id: topic.id,
                        source,
                    });
                }
            }

            // Checkpoint 2: a stop may have arrived while the call was in flight.
            if state.is_cancelled() {
                let _ = event_tx.send(RunEvent::Progress(state.progress(Some(topic.clone()))));
                break RunStatus::Cancelled;
            }

            let record = HistoryRecord::new(topic.name.clone(), text, template.content.clone());
            if let Err(failure) = self.persist(record.clone()).await {
                tracing::error!(topic_id = topic.id, error = %failure, "history write failed");
                return RunOutcome {
                    status: RunStatus::Failed(failure),
                    cursor: state.cursor(),
                    total: state.total(),
                    completed_ids: state.completed_ids().clone(),
                    unsaved: Some(record),
                };
            }

            state.complete_current();
            tracing::info!(topic_id = topic.id, cursor = state.cursor(), "topic completed");
            let _ = event_tx.send(RunEvent::TopicCompleted {
                index,
                record: Box::new(record),
            });
            let _ = event_tx.send(RunEvent::Progress(state.progress(None)));

            if state.has_remaining() && !self.cfg.delay.is_zero() {
                let _ = event_tx.send(RunEvent::Info(InfoEvent::Waiting {
                    seconds: self.cfg.delay.as_secs(),
                }));
                // Cancellation during the wait is picked up by checkpoint 1.
                cancellable_delay(self.cfg.delay, self.cfg.poll_interval, state.cancel_flag()).await;
            }
        };

        tracing::info!(status = status.label(), cursor = state.cursor(), "batch run finished");
        RunOutcome {
            status,
            cursor: state.cursor(),
            total: state.total(),
            completed_ids: state.completed_ids().clone(),
            unsaved: None,
        }
    }

    async fn persist(&self, record: HistoryRecord) -> Result<(), RunFailure> {
        let store = self.history.clone();
        match tokio::task::spawn_blocking(move || store.append(record)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RunFailure::Persistence(e.to_string())),
            Err(e) => Err(RunFailure::Persistence(format!("write task failed: {e}"))),
        }
    }
}

/// Sleep for `total` in slices of `poll`, returning `true` as soon as the
/// flag is set.
pub(crate) async fn cancellable_delay(total: Duration, poll: Duration, cancel: &CancelFlag) -> bool {
    let deadline = Instant::now() + total;
    let poll = poll.max(MIN_POLL);
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
