//! Post-run processing utilities.
//!
//! Handles exports of the records a run produced and history refresh after a run ends.

use crate::model::{HistoryRecord, RunOutcome};
use crate::storage::{self, HistoryStore};
use std::path::PathBuf;

/// Where to write the records of a finished run, if anywhere.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExportTargets {
    pub json: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub export_messages: Vec<String>,
    pub history: Vec<HistoryRecord>,
}

/// Process a finished run: export its records and reload recent history.
///
/// `history_load` is how many recent records to reload; `None` skips the read.
///
/// Exports run for every terminal state so partial work from a stopped or
/// failed run is not lost. A record the run could not persist is included.
pub(crate) fn process_run_completion(
    targets: &ExportTargets,
    history: &HistoryStore,
    history_load: Option<usize>,
    columns: &[String],
    records: &[HistoryRecord],
    outcome: &RunOutcome,
) -> ProcessedRun {
    let mut all: Vec<HistoryRecord> = records.to_vec();
    if let Some(unsaved) = outcome.unsaved.as_ref() {
        all.push(unsaved.clone());
    }

    let mut export_messages = Vec::new();
    if let Some(export_path) = targets.json.as_deref() {
        match storage::export_json(export_path, &all) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = targets.csv.as_deref() {
        match storage::export_csv(export_path, &all, columns) {
            Ok(_) => export_messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    let history = match history_load.map(|n| history.load_recent(n)) {
        None => Vec::new(),
        Some(Ok(h)) => h,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "history reload failed");
            Vec::new()
        }
    };

    ProcessedRun {
        export_messages,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunFailure;
    use crate::model::RunStatus;

    fn outcome(unsaved: Option<HistoryRecord>) -> RunOutcome {
        RunOutcome {
            status: if unsaved.is_some() {
                RunStatus::Failed(RunFailure::Persistence("disk full".into()))
            } else {
                RunStatus::Completed
            },
            cursor: 1,
            total: 2,
            completed_ids: [1].into_iter().collect(),
            unsaved,
        }
    }

    #[test]
    fn exports_run_records_including_unsaved() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("chat-history.json"));
        let saved = HistoryRecord::new("A".into(), "{\"title\":\"a\"}".into(), "c".into());
        store.append(saved.clone()).unwrap();
        let unsaved = HistoryRecord::new("B".into(), "{\"title\":\"b\"}".into(), "c".into());

        let targets = ExportTargets {
            json: Some(dir.path().join("run.json")),
            csv: Some(dir.path().join("run.csv")),
        };
        let processed = process_run_completion(
            &targets,
            &store,
            Some(10),
            &["title".to_string()],
            &[saved],
            &outcome(Some(unsaved)),
        );

        assert_eq!(processed.export_messages.len(), 2);
        assert!(processed.export_messages[0].starts_with("Exported JSON"));
        let exported: Vec<HistoryRecord> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("run.json")).unwrap())
                .unwrap();
        assert_eq!(exported.len(), 2);
        let csv = std::fs::read_to_string(dir.path().join("run.csv")).unwrap();
        assert!(csv.contains("title"));
        assert!(csv.contains("b"));
        assert_eq!(processed.history.len(), 1);
    }

    #[test]
    fn export_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("chat-history.json"));
        let targets = ExportTargets {
            json: Some(dir.path().join("missing").join("deeper").join("x.json")),
            csv: None,
        };
        let processed = process_run_completion(&targets, &store, Some(10), &[], &[], &outcome(None));
        assert_eq!(processed.export_messages.len(), 1);
        assert!(processed.export_messages[0].starts_with("Export JSON failed"));
        assert!(processed.history.is_empty());
    }

    #[test]
    fn history_reload_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("chat-history.json"));
        store
            .append(HistoryRecord::new("A".into(), "r".into(), "c".into()))
            .unwrap();

        let processed =
            process_run_completion(&ExportTargets::default(), &store, None, &[], &[], &outcome(None));
        assert!(processed.history.is_empty());
        assert!(processed.export_messages.is_empty());

        let processed = process_run_completion(
            &ExportTargets::default(),
            &store,
            Some(5),
            &[],
            &[],
            &outcome(None),
        );
        assert_eq!(processed.history.len(), 1);
    }
}
