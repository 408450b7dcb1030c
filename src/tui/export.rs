use crate::model::HistoryRecord;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();
const CLIPBOARD_HOLD: Duration = Duration::from_secs(2);

fn export_path(extension: &str) -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(crate::storage::default_export_name(extension)))
}

/// Export records as JSON into the current directory.
/// Returns the absolute path of the exported file.
pub fn export_records_json(records: &[HistoryRecord]) -> Result<PathBuf> {
    let path = export_path("json")?;
    crate::storage::export_json(&path, records)?;
    Ok(path)
}

/// Export records as CSV into the current directory, expanding `columns`.
pub fn export_records_csv(records: &[HistoryRecord], columns: &[String]) -> Result<PathBuf> {
    let path = export_path("csv")?;
    crate::storage::export_csv(&path, records, columns)?;
    Ok(path)
}

fn clipboard_worker() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                let Ok(mut clipboard) = arboard::Clipboard::new() else {
                    continue;
                };
                if clipboard.set_text(text).is_ok() {
                    // X11/Wayland drop the selection together with its owner.
                    std::thread::sleep(CLIPBOARD_HOLD);
                }
            }
        });
        tx
    })
}

/// Hand `text` to the clipboard thread; returns before the copy happens.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    clipboard_worker()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard thread is gone"))
}
