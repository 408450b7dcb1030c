use crate::model::HistoryRecord;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

const BASE_HEADERS: [&str; 4] = ["timestamp", "prompt", "promptContent", "response"];

/// Write records as a pretty JSON array.
pub(crate) fn export_json(path: &Path, records: &[HistoryRecord]) -> Result<()> {
    let data = serde_json::to_string_pretty(records).context("serialize history")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Write records as CSV. Each name in `columns` becomes an extra column filled
/// from the response parsed as a JSON object.
pub(crate) fn export_csv(path: &Path, records: &[HistoryRecord], columns: &[String]) -> Result<()> {
    std::fs::write(path, build_csv(records, columns))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn build_csv(records: &[HistoryRecord], columns: &[String]) -> String {
    let mut out = String::new();
    let header: Vec<&str> = BASE_HEADERS
        .iter()
        .copied()
        .chain(columns.iter().map(String::as_str))
        .collect();
    push_row(&mut out, &header);

    for r in records {
        let parsed: Option<serde_json::Map<String, serde_json::Value>> = if columns.is_empty() {
            None
        } else {
            serde_json::from_str(&crate::render::strip_code_fences(&r.response)).ok()
        };
        let extra: Vec<String> = columns
            .iter()
            .map(|c| {
                parsed
                    .as_ref()
                    .and_then(|m| m.get(c))
                    .map(cell_text)
                    .unwrap_or_default()
            })
            .collect();
        let mut row: Vec<&str> = vec![
            r.timestamp.as_str(),
            r.prompt.as_str(),
            r.prompt_content.as_str(),
            r.response.as_str(),
        ];
        row.extend(extra.iter().map(String::as_str));
        push_row(&mut out, &row);
    }
    out
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn push_row(out: &mut String, cells: &[&str]) {
    for (i, c) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if c.contains([',', '"', '\n', '\r']) {
            let _ = write!(out, "\"{}\"", c.replace('"', "\"\""));
        } else {
            out.push_str(c);
        }
    }
    out.push_str("\r\n");
}

/// Default export file name in the current directory, e.g.
/// `promptdeck-history-2025-07-02_10-15-00.csv`.
pub(crate) fn default_export_name(extension: &str) -> String {
    let stamp = crate::model::local_timestamp()
        .replace(':', "-")
        .replace(' ', "_");
    format!("promptdeck-history-{stamp}.{extension}")
}
