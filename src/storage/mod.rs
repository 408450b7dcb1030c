//! JSON-file persistence.
//!
//! Each store keeps one whole document on disk and every mutation is a
//! read-modify-write of that document. Writes land in a sibling temp file that
//! is renamed over the original.

mod export;
mod history;
mod keys;
mod prompts;

pub(crate) use export::{default_export_name, export_csv, export_json};
pub(crate) use history::HistoryStore;
pub(crate) use keys::{mask_key, KeyStore};
pub(crate) use prompts::PromptStore;

use crate::error::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

pub(crate) const HISTORY_FILE: &str = "chat-history.json";
pub(crate) const PROMPTS_FILE: &str = "prompts.json";
pub(crate) const KEYS_FILE: &str = "api-keys.json";
pub(crate) const SETTINGS_FILE: &str = "settings.toml";
pub(crate) const LOG_FILE: &str = "promptdeck.log";

/// Resolved locations of every file the application owns.
#[derive(Debug, Clone)]
pub(crate) struct AppPaths {
    pub root: PathBuf,
}

impl AppPaths {
    /// Pick the data root: explicit override, then development mode (current
    /// directory), then the per-user data directory.
    pub fn resolve(override_dir: Option<&Path>, dev: bool) -> anyhow::Result<Self> {
        use anyhow::Context;
        let root = if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if dev {
            std::env::current_dir().context("get current directory")?
        } else {
            dirs::data_dir()
                .context("no per-user data directory on this platform")?
                .join("promptdeck")
        };
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create data directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn history(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn prompts(&self) -> PathBuf {
        self.root.join(PROMPTS_FILE)
    }

    pub fn keys(&self) -> PathBuf {
        self.root.join(KEYS_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }
}

/// Read a whole JSON document. A missing file yields `None`.
pub(crate) fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Replace a whole JSON document.
pub(crate) fn write_doc<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
