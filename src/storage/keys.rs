use super::{read_doc, write_doc};
use crate::error::StoreError;
use std::path::PathBuf;

const KEY_PREFIX: &str = "sk-";
const MIN_KEY_LEN: usize = 20;

/// Saved API keys, most recently added last.
#[derive(Debug, Clone)]
pub(crate) struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<String>, StoreError> {
        Ok(read_doc(&self.path)?.unwrap_or_default())
    }

    /// Validate and save a key. Returns `false` when it was already saved.
    pub fn add(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.trim();
        validate_key(key)?;
        let mut keys = self.load()?;
        if keys.iter().any(|k| k == key) {
            return Ok(false);
        }
        keys.push(key.to_string());
        write_doc(&self.path, &keys)?;
        Ok(true)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut keys = self.load()?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() == before {
            return Err(StoreError::NotFound("API key".into()));
        }
        write_doc(&self.path, &keys)
    }

    pub fn get(&self, index: usize) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.into_iter().nth(index))
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::Invalid("API key must not be empty".into()));
    }
    if !key.starts_with(KEY_PREFIX) || key.len() < MIN_KEY_LEN {
        return Err(StoreError::Invalid(format!(
            "API key must start with \"{KEY_PREFIX}\" and be at least {MIN_KEY_LEN} characters"
        )));
    }
    Ok(())
}

/// Show only enough of a key to tell saved keys apart.
pub(crate) fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-abcdefghijklmnopqrstuvwxyz";

    #[test]
    fn add_dedupes_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("api-keys.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.add(KEY).unwrap());
        assert!(!store.add(KEY).unwrap());
        assert_eq!(store.get(0).unwrap().as_deref(), Some(KEY));
        assert_eq!(store.get(1).unwrap(), None);
        store.remove(KEY).unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(matches!(store.remove(KEY), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("pk-abcdefghijklmnopqrstuvwxyz").is_err());
        assert!(validate_key("sk-short").is_err());
        assert!(validate_key(KEY).is_ok());
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_key(KEY), "sk-abc…wxyz");
        assert_eq!(mask_key("short"), "*****");
    }
}
