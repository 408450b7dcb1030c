use super::{read_doc, write_doc};
use crate::error::StoreError;
use crate::model::{PromptTemplate, ResponseFormat};
use std::path::PathBuf;

/// Template seeded into a fresh `prompts.json`.
fn default_prompts() -> Vec<PromptTemplate> {
    vec![PromptTemplate {
        id: "1".into(),
        name: "Op-ed essay".into(),
        content: "Write an op-ed style essay in Markdown about the subject above. Give it a \
                  clear structure (introduction, body, conclusion) and make it at least 1500 \
                  characters long. Open with a hook that draws the reader in. In the body, \
                  explain the subject's life, core ideas, major works and lasting influence in \
                  plain language, using examples or analogies for difficult concepts. End \
                  with a question that invites the reader to reflect. The summary must be \
                  about 160 characters and read like a sentence lifted from the essay itself."
            .into(),
        response_format: ResponseFormat::Json,
        columns: vec![
            "title".into(),
            "content".into(),
            "summary".into(),
            "nickname".into(),
        ],
        updated_at: None,
    }]
}

#[derive(Debug, Clone)]
pub(crate) struct PromptStore {
    path: PathBuf,
}

impl PromptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load templates, seeding the default set when the file does not exist.
    pub fn load(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        match read_doc(&self.path)? {
            Some(prompts) => Ok(prompts),
            None => {
                let prompts = default_prompts();
                write_doc(&self.path, &prompts)?;
                tracing::info!(path = %self.path.display(), "seeded default prompt templates");
                Ok(prompts)
            }
        }
    }

    pub fn save(&self, prompts: &[PromptTemplate]) -> Result<(), StoreError> {
        write_doc(&self.path, prompts)
    }

    pub fn get(&self, id: &str) -> Result<PromptTemplate, StoreError> {
        self.load()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("prompt '{id}'")))
    }

    pub fn add(
        &self,
        name: &str,
        content: &str,
        response_format: ResponseFormat,
        columns: Vec<String>,
    ) -> Result<PromptTemplate, StoreError> {
        validate(name, content)?;
        let mut prompts = self.load()?;
        let mut id = now_millis().to_string();
        // Two adds in the same millisecond would otherwise collide.
        while prompts.iter().any(|p| p.id == id) {
            id = format!("{id}-1");
        }
        let prompt = PromptTemplate {
            id,
            name: name.trim().to_string(),
            content: content.to_string(),
            response_format,
            columns: clean_columns(columns),
            updated_at: None,
        };
        prompts.push(prompt.clone());
        self.save(&prompts)?;
        Ok(prompt)
    }

    pub fn update(
        &self,
        id: &str,
        name: &str,
        content: &str,
        response_format: ResponseFormat,
        columns: Vec<String>,
    ) -> Result<PromptTemplate, StoreError> {
        validate(name, content)?;
        let mut prompts = self.load()?;
        let slot = prompts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("prompt '{id}'")))?;
        slot.name = name.trim().to_string();
        slot.content = content.to_string();
        slot.response_format = response_format;
        slot.columns = clean_columns(columns);
        slot.updated_at = Some(now_millis());
        let updated = slot.clone();
        self.save(&prompts)?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut prompts = self.load()?;
        let before = prompts.len();
        prompts.retain(|p| p.id != id);
        if prompts.len() == before {
            return Err(StoreError::NotFound(format!("prompt '{id}'")));
        }
        self.save(&prompts)
    }
}

fn validate(name: &str, content: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid("prompt name must not be empty".into()));
    }
    if content.trim().is_empty() {
        return Err(StoreError::Invalid("prompt content must not be empty".into()));
    }
    Ok(())
}

/// Trim property names and drop blanks and repeats, keeping order.
fn clean_columns(columns: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(columns.len());
    for c in columns {
        let c = c.trim().to_string();
        if !c.is_empty() && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
