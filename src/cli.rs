use crate::config::Settings;
use crate::engine::openai::OpenAiProvider;
use crate::engine::CompletionProvider;
use crate::error::ValidationError;
use crate::logging::{LogOptions, LogTarget};
use crate::model::{BatchJob, HistoryRecord, PromptTemplate, ResponseFormat, RunEvent, RunStatus, Topic};
use crate::orchestrator::{self, ExportTargets, Runner};
use crate::storage::{self, AppPaths, HistoryStore, KeyStore, PromptStore};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "promptdeck",
    version,
    about = "Prompt templates and batch runs against chat-completion APIs, with optional TUI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Topic list (JSON array) to queue when the TUI opens
    #[arg(long)]
    pub topics: Option<PathBuf>,

    /// Prompt template id to preselect in the TUI
    #[arg(long)]
    pub prompt: Option<String>,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Flags shared by every mode.
#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// API key (takes precedence over saved keys)
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Index of the saved key to use when no key is given
    #[arg(long, global = true)]
    pub key_index: Option<usize>,

    /// Delay between topics in a batch run (e.g. 30s, 2m; max 1h)
    #[arg(long, global = true, env = "PROMPTDECK_DELAY")]
    pub delay: Option<humantime::Duration>,

    /// Chat model name
    #[arg(long, global = true, env = "PROMPTDECK_MODEL")]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "PROMPTDECK_BASE_URL")]
    pub base_url: Option<String>,

    /// Fail a run when a JSON reply does not carry exactly the template's properties
    #[arg(long, global = true)]
    pub strict_output: bool,

    /// Log filter (e.g. info, promptdeck=debug)
    #[arg(long, global = true, env = crate::logging::LOG_ENV)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding history, prompts, keys and settings
    #[arg(long, global = true, env = "PROMPTDECK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep data files in the current directory
    #[arg(
        long,
        global = true,
        env = "PROMPTDECK_DEV",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub dev: bool,
}

impl GlobalArgs {
    /// Flag and environment values as a settings overlay.
    fn overrides(&self) -> Settings {
        Settings {
            delay: self.delay.map(Into::into),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            strict_output: self.strict_output.then_some(true),
            log_level: self.log_level.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a prompt template over every topic in a list
    Run(RunArgs),
    /// Send a single request and save the reply to history
    Chat(ChatArgs),
    /// Manage prompt templates
    #[command(subcommand)]
    Prompts(PromptsCommand),
    /// Manage saved API keys
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Browse, prune and export saved replies
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Topic list: JSON array of {id, name, period, topic}
    #[arg(long)]
    pub topics: PathBuf,

    /// Prompt template id (defaults to the first template)
    #[arg(long)]
    pub prompt: Option<String>,

    /// Print a JSON report and exit
    #[arg(long, conflicts_with_all = ["text", "silent"])]
    pub json: bool,

    /// Print a text summary and exit (default)
    #[arg(long, conflicts_with = "silent")]
    pub text: bool,

    /// Suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export this run's replies as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export this run's replies as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ChatArgs {
    /// Message to send
    pub input: String,

    /// Wrap the message in this prompt template
    #[arg(long)]
    pub prompt: Option<String>,

    /// Print the saved record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PromptsCommand {
    /// List templates
    List,
    /// Show one template in full
    Show { id: String },
    /// Add a template
    Add(PromptFields),
    /// Replace fields of a template; unset fields keep their value
    Update {
        id: String,
        #[command(flatten)]
        fields: PromptFields,
    },
    /// Delete a template
    Remove { id: String },
}

#[derive(Debug, Args, Clone)]
pub struct PromptFields {
    #[arg(long)]
    pub name: Option<String>,

    /// Template text; `{{topic}}` marks where the topic goes
    #[arg(long, conflicts_with = "content_file")]
    pub content: Option<String>,

    /// Read the template text from a file
    #[arg(long)]
    pub content_file: Option<PathBuf>,

    /// Reply format: json or text
    #[arg(long)]
    pub format: Option<ResponseFormat>,

    /// Properties the JSON reply must carry (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub columns: Option<Vec<String>>,
}

impl PromptFields {
    fn content(&self) -> Result<Option<String>> {
        match (&self.content, &self.content_file) {
            (Some(c), _) => Ok(Some(c.clone())),
            (None, Some(p)) => std::fs::read_to_string(p)
                .with_context(|| format!("read {}", p.display()))
                .map(Some),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum KeysCommand {
    /// List saved keys (masked)
    List,
    /// Save a key
    Add { key: String },
    /// Remove a key, given in full or by its list index
    Remove { key: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Debug, Subcommand, Clone)]
pub enum HistoryCommand {
    /// List saved replies, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one saved reply
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete one saved reply
    Delete { id: String },
    /// Delete every saved reply
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Write the whole history to a file
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output path (defaults to a timestamped name in the current directory)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Expand replies into this template's properties (CSV only)
        #[arg(long)]
        prompt: Option<String>,
    },
}

/// Resolved data root, settings and stores.
#[derive(Debug, Clone)]
pub(crate) struct AppContext {
    pub paths: AppPaths,
    pub settings: Settings,
    pub history: HistoryStore,
    pub prompts: PromptStore,
    pub keys: KeyStore,
}

impl AppContext {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let paths = AppPaths::resolve(global.data_dir.as_deref(), global.dev)?;
        let file = Settings::load(&paths.settings())?;
        let settings = file.merge(global.overrides());
        Ok(Self {
            history: HistoryStore::new(paths.history()),
            prompts: PromptStore::new(paths.prompts()),
            keys: KeyStore::new(paths.keys()),
            paths,
            settings,
        })
    }

    pub fn provider(&self) -> Result<Arc<dyn CompletionProvider>> {
        let provider =
            OpenAiProvider::new(self.settings.openai_config()).context("build HTTP client")?;
        Ok(Arc::new(provider))
    }

    /// Flag or `OPENAI_API_KEY` first, then the saved key at `--key-index`
    /// (default 0).
    pub fn credential(&self, global: &GlobalArgs) -> Result<Option<String>> {
        if let Some(key) = global.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                return Ok(Some(key.to_string()));
            }
        }
        Ok(self.keys.get(global.key_index.unwrap_or(0))?)
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let ctx = AppContext::load(&args.global)?;

    let tui_mode = args.command.is_none() && cfg!(feature = "tui");
    crate::logging::init_logging(&LogOptions {
        level: ctx.settings.log_level().map(str::to_string),
        json: args.global.log_json,
        target: if tui_mode {
            LogTarget::File(ctx.paths.log_file())
        } else {
            LogTarget::Stderr
        },
    })?;
    tracing::debug!(
        root = %ctx.paths.root.display(),
        history = %ctx.history.path().display(),
        "data root resolved"
    );

    match args.command.clone() {
        Some(Command::Run(run)) => run_batch(&ctx, &args.global, run).await,
        Some(Command::Chat(chat)) => run_chat(&ctx, &args.global, chat).await,
        Some(Command::Prompts(cmd)) => prompts_command(&ctx, cmd),
        Some(Command::Keys(cmd)) => keys_command(&ctx, cmd),
        Some(Command::History(cmd)) => history_command(&ctx, cmd),
        None => {
            #[cfg(feature = "tui")]
            {
                crate::tui::run(args, ctx).await
            }
            #[cfg(not(feature = "tui"))]
            {
                anyhow::bail!("built without TUI support; use a subcommand (see --help)")
            }
        }
    }
}

/// Read and validate a topic list file.
pub(crate) fn load_topics(path: &Path) -> Result<Vec<Topic>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_topics(&raw).with_context(|| format!("load topics from {}", path.display()))
}

pub(crate) fn parse_topics(raw: &str) -> Result<Vec<Topic>, ValidationError> {
    let topics: Vec<Topic> =
        serde_json::from_str(raw).map_err(|e| ValidationError::InvalidTopics(e.to_string()))?;
    let mut seen = HashSet::new();
    for t in &topics {
        if !seen.insert(t.id) {
            return Err(ValidationError::DuplicateTopicId(t.id));
        }
    }
    Ok(topics)
}

/// Template by id, or the first template when no id is given.
pub(crate) fn select_template(prompts: &PromptStore, id: Option<&str>) -> Result<PromptTemplate> {
    match id {
        Some(id) => Ok(prompts.get(id)?),
        None => Ok(prompts
            .load()?
            .into_iter()
            .next()
            .ok_or(ValidationError::MissingTemplate)?),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Silent,
}

impl From<&RunArgs> for OutputMode {
    fn from(args: &RunArgs) -> Self {
        if args.silent {
            OutputMode::Silent
        } else if args.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

#[derive(Serialize)]
struct BatchReport<'a> {
    template: &'a str,
    #[serde(flatten)]
    outcome: &'a crate::model::RunOutcome,
    records: &'a [HistoryRecord],
}

async fn run_batch(ctx: &AppContext, global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let queue = load_topics(&args.topics)?;
    let template = select_template(&ctx.prompts, args.prompt.as_deref())?;
    let credential = ctx.credential(global)?.unwrap_or_default();
    let mode = OutputMode::from(&args);

    let mut runner = Runner::new(ctx.settings.run_config(), ctx.provider()?, ctx.history.clone());
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let job = BatchJob {
        queue,
        template: Some(template.clone()),
        credential,
    };
    runner.start(job, evt_tx).context("cannot start run")?;

    let (out_tx, out_handle) = spawn_output_writer();
    let verbose = mode == OutputMode::Text;
    let mut records: Vec<HistoryRecord> = Vec::new();
    let mut total = 0usize;
    let mut stopping = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // The channel closes once the engine task drops its sender.
    loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    RunEvent::RunStarted { total: n } => {
                        total = n;
                        if verbose {
                            let _ = out_tx.send(OutputLine::Stderr(format!(
                                "Running {n} topic(s) with template '{}'",
                                template.name
                            )));
                        }
                    }
                    RunEvent::TopicStarted { index, topic } => {
                        if verbose {
                            let _ = out_tx.send(OutputLine::Stderr(format!(
                                "== [{}/{}] {} ==",
                                index + 1,
                                total,
                                crate::render::subject_for(&topic)
                            )));
                        }
                    }
                    RunEvent::TopicCompleted { index, record } => {
                        if verbose {
                            let _ = out_tx.send(OutputLine::Stderr(format!(
                                "Saved [{}/{}]: {}",
                                index + 1,
                                total,
                                record.prompt
                            )));
                        }
                        records.push(*record);
                    }
                    RunEvent::Info(info) => {
                        if verbose {
                            let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                        }
                    }
                    RunEvent::Progress(_) | RunEvent::RunFinished { .. } => {}
                }
            }
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                runner.stop();
                if mode != OutputMode::Silent {
                    let _ = out_tx.send(OutputLine::Stderr(
                        "Stopping after the current request…".into(),
                    ));
                }
            }
        }
    }

    let outcome = runner.wait().await.context("run task vanished")?;
    tracing::debug!(phase = ?runner.phase(), cursor = outcome.cursor, "batch run settled");
    let processed = orchestrator::process_run_completion(
        &ExportTargets {
            json: args.export_json.clone(),
            csv: args.export_csv.clone(),
        },
        &ctx.history,
        None,
        &template.columns,
        &records,
        &outcome,
    );

    match mode {
        OutputMode::Json => {
            let report = BatchReport {
                template: &template.name,
                outcome: &outcome,
                records: &records,
            };
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
        }
        OutputMode::Text => {
            let summary = crate::text_summary::build_text_summary(&template, &outcome, &records);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        OutputMode::Silent => {}
    }
    for msg in processed.export_messages {
        if mode != OutputMode::Silent || msg.contains("failed") {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;

    match outcome.status {
        RunStatus::Completed | RunStatus::Cancelled => Ok(()),
        RunStatus::Failed(f) if f.is_invalid_credential() => Err(anyhow::Error::new(f)
            .context("check --api-key, OPENAI_API_KEY or the saved keys")),
        RunStatus::Failed(f) => Err(anyhow::Error::new(f).context("batch run failed")),
    }
}

async fn run_chat(ctx: &AppContext, global: &GlobalArgs, args: ChatArgs) -> Result<()> {
    let template = match args.prompt.as_deref() {
        Some(id) => Some(ctx.prompts.get(id)?),
        None => None,
    };
    let credential = ctx.credential(global)?.unwrap_or_default();
    let provider = ctx.provider()?;
    let record = orchestrator::chat_once(
        provider.as_ref(),
        &ctx.history,
        &args.input,
        template.as_ref(),
        &credential,
    )
    .await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record.response);
    }
    Ok(())
}

fn prompts_command(ctx: &AppContext, cmd: PromptsCommand) -> Result<()> {
    match cmd {
        PromptsCommand::List => {
            for p in ctx.prompts.load()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    p.id,
                    p.name,
                    p.response_format.as_str(),
                    p.columns.join(",")
                );
            }
        }
        PromptsCommand::Show { id } => {
            let p = ctx.prompts.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&p)?);
        }
        PromptsCommand::Add(fields) => {
            let name = fields.name.clone().context("--name is required")?;
            let content = fields
                .content()?
                .context("--content or --content-file is required")?;
            let p = ctx.prompts.add(
                &name,
                &content,
                fields.format.unwrap_or_default(),
                fields.columns.clone().unwrap_or_default(),
            )?;
            println!("Added prompt {} ({})", p.id, p.name);
        }
        PromptsCommand::Update { id, fields } => {
            let current = ctx.prompts.get(&id)?;
            let content = fields.content()?.unwrap_or(current.content);
            let p = ctx.prompts.update(
                &id,
                fields.name.as_deref().unwrap_or(&current.name),
                &content,
                fields.format.unwrap_or(current.response_format),
                fields.columns.clone().unwrap_or(current.columns),
            )?;
            println!("Updated prompt {} ({})", p.id, p.name);
        }
        PromptsCommand::Remove { id } => {
            ctx.prompts.remove(&id)?;
            println!("Removed prompt {id}");
        }
    }
    Ok(())
}

fn keys_command(ctx: &AppContext, cmd: KeysCommand) -> Result<()> {
    match cmd {
        KeysCommand::List => {
            for (i, k) in ctx.keys.load()?.iter().enumerate() {
                println!("[{i}] {}", storage::mask_key(k));
            }
        }
        KeysCommand::Add { key } => {
            if ctx.keys.add(&key)? {
                println!("Saved key {}", storage::mask_key(key.trim()));
            } else {
                println!("Key already saved");
            }
        }
        KeysCommand::Remove { key } => {
            let keys = ctx.keys.load()?;
            let target = match key.parse::<usize>() {
                Ok(i) if i < keys.len() => keys[i].clone(),
                _ => key,
            };
            ctx.keys.remove(&target)?;
            println!("Removed key {}", storage::mask_key(&target));
        }
    }
    Ok(())
}

fn history_command(ctx: &AppContext, cmd: HistoryCommand) -> Result<()> {
    match cmd {
        HistoryCommand::List { limit } => {
            for r in ctx.history.load_recent(limit)? {
                println!("{}\t{}\t{}\t{}", r.id, r.timestamp, r.prompt, preview(&r.response, 60));
            }
        }
        HistoryCommand::Show { id, json } => {
            let record = ctx
                .history
                .load()?
                .into_iter()
                .find(|r| r.id == id)
                .with_context(|| format!("no history record '{id}'"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Time:   {}", record.timestamp);
                println!("Prompt: {}", record.prompt);
                println!();
                println!("{}", record.response);
            }
        }
        HistoryCommand::Delete { id } => {
            if !ctx.history.delete(&id)? {
                anyhow::bail!("no history record '{id}'");
            }
            println!("Deleted {id}");
        }
        HistoryCommand::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear history without --yes");
            }
            let n = ctx.history.clear()?;
            println!("Deleted {n} record(s)");
        }
        HistoryCommand::Export {
            format,
            out,
            prompt,
        } => {
            let records = ctx.history.load()?;
            let columns = match prompt.as_deref() {
                Some(id) => ctx.prompts.get(id)?.columns,
                None => Vec::new(),
            };
            let path = match (out, format) {
                (Some(p), _) => p,
                (None, ExportFormat::Json) => PathBuf::from(storage::default_export_name("json")),
                (None, ExportFormat::Csv) => PathBuf::from(storage::default_export_name("csv")),
            };
            match format {
                ExportFormat::Json => storage::export_json(&path, &records)?,
                ExportFormat::Csv => storage::export_csv(&path, &records, &columns)?,
            }
            println!("Exported {} record(s) to {}", records.len(), path.display());
        }
    }
    Ok(())
}

/// First line of `text`, cut to `max` characters.
pub(crate) fn preview(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(dir: &Path) -> GlobalArgs {
        GlobalArgs {
            api_key: None,
            key_index: None,
            delay: None,
            model: None,
            base_url: None,
            strict_output: false,
            log_level: None,
            log_json: false,
            data_dir: Some(dir.to_path_buf()),
            dev: false,
        }
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "run",
            "--topics",
            "t.json",
            "--prompt",
            "1",
            "--json",
            "--delay",
            "5s",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Run(r)) => {
                assert_eq!(r.topics, PathBuf::from("t.json"));
                assert!(r.json);
            }
            other => panic!("unexpected {other:?}"),
        }
        let delay: std::time::Duration = cli.global.delay.unwrap().into();
        assert_eq!(delay.as_secs(), 5);
    }

    #[test]
    fn dev_mode_reads_numeric_env_values() {
        std::env::set_var("PROMPTDECK_DEV", "1");
        let on = Cli::try_parse_from(["promptdeck", "history", "list"]);
        std::env::set_var("PROMPTDECK_DEV", "0");
        let off = Cli::try_parse_from(["promptdeck", "history", "list"]);
        std::env::remove_var("PROMPTDECK_DEV");

        assert!(on.unwrap().global.dev);
        assert!(!off.unwrap().global.dev);
    }

    #[test]
    fn output_modes_conflict() {
        assert!(Cli::try_parse_from([
            "promptdeck", "run", "--topics", "t.json", "--json", "--silent"
        ])
        .is_err());
    }

    #[test]
    fn prompt_columns_split_on_commas() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "prompts",
            "add",
            "--name",
            "n",
            "--content",
            "c",
            "--format",
            "text",
            "--columns",
            "title,summary",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Prompts(PromptsCommand::Add(f))) => {
                assert_eq!(f.columns.unwrap(), vec!["title", "summary"]);
                assert_eq!(f.format, Some(ResponseFormat::Text));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn topic_lists_are_validated() {
        let ok = parse_topics(r#"[{"id":1,"name":"A","period":"p","topic":"t"}]"#).unwrap();
        assert_eq!(ok.len(), 1);
        assert!(matches!(
            parse_topics(r#"[{"id":1,"name":"A"}]"#),
            Err(ValidationError::InvalidTopics(_))
        ));
        assert_eq!(
            parse_topics(
                r#"[{"id":1,"name":"A","period":"p","topic":"t"},
                    {"id":1,"name":"B","period":"p","topic":"t"}]"#
            ),
            Err(ValidationError::DuplicateTopicId(1))
        );
    }

    #[test]
    fn explicit_key_beats_saved_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = global(dir.path());
        let ctx = AppContext::load(&g).unwrap();
        ctx.keys.add("sk-saved-000000000000000").unwrap();
        ctx.keys.add("sk-saved-111111111111111").unwrap();

        assert_eq!(
            ctx.credential(&g).unwrap().as_deref(),
            Some("sk-saved-000000000000000")
        );
        g.key_index = Some(1);
        assert_eq!(
            ctx.credential(&g).unwrap().as_deref(),
            Some("sk-saved-111111111111111")
        );
        g.api_key = Some("sk-flag".into());
        assert_eq!(ctx.credential(&g).unwrap().as_deref(), Some("sk-flag"));
        g.api_key = None;
        g.key_index = Some(9);
        assert_eq!(ctx.credential(&g).unwrap(), None);
    }

    #[test]
    fn credential_sees_keys_saved_after_startup() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path());
        let ctx = AppContext::load(&g).unwrap();
        assert_eq!(ctx.credential(&g).unwrap(), None);

        // Another process saves a key while this one is running.
        KeyStore::new(dir.path().join(storage::KEYS_FILE))
            .add("sk-later-0000000000000000")
            .unwrap();
        assert_eq!(
            ctx.credential(&g).unwrap().as_deref(),
            Some("sk-later-0000000000000000")
        );
    }

    #[test]
    fn flags_layer_over_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(storage::SETTINGS_FILE),
            "delay = \"10s\"\nmodel = \"file-model\"\n",
        )
        .unwrap();
        let mut g = global(dir.path());
        g.delay = Some("3s".parse().unwrap());
        let ctx = AppContext::load(&g).unwrap();
        assert_eq!(ctx.settings.run_config().delay.as_secs(), 3);
        assert_eq!(ctx.settings.openai_config().model, "file-model");
    }

    #[test]
    fn select_template_defaults_to_first() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptStore::new(dir.path().join("prompts.json"));
        assert_eq!(select_template(&prompts, None).unwrap().id, "1");
        assert!(select_template(&prompts, Some("nope")).is_err());
        prompts.save(&[]).unwrap();
        assert!(select_template(&prompts, None).is_err());
    }

    #[test]
    fn preview_takes_first_line() {
        assert_eq!(preview("\n  hello world\nsecond", 60), "hello world");
        assert_eq!(preview("abcdef", 4), "abc…");
    }
}
