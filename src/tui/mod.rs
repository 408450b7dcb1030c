mod export;
mod help;
mod state;

use crate::cli::{AppContext, Cli};
use crate::model::{BatchJob, RunEvent, RunOutcome, RunPhase};
use crate::orchestrator::{self, ExportTargets, Runner, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{UiState, TAB_COUNT, TAB_HELP, TAB_HISTORY, TAB_PROMPTS, TAB_RUN};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

// Rows taken by the tab bar, borders and the list header.
const HISTORY_CHROME_ROWS: u16 = 6;

pub async fn run(args: Cli, ctx: AppContext) -> Result<()> {
    // Unbounded channels avoid backpressure between the UI thread and the controller.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let runner = Runner::new(ctx.settings.run_config(), ctx.provider()?, ctx.history.clone());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_ctx = ctx.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(args, ui_ctx, event_rx, cmd_tx));

    orchestrator::run_controller(runner, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }
    Ok(())
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    ctx: AppContext,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let initial_load = terminal
        .size()
        .map(|size| ((size.height as usize).saturating_sub(2) * 3).max(20))
        .unwrap_or(66);

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        initial_history_load_size: initial_load,
        selected_prompt: args.prompt.clone(),
        ..Default::default()
    };
    match ctx.history.load_recent(initial_load) {
        Ok(h) => state.set_history(h),
        Err(e) => state.info = format!("History load failed: {e}"),
    }
    reload_prompts(&ctx, &mut state);
    if let Some(id) = args.prompt.as_deref() {
        if !state.prompts.iter().any(|p| p.id == id) {
            state.info = format!("Prompt '{id}' not found; using the first template");
            state.selected_prompt = None;
        }
    }
    if let Some(path) = args.topics.clone() {
        state.queue_source = Some(path);
        reload_topics(&mut state);
    } else if state.info.is_empty() {
        state.info = "No topic file loaded; start with --topics FILE".into();
    }
    if !matches!(ctx.credential(&args.global), Ok(Some(_))) {
        state.info = "No API key: pass --api-key, set OPENAI_API_KEY or add one with `promptdeck keys add`".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                RunEvent::RunFinished { outcome } => handle_run_finished(&ctx, &mut state, *outcome),
                other => state.apply_event(other),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let visible_rows = terminal
                    .size()
                    .map(|s| s.height.saturating_sub(HISTORY_CHROME_ROWS) as usize)
                    .unwrap_or(20);
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % TAB_COUNT;
                        if state.tab == TAB_HISTORY {
                            state.history_detail_view = false;
                        }
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = TAB_HELP;
                    }
                    (_, KeyCode::Char('s')) if state.tab == TAB_RUN => {
                        if state.is_running() {
                            state.info = "A run is already in progress".into();
                        } else {
                            // Re-read on every start so keys saved elsewhere are picked up.
                            let credential = match ctx.credential(&args.global) {
                                Ok(key) => key.unwrap_or_default(),
                                Err(e) => {
                                    state.info = format!("Key load failed: {e:#}");
                                    continue;
                                }
                            };
                            let job = BatchJob {
                                queue: state.queue.clone(),
                                template: state.active_prompt().cloned(),
                                credential,
                            };
                            state.begin_run();
                            state.info = "Starting…".into();
                            let _ = cmd_tx.send(UiCommand::Start(job));
                        }
                    }
                    (_, KeyCode::Char('x')) if state.tab == TAB_RUN => {
                        if state.is_running() {
                            state.info = "Stopping after the current request…".into();
                            let _ = cmd_tx.send(UiCommand::Stop);
                        } else {
                            state.info = "No run in progress".into();
                        }
                    }
                    (_, KeyCode::Char('l')) if state.tab == TAB_RUN => {
                        if state.is_running() {
                            state.info = "Cannot reload topics while a run is in progress".into();
                        } else {
                            reload_topics(&mut state);
                        }
                    }
                    (_, KeyCode::Char('r')) if state.tab == TAB_PROMPTS => {
                        reload_prompts(&ctx, &mut state);
                        state.info = format!("Loaded {} template(s)", state.prompts.len());
                    }
                    (_, KeyCode::Char('r')) if state.tab == TAB_HISTORY => {
                        refresh_history(&ctx, &mut state);
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => match state.tab {
                        TAB_PROMPTS => state.prompt_up(),
                        TAB_HISTORY if state.history_detail_view => {
                            state.history_detail_scroll = state.history_detail_scroll.saturating_sub(1);
                        }
                        TAB_HISTORY => state.history_up(),
                        _ => {}
                    },
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => match state.tab {
                        TAB_PROMPTS => state.prompt_down(),
                        TAB_HISTORY if state.history_detail_view => {
                            state.history_detail_scroll += 1;
                        }
                        TAB_HISTORY => state.history_down(visible_rows),
                        _ => {}
                    },
                    (_, KeyCode::Enter) if state.tab == TAB_PROMPTS => {
                        let running = state.is_running();
                        if let Some(p) = state.select_prompt_under_cursor() {
                            let name = p.name.clone();
                            state.info = if running {
                                format!("Template '{name}' will be used for the next run")
                            } else {
                                format!("Using template '{name}'")
                            };
                        }
                    }
                    (_, KeyCode::Enter) if state.tab == TAB_HISTORY => {
                        if state.selected_record().is_some() {
                            state.history_detail_view = !state.history_detail_view;
                            state.history_detail_scroll = 0;
                        }
                    }
                    (_, KeyCode::Esc) if state.tab == TAB_HISTORY => {
                        state.history_detail_view = false;
                    }
                    (_, KeyCode::Char('d')) if state.tab == TAB_HISTORY => {
                        if let Some(id) = state.selected_record().map(|r| r.id.clone()) {
                            match ctx.history.delete(&id) {
                                Ok(_) => {
                                    state.history.remove(state.history_selected);
                                    state.history_loaded_count = state.history.len();
                                    state.clamp_history_selection();
                                    state.info = "Deleted".into();
                                }
                                Err(e) => state.info = format!("Delete failed: {e}"),
                            }
                        }
                    }
                    (_, KeyCode::Char('e')) if state.tab == TAB_HISTORY => {
                        let result = ctx
                            .history
                            .load()
                            .map_err(anyhow::Error::from)
                            .and_then(|records| export::export_records_json(&records));
                        show_export_result(&mut state, "JSON", result);
                    }
                    (_, KeyCode::Char('c')) if state.tab == TAB_HISTORY => {
                        let columns = state
                            .active_prompt()
                            .map(|p| p.columns.clone())
                            .unwrap_or_default();
                        let result = ctx
                            .history
                            .load()
                            .map_err(anyhow::Error::from)
                            .and_then(|records| export::export_records_csv(&records, &columns));
                        show_export_result(&mut state, "CSV", result);
                    }
                    (_, KeyCode::Char('y')) if state.tab == TAB_HISTORY => {
                        if let Some(text) = state.selected_record().map(|r| r.response.clone()) {
                            state.info = match export::copy_to_clipboard(&text) {
                                Ok(_) => "✓ Copied reply to clipboard".into(),
                                Err(e) => format!("Clipboard copy failed: {e:#}"),
                            };
                        }
                    }
                    (_, KeyCode::Char('p')) if state.tab == TAB_HISTORY => {
                        if let Some(path) = state.last_exported_path.clone() {
                            state.info = match export::copy_to_clipboard(&path) {
                                Ok(_) => format!("✓ Copied to clipboard: {}", shorten(&path, 60)),
                                Err(e) => format!("Clipboard copy failed: {e:#}"),
                            };
                        } else {
                            state.info = "No exported file path to copy. Export a file first (e/c)".into();
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn reload_topics(state: &mut UiState) {
    let Some(path) = state.queue_source.clone() else {
        state.info = "No topic file given (--topics FILE)".into();
        return;
    };
    match crate::cli::load_topics(&path) {
        Ok(queue) => {
            state.info = format!("Loaded {} topic(s) from {}", queue.len(), path.display());
            state.queue = queue;
            state.begin_run();
            state.phase = RunPhase::Idle;
        }
        Err(e) => state.info = format!("{e:#}"),
    }
}

fn reload_prompts(ctx: &AppContext, state: &mut UiState) {
    match ctx.prompts.load() {
        Ok(prompts) => {
            state.prompts = prompts;
            if state.prompt_cursor >= state.prompts.len() {
                state.prompt_cursor = state.prompts.len().saturating_sub(1);
            }
        }
        Err(e) => state.info = format!("Prompt load failed: {e}"),
    }
}

fn refresh_history(ctx: &AppContext, state: &mut UiState) {
    let reload_size = state
        .initial_history_load_size
        .max(state.history_loaded_count);
    match ctx.history.load_recent(reload_size) {
        Ok(new_history) => {
            let old_count = state.history.len();
            state.set_history(new_history);
            let new_count = state.history.len();
            state.info = if new_count > old_count {
                format!("Refreshed: {} new record(s)", new_count - old_count)
            } else if new_count < old_count {
                format!("Refreshed: {} record(s) removed", old_count - new_count)
            } else {
                "Refreshed".into()
            };
        }
        Err(e) => state.info = format!("Refresh failed: {e}"),
    }
}

fn show_export_result(state: &mut UiState, kind: &str, result: Result<std::path::PathBuf>) {
    match result {
        Ok(p) => {
            state.last_exported_path = Some(p.to_string_lossy().to_string());
            state.info = format!("Exported {kind}: {} (press 'p' to copy path)", p.display());
        }
        Err(e) => state.info = format!("{kind} export failed: {e:#}"),
    }
}

fn handle_run_finished(ctx: &AppContext, state: &mut UiState, outcome: RunOutcome) {
    let columns = state
        .active_prompt()
        .map(|p| p.columns.clone())
        .unwrap_or_default();
    let reload_size =
        (state.history_loaded_count + outcome.cursor).max(state.initial_history_load_size);
    let processed = orchestrator::process_run_completion(
        &ExportTargets::default(),
        &ctx.history,
        Some(reload_size),
        &columns,
        &state.run_records,
        &outcome,
    );

    if let Some(unsaved) = outcome.unsaved.as_ref() {
        state.log(format!("Unsaved reply for {}:", unsaved.prompt));
        for line in unsaved.response.lines() {
            state.log(line.to_string());
        }
    }
    state.finish_run(outcome);
    state.set_history(processed.history);
    if state.tab == TAB_HISTORY {
        state.history_selected = 0;
        state.history_scroll_offset = 0;
    }
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Run"),
        Line::from("History"),
        Line::from("Prompts"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("promptdeck"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_RUN => draw_run(chunks[1], f, state),
        TAB_HISTORY => draw_history(chunks[1], f, state),
        TAB_PROMPTS => draw_prompts(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn phase_style(phase: RunPhase) -> (&'static str, Color) {
    match phase {
        RunPhase::Idle => ("idle", Color::Gray),
        RunPhase::Running => ("running", Color::Yellow),
        RunPhase::Completed => ("completed", Color::Green),
        RunPhase::Cancelled => ("stopped", Color::Gray),
        RunPhase::Failed => ("failed", Color::Red),
    }
}

fn draw_run(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // Progress gauge
                Constraint::Min(0),    // Queue + run log (side-by-side)
                Constraint::Length(6), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(state.progress.ratio().clamp(0.0, 1.0))
        .label(format!("{}/{}", state.progress.cursor, state.progress.total));
    f.render_widget(gauge, main[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
        .split(main[1]);

    let current_id = state.progress.current_topic.as_ref().map(|t| t.id);
    let queue_lines: Vec<Line> = state
        .queue
        .iter()
        .map(|t| {
            let (marker, color) = if state.completed_ids.contains(&t.id) {
                ("✓", Color::Green)
            } else if state.is_running() && current_id == Some(t.id) {
                ("▶", Color::Yellow)
            } else {
                ("·", Color::Gray)
            };
            Line::from(vec![
                Span::styled(format!("{marker} "), Style::default().fg(color)),
                Span::styled(format!("{:>3} ", t.id), Style::default().fg(Color::Gray)),
                Span::raw(t.label()),
            ])
        })
        .collect();
    let queue_title = match state.queue_source.as_ref().and_then(|p| p.file_name()) {
        Some(name) => format!("Queue ({}) - {}", state.queue.len(), name.to_string_lossy()),
        None => format!("Queue ({})", state.queue.len()),
    };
    // Keep the running topic in view.
    let queue_rows = body[0].height.saturating_sub(2) as usize;
    let queue_scroll = state.progress.cursor.saturating_sub(queue_rows / 2) as u16;
    let queue = Paragraph::new(queue_lines)
        .scroll((queue_scroll, 0))
        .block(Block::default().borders(Borders::ALL).title(queue_title));
    f.render_widget(queue, body[0]);

    let log_rows = body[1].height.saturating_sub(2) as usize;
    let start = state.run_log.len().saturating_sub(log_rows);
    let log_lines: Vec<Line> = state.run_log[start..]
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    let log = Paragraph::new(log_lines)
        .block(Block::default().borders(Borders::ALL).title("Run log"));
    f.render_widget(log, body[1]);

    let (phase_label, phase_color) = phase_style(state.phase);
    let mut status: Vec<Line<'static>> = Vec::new();
    status.push(Line::from(vec![
        Span::styled("Phase:", Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(phase_label, Style::default().fg(phase_color)),
        Span::raw("   "),
        Span::styled("s", Style::default().fg(Color::Magenta)),
        Span::raw(": start  "),
        Span::styled("x", Style::default().fg(Color::Magenta)),
        Span::raw(": stop  "),
        Span::styled("l", Style::default().fg(Color::Magenta)),
        Span::raw(": reload topics"),
    ]));
    let template = match state.active_prompt() {
        Some(p) if p.columns.is_empty() => {
            format!("{} ({})", p.name, p.response_format.as_str())
        }
        Some(p) => format!(
            "{} ({}: {})",
            p.name,
            p.response_format.as_str(),
            p.columns.join(", ")
        ),
        None => "none".to_string(),
    };
    state::push_wrapped_status_kv(&mut status, "Template", &template, main[2].width);
    state::push_wrapped_status_kv(&mut status, "Info", &state.info, main[2].width);
    let p = Paragraph::new(status).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, main[2]);
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    if state.history_detail_view {
        if let Some(r) = state.selected_record() {
            let mut lines = vec![
                Line::from(vec![
                    Span::styled("Time:   ", Style::default().fg(Color::Gray)),
                    Span::raw(r.timestamp.clone()),
                ]),
                Line::from(vec![
                    Span::styled("Prompt: ", Style::default().fg(Color::Gray)),
                    Span::raw(r.prompt.clone()),
                ]),
                Line::from(""),
            ];
            lines.extend(r.response.lines().map(|l| Line::from(l.to_string())));
            let p = Paragraph::new(lines)
                .wrap(Wrap { trim: false })
                .scroll((state.history_detail_scroll.min(u16::MAX as usize) as u16, 0))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title("Reply (enter/esc: back, j/k: scroll, y: copy)"),
                );
            f.render_widget(p, area);
            return;
        }
    }

    let mut lines: Vec<Line> = Vec::new();
    let max_items = (area.height as usize).saturating_sub(HISTORY_CHROME_ROWS as usize - 3);

    let total_count = state.history.len();
    let current_pos = if total_count > 0 {
        state.history_selected + 1
    } else {
        0
    };

    lines.push(Line::from(vec![
        Span::raw(format!("History ({current_pos}/{total_count}) - ")),
        Span::styled("↑/↓/j/k", Style::default().fg(Color::Magenta)),
        Span::raw(": navigate, "),
        Span::styled("enter", Style::default().fg(Color::Magenta)),
        Span::raw(": view, "),
        Span::styled("d", Style::default().fg(Color::Magenta)),
        Span::raw(": delete, "),
        Span::styled("e", Style::default().fg(Color::Magenta)),
        Span::raw(": export JSON, "),
        Span::styled("c", Style::default().fg(Color::Magenta)),
        Span::raw(": export CSV"),
    ]));
    if !state.info.is_empty() {
        lines.push(Line::from(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Cyan),
        )));
    }

    let width = area.width.saturating_sub(4) as usize;
    for (i, r) in state
        .history
        .iter()
        .enumerate()
        .skip(state.history_scroll_offset)
        .take(max_items)
    {
        let head = format!("{}  {}  ", r.timestamp, r.prompt);
        let room = width.saturating_sub(head.chars().count());
        let text = format!("{head}{}", crate::cli::preview(&r.response, room.max(1)));
        let style = if i == state.history_selected {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(text, style)));
    }
    if state.history.is_empty() {
        lines.push(Line::from(Span::styled(
            "No saved replies yet.",
            Style::default().fg(Color::Gray),
        )));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History"));
    f.render_widget(p, area);
}

fn draw_prompts(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)].as_ref())
        .split(area);

    let active_id = state.active_prompt().map(|p| p.id.clone());
    let list: Vec<Line> = state
        .prompts
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let marker = if active_id.as_deref() == Some(p.id.as_str()) {
                "* "
            } else {
                "  "
            };
            let style = if i == state.prompt_cursor {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Line::from(Span::styled(format!("{marker}{}", p.name), style))
        })
        .collect();
    let p = Paragraph::new(list).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Templates (enter: use, r: reload)"),
    );
    f.render_widget(p, cols[0]);

    let mut detail: Vec<Line> = Vec::new();
    if let Some(p) = state.prompts.get(state.prompt_cursor) {
        let gray = Style::default().fg(Color::Gray);
        detail.push(Line::from(vec![
            Span::styled("Id:      ", gray),
            Span::raw(p.id.clone()),
        ]));
        detail.push(Line::from(vec![
            Span::styled("Format:  ", gray),
            Span::raw(p.response_format.as_str()),
        ]));
        if !p.columns.is_empty() {
            detail.push(Line::from(vec![
                Span::styled("Columns: ", gray),
                Span::raw(p.columns.join(", ")),
            ]));
        }
        if let Some(ms) = p.updated_at {
            detail.push(Line::from(vec![
                Span::styled("Updated: ", gray),
                Span::raw(format_millis(ms)),
            ]));
        }
        detail.push(Line::from(""));
        detail.extend(p.content.lines().map(|l| Line::from(l.to_string())));
    } else {
        detail.push(Line::from("No templates. Add one with `promptdeck prompts add`."));
    }
    let d = Paragraph::new(detail)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Template"));
    f.render_widget(d, cols[1]);
}

fn format_millis(ms: i64) -> String {
    let nanos = i128::from(ms) * 1_000_000;
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|t| {
            t.format(time::macros::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
            ))
            .ok()
        })
        .unwrap_or_else(|| ms.to_string())
}
