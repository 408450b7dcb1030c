use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(desc),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (waits for the current request)"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Run tab:"),
        key_line("s", 11, "Start a run over the queued topics"),
        key_line("x", 11, "Stop the run (finishes the current request first)"),
        key_line("l", 11, "Reload the topic file"),
        Line::from(""),
        Line::from("Prompts tab:"),
        key_line("↑/↓ j/k", 5, "Navigate"),
        key_line("enter", 7, "Use the highlighted template for runs"),
        key_line("r", 11, "Reload templates"),
        Line::from(""),
        Line::from("History tab:"),
        key_line("↑/↓ j/k", 5, "Navigate"),
        key_line("enter", 7, "Show or hide the full reply"),
        key_line("e", 11, "Export all as JSON"),
        key_line("c", 11, "Export all as CSV (columns of the active template)"),
        key_line("y", 11, "Copy the selected reply to clipboard"),
        key_line("p", 11, "Copy the last exported path to clipboard"),
        key_line("d", 11, "Delete selected"),
        key_line("r", 11, "Refresh history"),
        Line::from(""),
        Line::from("Topic file format:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled(
                r#"[{"id": 1, "name": "Socrates", "period": "Ancient", "topic": "introduce the philosopher"}]"#,
                Style::default().fg(Color::Cyan),
            ),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
