//! Read-only viewer popups: the session prompt viewer and the log viewer
//! (which doubles as the window-0 dashboard in follow mode).

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use std::time::{Duration, Instant};

use super::{init_terminal, restore_terminal, ApiClient};

/// `_prompt-viewer`: show the composed system prompt for the session in
/// a window.
pub async fn run_prompt(port: u16, window: &str) -> Result<()> {
    let client = ApiClient::new(port);
    let prompt = client.prompt_for_window(window).await?;

    let mut terminal = init_terminal()?;
    let result = scroll_text(&mut terminal, " system prompt ", &prompt).await;
    restore_terminal(&mut terminal);
    result
}

async fn scroll_text(
    terminal: &mut super::PopupTerminal,
    title: &str,
    text: &str,
) -> Result<()> {
    let mut scroll: u16 = 0;
    let lines = text.lines().count() as u16;
    loop {
        terminal.draw(|f| {
            let widget = Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .scroll((scroll, 0))
                .block(Block::default().borders(Borders::ALL).title(title));
            f.render_widget(widget, f.area());
        })?;
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Esc | KeyCode::Char('q') => return Ok(()),
                    KeyCode::Up | KeyCode::Char('k') => scroll = scroll.saturating_sub(1),
                    KeyCode::Down | KeyCode::Char('j') => {
                        scroll = (scroll + 1).min(lines.saturating_sub(1))
                    }
                    KeyCode::PageUp => scroll = scroll.saturating_sub(20),
                    KeyCode::PageDown => scroll = (scroll + 20).min(lines.saturating_sub(1)),
                    _ => {}
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
}

const REFRESH: Duration = Duration::from_secs(2);

/// `_log-viewer`: tool traces and mode transitions from the daemon's
/// ring buffers. With `follow` it refreshes continuously and never exits
/// on its own — that is the dashboard window.
pub async fn run_log(port: u16, follow: bool) -> Result<()> {
    let client = ApiClient::new(port);
    let mut log = client.log().await.unwrap_or_default();
    let mut state = client.state().await.ok();
    let mut fetched = Instant::now();

    let mut terminal = init_terminal()?;
    let result = async {
        loop {
            terminal.draw(|f| draw_log(f, &log, state.as_ref()))?;
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Esc => return Ok(()),
                        KeyCode::Char('q') if !follow => return Ok(()),
                        _ => {}
                    }
                }
            }
            if follow && fetched.elapsed() >= REFRESH {
                if let Ok(fresh) = client.log().await {
                    log = fresh;
                }
                state = client.state().await.ok();
                fetched = Instant::now();
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    }
    .await;
    restore_terminal(&mut terminal);
    result
}

fn draw_log(
    f: &mut ratatui::Frame,
    log: &serde_json::Value,
    state: Option<&crate::daemon::routes::StateSnapshot>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(60),
            Constraint::Min(3),
        ])
        .split(f.area());

    let summary = match state {
        Some(s) => format!(
            "active {}  suspended {}  completed {}  ingest {}  issues {}",
            s.active.len(),
            s.suspended.len(),
            s.completed.len(),
            s.ingest_tasks,
            s.open_issues
        ),
        None => "daemon unreachable".to_string(),
    };
    f.render_widget(
        Paragraph::new(summary).block(Block::default().borders(Borders::ALL).title(" vee ")),
        chunks[0],
    );

    let traces = render_entries(log.get("traces"), |t| {
        let ok = t["ok"].as_bool().unwrap_or(false);
        let marker = if ok { "·" } else { "!" };
        let style = if ok {
            Style::default()
        } else {
            Style::default().fg(Color::Red)
        };
        Line::from(Span::styled(
            format!(
                "{} {} {} — {}",
                marker,
                short(t["session"].as_str()),
                t["tool"].as_str().unwrap_or("?"),
                t["summary"].as_str().unwrap_or(""),
            ),
            style,
        ))
    });
    f.render_widget(
        Paragraph::new(traces)
            .block(Block::default().borders(Borders::ALL).title(" tool traces ")),
        chunks[1],
    );

    let transitions = render_entries(log.get("transitions"), |t| {
        Line::from(format!(
            "{} → {} {}",
            short(t["session"].as_str()),
            t["mode"].as_str().unwrap_or("?"),
            t["indicator"].as_str().unwrap_or(""),
        ))
    });
    f.render_widget(
        Paragraph::new(transitions).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" mode transitions "),
        ),
        chunks[2],
    );
}

fn render_entries<'a>(
    entries: Option<&'a serde_json::Value>,
    render: impl Fn(&'a serde_json::Value) -> Line<'a>,
) -> Vec<Line<'a>> {
    let Some(list) = entries.and_then(|e| e.as_array()) else {
        return vec![Line::from("(empty)")];
    };
    // newest last in the buffer; show newest first
    list.iter().rev().take(100).map(render).collect()
}

fn short(id: Option<&str>) -> String {
    id.map(|s| s.chars().take(8).collect()).unwrap_or_default()
}
