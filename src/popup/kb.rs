//! Knowledge base popups: the explorer and the issue resolver.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use std::time::Duration;

use super::{init_terminal, restore_terminal, ApiClient};
use crate::kb::{KbIssue, KbStatement};

/// `_kb-explorer`: search box over the knowledge base with a detail pane.
pub async fn run_explorer(port: u16) -> Result<()> {
    let client = ApiClient::new(port);
    let mut query = String::new();
    let mut results: Vec<KbStatement> = client.kb_query("").await.unwrap_or_default();
    let mut selected = 0usize;
    let mut error: Option<String> = None;

    let mut terminal = init_terminal()?;
    let result = async {
        loop {
            terminal.draw(|f| draw_explorer(f, &query, &results, selected, error.as_deref()))?;
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Esc => return Ok(()),
                        KeyCode::Up => selected = selected.saturating_sub(1),
                        KeyCode::Down if !results.is_empty() => {
                            selected = (selected + 1).min(results.len() - 1)
                        }
                        KeyCode::Backspace => {
                            query.pop();
                        }
                        KeyCode::Enter => {
                            match client.kb_query(&query).await {
                                Ok(hits) => {
                                    results = hits;
                                    selected = 0;
                                    error = None;
                                }
                                Err(e) => error = Some(format!("{:#}", e)),
                            }
                        }
                        KeyCode::Char(c) => query.push(c),
                        _ => {}
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    }
    .await;
    restore_terminal(&mut terminal);
    result
}

fn draw_explorer(
    f: &mut ratatui::Frame,
    query: &str,
    results: &[KbStatement],
    selected: usize,
    error: Option<&str>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(6),
        ])
        .split(f.area());

    let search = Paragraph::new(query.to_string())
        .block(Block::default().borders(Borders::ALL).title(" search (enter) "));
    f.render_widget(search, chunks[0]);

    let items: Vec<ListItem> = results
        .iter()
        .map(|s| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("×{} ", s.touch_count),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(s.statement.as_str()),
            ]))
        })
        .collect();
    let mut state = ListState::default();
    state.select((!results.is_empty()).then_some(selected));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" statements "))
        .highlight_style(Style::default().bg(Color::DarkGray));
    f.render_stateful_widget(list, chunks[1], &mut state);

    let detail = match (error, results.get(selected)) {
        (Some(e), _) => Line::from(Span::styled(e.to_string(), Style::default().fg(Color::Red))),
        (None, Some(s)) => Line::from(format!(
            "{}  source: {}  touched: {}",
            s.id,
            s.source,
            s.touched_at.format("%Y-%m-%d %H:%M")
        )),
        (None, None) => Line::from("no statements"),
    };
    f.render_widget(
        Paragraph::new(detail)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(" detail ")),
        chunks[2],
    );
}

/// `_issue-resolver`: open knowledge issues; Enter resolves one.
pub async fn run_issues(port: u16) -> Result<()> {
    let client = ApiClient::new(port);
    let mut issues: Vec<KbIssue> = client.kb_issues().await?;
    let mut selected = 0usize;

    let mut terminal = init_terminal()?;
    let result = async {
        loop {
            terminal.draw(|f| draw_issues(f, &issues, selected))?;
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Esc | KeyCode::Char('q') => return Ok(()),
                        KeyCode::Up => selected = selected.saturating_sub(1),
                        KeyCode::Down if !issues.is_empty() => {
                            selected = (selected + 1).min(issues.len() - 1)
                        }
                        KeyCode::Enter => {
                            if let Some(issue) = issues.get(selected) {
                                if !issue.resolved {
                                    client.resolve_issue(issue.id).await?;
                                    issues = client.kb_issues().await?;
                                    selected = selected.min(issues.len().saturating_sub(1));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    }
    .await;
    restore_terminal(&mut terminal);
    result
}

fn draw_issues(f: &mut ratatui::Frame, issues: &[KbIssue], selected: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length(6),
            Constraint::Length(1),
        ])
        .split(f.area());

    let items: Vec<ListItem> = issues
        .iter()
        .map(|i| {
            let style = if i.resolved {
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(i.title.clone(), style)))
        })
        .collect();
    let mut state = ListState::default();
    state.select((!issues.is_empty()).then_some(selected));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" issues "))
        .highlight_style(Style::default().bg(Color::DarkGray));
    f.render_stateful_widget(list, chunks[0], &mut state);

    let detail = issues
        .get(selected)
        .map(|i| i.detail.clone())
        .unwrap_or_else(|| "no issues".to_string());
    f.render_widget(
        Paragraph::new(detail)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(" detail ")),
        chunks[1],
    );
    f.render_widget(
        Paragraph::new(Line::from("enter resolve  esc close")),
        chunks[2],
    );
}
