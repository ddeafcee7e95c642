//! Resume menu popup
//!
//! Lists suspended sessions oldest-first; selecting one re-spawns the
//! agent in a new window with `--resume`, reusing the session id.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::time::Duration;

use super::{init_terminal, restore_terminal, ApiClient};
use crate::session::Session;

pub async fn run(port: u16) -> Result<()> {
    let client = ApiClient::new(port);
    let suspended = client.state().await?.suspended;

    let mut terminal = init_terminal()?;
    let choice = event_loop(&mut terminal, &suspended).await;
    restore_terminal(&mut terminal);

    if let Ok(Some(index)) = &choice {
        client.resume(suspended[*index].id).await?;
    }
    choice.map(|_| ())
}

async fn event_loop(
    terminal: &mut super::PopupTerminal,
    suspended: &[Session],
) -> Result<Option<usize>> {
    let mut selected = 0usize;
    loop {
        terminal.draw(|f| draw(f, suspended, selected))?;
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Esc | KeyCode::Char('q') => return Ok(None),
                    KeyCode::Up => selected = selected.saturating_sub(1),
                    KeyCode::Down if !suspended.is_empty() => {
                        selected = (selected + 1).min(suspended.len() - 1)
                    }
                    KeyCode::Enter if !suspended.is_empty() => return Ok(Some(selected)),
                    _ => {}
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
}

fn draw(f: &mut ratatui::Frame, suspended: &[Session], selected: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(f.area());

    if suspended.is_empty() {
        let empty = Paragraph::new("no suspended sessions")
            .block(Block::default().borders(Borders::ALL).title(" resume "));
        f.render_widget(empty, chunks[0]);
    } else {
        let items: Vec<ListItem> = suspended
            .iter()
            .map(|s| {
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{} ", s.indicator)),
                    Span::styled(s.profile.as_str(), Style::default().add_modifier(Modifier::BOLD)),
                    Span::raw(format!("  {}", s.started_at.format("%H:%M"))),
                    Span::styled(
                        format!("  {}", s.preview),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]))
            })
            .collect();
        let mut state = ListState::default();
        state.select(Some(selected));
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(" resume "))
            .highlight_style(Style::default().bg(Color::DarkGray));
        f.render_stateful_widget(list, chunks[0], &mut state);
    }

    f.render_widget(
        Paragraph::new(Line::from("enter resume  esc cancel")),
        chunks[1],
    );
}
