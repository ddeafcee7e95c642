//! Session picker popup
//!
//! Shows the profile list with a prompt editor. On Enter the choice is
//! handed to `_new-pane`, which asks the daemon to spawn the session.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::time::Duration;

use super::{init_terminal, restore_terminal, ApiClient};
use crate::profile::Profile;

struct Picker {
    profiles: Vec<Profile>,
    ephemeral_available: bool,
    selected: usize,
    input: String,
    ephemeral: bool,
}

enum Action {
    Spawn,
    Cancel,
}

pub async fn run(port: u16) -> Result<()> {
    let client = ApiClient::new(port);
    let resp = client.profiles().await?;
    let mut picker = Picker {
        profiles: resp.profiles,
        ephemeral_available: resp.ephemeral_available,
        selected: 0,
        input: String::new(),
        ephemeral: false,
    };
    if picker.profiles.is_empty() {
        anyhow::bail!("no profiles available");
    }

    let mut terminal = init_terminal()?;
    let action = event_loop(&mut terminal, &mut picker).await;
    restore_terminal(&mut terminal);

    if let Ok(Action::Spawn) = action {
        let profile = &picker.profiles[picker.selected];
        // hand off to the spawn verb; the popup itself stays thin
        let mut command = tokio::process::Command::new("vee");
        command
            .arg("_new-pane")
            .arg("--port")
            .arg(port.to_string())
            .arg("--profile")
            .arg(&profile.name)
            .arg("--prompt")
            .arg(&picker.input);
        if picker.ephemeral {
            command.arg("--ephemeral");
        }
        let status = command.status().await?;
        if !status.success() {
            anyhow::bail!("spawn handoff failed");
        }
    }
    action.map(|_| ())
}

async fn event_loop(
    terminal: &mut super::PopupTerminal,
    picker: &mut Picker,
) -> Result<Action> {
    loop {
        terminal.draw(|f| draw(f, picker))?;
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                match handle_key(picker, key) {
                    Some(action) => return Ok(action),
                    None => {}
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
}

fn handle_key(picker: &mut Picker, key: KeyEvent) -> Option<Action> {
    match (key.code, key.modifiers) {
        (KeyCode::Esc, _) => Some(Action::Cancel),
        (KeyCode::Enter, _) => Some(Action::Spawn),
        (KeyCode::Up, _) => {
            picker.selected = picker.selected.saturating_sub(1);
            None
        }
        (KeyCode::Down, _) => {
            picker.selected = (picker.selected + 1).min(picker.profiles.len() - 1);
            None
        }
        (KeyCode::Char('e'), KeyModifiers::CONTROL) => {
            if picker.ephemeral_available {
                picker.ephemeral = !picker.ephemeral;
            }
            None
        }
        (KeyCode::Backspace, _) => {
            picker.input.pop();
            None
        }
        (KeyCode::Char(c), m) if m.is_empty() || m == KeyModifiers::SHIFT => {
            picker.input.push(c);
            None
        }
        _ => None,
    }
}

fn draw(f: &mut ratatui::Frame, picker: &Picker) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    let items: Vec<ListItem> = picker
        .profiles
        .iter()
        .map(|p| {
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", p.indicator)),
                Span::styled(p.name.as_str(), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw("  "),
                Span::styled(p.description.as_str(), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let mut list_state = ListState::default();
    list_state.select(Some(picker.selected));
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" profiles "))
        .highlight_style(Style::default().bg(Color::DarkGray));
    f.render_stateful_widget(list, chunks[0], &mut list_state);

    let placeholder = picker
        .profiles
        .get(picker.selected)
        .map(|p| p.prompt_placeholder.as_str())
        .unwrap_or("");
    let prompt_line = if picker.input.is_empty() {
        Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray)))
    } else {
        Line::from(Span::raw(picker.input.as_str()))
    };
    let input = Paragraph::new(prompt_line)
        .block(Block::default().borders(Borders::ALL).title(" prompt "));
    f.render_widget(input, chunks[1]);

    let mut hints = vec![Span::raw("enter spawn  esc cancel")];
    if picker.ephemeral_available {
        let label = if picker.ephemeral {
            Span::styled("  ^e ephemeral: on", Style::default().fg(Color::Blue))
        } else {
            Span::raw("  ^e ephemeral: off")
        };
        hints.push(label);
    }
    f.render_widget(Paragraph::new(Line::from(hints)), chunks[2]);
}
