use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Paragraph},
};

use crate::app::{ButtonStates, Command, DetectionMode, Status, StatusKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Quit,
}

pub fn map_key(key: &KeyEvent) -> Option<Input> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Input::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(Input::Quit),
        KeyCode::Char('s') => Some(Input::Command(Command::StartCamera)),
        KeyCode::Char('f') => Some(Input::Command(Command::SelectMode(DetectionMode::Face))),
        KeyCode::Char('p') => Some(Input::Command(Command::SelectMode(DetectionMode::Pose))),
        _ => None,
    }
}

/// Waits up to `timeout` for key presses, returning the mapped inputs.
pub fn poll_inputs(timeout: Duration) -> Result<Vec<Input>> {
    let mut inputs = Vec::new();
    let mut wait = timeout;
    while event::poll(wait)? {
        if let Event::Key(key) = event::read()? {
            inputs.extend(map_key(&key));
        }
        wait = Duration::ZERO;
    }
    Ok(inputs)
}

fn button<'a>(key: &'a str, label: &'a str, enabled: bool, active: bool) -> Span<'a> {
    let style = if !enabled {
        Style::new().fg(Color::DarkGray)
    } else if active {
        Style::new()
            .fg(Color::Black)
            .bg(Color::Green)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::new().fg(Color::White)
    };
    Span::styled(format!(" [{key}] {label} "), style)
}

fn status_style(kind: StatusKind) -> Style {
    match kind {
        StatusKind::Normal => Style::new(),
        StatusKind::Loading => Style::new().fg(Color::Yellow),
        StatusKind::Error => Style::new().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

pub fn render(frame: &mut Frame, buttons: ButtonStates, status: &Status) {
    let [controls, status_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Length(3)]).areas(frame.area());

    let face_label = if buttons.face_active {
        "Stop face"
    } else {
        "Face"
    };
    let pose_label = if buttons.pose_active {
        "Stop pose"
    } else {
        "Pose"
    };
    let controls_line = Line::from(vec![
        button("s", "Start camera", buttons.start_enabled, false),
        button("f", face_label, buttons.face_enabled, buttons.face_active),
        button("p", pose_label, buttons.pose_enabled, buttons.pose_active),
        button("q", "Quit", true, false),
    ]);
    frame.render_widget(
        Paragraph::new(controls_line).block(Block::bordered().title(" posemo ".bold())),
        controls,
    );

    frame.render_widget(
        Paragraph::new(Span::styled(status.message.as_str(), status_style(status.kind)))
            .block(Block::bordered().title(" status ")),
        status_area,
    );
}
