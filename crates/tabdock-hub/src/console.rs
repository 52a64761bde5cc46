//! Line-oriented stand-in for the desktop panel: stdin lines become panel
//! gestures and every rendered frame is printed as an indented tab list.

use crossbeam_channel::Sender;
use std::{
    io::{self, BufRead, Write},
    thread::{self, JoinHandle},
};
use tabdock_core::{GroupId, TabId};
use thiserror::Error;
use tracing::warn;

use crate::{
    layout::{RenderFrame, Row, ScrollPlacement},
    scheduler::Interaction,
    ui::{Panel, PanelAction},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Action(PanelAction),
    Hover(bool),
    Menu(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command}: expected {expected}")]
    MissingArgument {
        command: String,
        expected: &'static str,
    },
    #[error("{command}: not a number: {value}")]
    InvalidNumber { command: String, value: String },
    #[error("{command}: expected on|off, got {value}")]
    InvalidToggle { command: String, value: String },
}

/// Blank lines and `#` comments parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default().to_lowercase();
    let mut id = |expected: &'static str| -> Result<i64, InputError> {
        let value = parts.next().ok_or_else(|| InputError::MissingArgument {
            command: command.clone(),
            expected,
        })?;
        value.parse::<i64>().map_err(|_| InputError::InvalidNumber {
            command: command.clone(),
            value: value.to_string(),
        })
    };

    let input = match command.as_str() {
        "activate" | "a" => ConsoleInput::Action(PanelAction::Activate(id("tab id")?)),
        "close" | "x" => ConsoleInput::Action(PanelAction::Close(id("tab id")?)),
        "dup" | "duplicate" => ConsoleInput::Action(PanelAction::Duplicate(id("tab id")?)),
        "pin" => ConsoleInput::Action(PanelAction::TogglePin(id("tab id")?)),
        "others" => ConsoleInput::Action(PanelAction::CloseOthers(id("tab id")?)),
        "ungroup" => ConsoleInput::Action(PanelAction::RemoveFromGroup(id("tab id")?)),
        "group" => {
            let tab = id("tab id and group id")?;
            let group = id("tab id and group id")?;
            ConsoleInput::Action(PanelAction::AddToGroup { tab, group })
        }
        "newgroup" => ConsoleInput::Action(PanelAction::AddToNewGroup(id("tab id")?)),
        "new" => ConsoleInput::Action(PanelAction::NewTab),
        "enter" => ConsoleInput::Action(PanelAction::PanelEntered),
        "toggle" => ConsoleInput::Action(PanelAction::ToggleGroup(id("group id")?)),
        "reveal" => ConsoleInput::Action(PanelAction::RevealTab(id("tab id")?)),
        "reveal-group" => ConsoleInput::Action(PanelAction::RevealGroup(id("group id")?)),
        "hover" | "menu" => {
            let value = parts.next().ok_or_else(|| InputError::MissingArgument {
                command: command.clone(),
                expected: "on|off",
            })?;
            let on = match value.to_lowercase().as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                _ => {
                    return Err(InputError::InvalidToggle {
                        command,
                        value: value.to_string(),
                    })
                }
            };
            if command == "hover" {
                ConsoleInput::Hover(on)
            } else {
                ConsoleInput::Menu(on)
            }
        }
        _ => return Err(InputError::UnknownCommand(command)),
    };
    Ok(Some(input))
}

/// Feeds parsed lines into `tx` until the reader hits EOF. Dropping the
/// sender on EOF is what ends the UI loop.
pub fn spawn_line_reader<R>(reader: R, tx: Sender<ConsoleInput>) -> io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("tabdock-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(event = "input_read_error", error = %err);
                        return;
                    }
                };
                match parse_line(&line) {
                    Ok(Some(input)) => {
                        if tx.send(input).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(event = "input_invalid", error = %err),
                }
            }
        })
}

pub struct ConsolePanel<W: Write> {
    out: W,
    interaction: Interaction,
    viewport_height: u32,
}

impl<W: Write> ConsolePanel<W> {
    pub fn new(out: W, viewport_height: u32) -> Self {
        Self {
            out,
            interaction: Interaction::default(),
            viewport_height,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Panel for ConsolePanel<W> {
    type Input = ConsoleInput;

    fn on_input(&mut self, input: ConsoleInput) -> Option<PanelAction> {
        match input {
            ConsoleInput::Action(action) => Some(action),
            ConsoleInput::Hover(on) => {
                self.interaction.hovered = on;
                None
            }
            ConsoleInput::Menu(on) => {
                self.interaction.menu_open = on;
                None
            }
        }
    }

    fn interaction(&self) -> Interaction {
        self.interaction
    }

    fn viewport_height(&self) -> u32 {
        self.viewport_height
    }

    fn render(&mut self, frame: &RenderFrame) {
        let text = format_frame(frame);
        if let Err(err) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            warn!(event = "render_error", error = %err);
        }
    }
}

pub fn format_frame(frame: &RenderFrame) -> String {
    let mut out = format!("-- {} tabs", frame.tab_count);
    if frame.forced {
        out.push_str(" (forced)");
    }
    if let ScrollPlacement::Center { y, offset, .. } = frame.scroll {
        out.push_str(&format!(" scroll y={y} offset={offset}"));
    }
    out.push('\n');

    for row in frame.layout.rows() {
        match row {
            Row::GroupHeader {
                group_id,
                collapsed,
                tab_count,
                ..
            } => {
                let marker = if *collapsed { '+' } else { '-' };
                let (title, color) = group_label(frame, *group_id);
                out.push_str(&format!(
                    "{marker} [{group_id}] {title} ({color}, {tab_count})\n"
                ));
            }
            Row::Tab {
                tab_id,
                group_id,
                visible,
                ..
            } => {
                if !visible {
                    continue;
                }
                let indent = if group_id.is_some() { "    " } else { "  " };
                out.push_str(indent);
                out.push_str(&tab_label(frame, *tab_id));
                out.push('\n');
            }
        }
    }
    out
}

fn group_label(frame: &RenderFrame, id: GroupId) -> (String, &'static str) {
    match frame.snapshot.group(id) {
        Some(group) => (group.title.clone(), group.color.as_str()),
        None => (String::new(), "grey"),
    }
}

fn tab_label(frame: &RenderFrame, id: TabId) -> String {
    let Some(tab) = frame.snapshot.tab(id) else {
        return id.to_string();
    };
    let active = if tab.active { '*' } else { ' ' };
    let pinned = if tab.pinned { " ^" } else { "" };
    format!("{active} {} {}{pinned}", tab.id, tab.title)
}
