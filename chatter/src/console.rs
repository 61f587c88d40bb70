//! Line-oriented terminal front end.
//!
//! Turns stdin lines into [`Input`]s and renders [`SessionEvent`]s as text.
//! Rendering goes through any [`Write`] so it can be tested against a
//! buffer.

use std::io::{self, Write};

use chatter_proto::message::Roster;

use crate::session::{ChatLine, SessionEvent, SessionState};

/// Timestamp format for chat lines.
const TIMESTAMP_FORMAT: &str = "%H:%M";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Send this text as a chat message.
    Chat(String),
    /// `/leave`: disconnect from the server.
    Leave,
    /// `/join`: connect again with the command-line settings.
    Join,
    /// `/who`: print the roster.
    Who,
    /// `/quit`: leave and exit.
    Quit,
    /// A slash command nobody knows.
    Unknown(String),
    /// Blank line.
    Empty,
}

impl Input {
    /// Parses a line from stdin. Lines starting with `/` are commands;
    /// `//` escapes a chat line that starts with a slash.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Empty;
        }
        if let Some(escaped) = line.strip_prefix("//") {
            return Self::Chat(format!("/{escaped}"));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Chat(line.to_string());
        };
        match command.trim() {
            "leave" => Self::Leave,
            "join" => Self::Join,
            "who" => Self::Who,
            "quit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Renders session activity to a writer and tracks what the user sees.
#[derive(Debug)]
pub struct Console<W: Write> {
    out: W,
    state: SessionState,
    roster: Roster,
}

impl<W: Write> Console<W> {
    /// Creates a console writing to `out`.
    pub const fn new(out: W) -> Self {
        Self {
            out,
            state: SessionState::Disconnected,
            roster: Vec::new(),
        }
    }

    /// Last reported connection status.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Last reported roster.
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Renders one session event.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::StatusChanged(state) => {
                self.state = *state;
                self.notice(&format!("{state}"))
            }
            SessionEvent::RosterChanged(roster) => {
                let joined: Vec<&String> =
                    roster.iter().filter(|n| !self.roster.contains(n)).collect();
                let left: Vec<&String> =
                    self.roster.iter().filter(|n| !roster.contains(n)).collect();
                let lines: Vec<String> = joined
                    .iter()
                    .map(|n| format!("{n} joined"))
                    .chain(left.iter().map(|n| format!("{n} left")))
                    .collect();
                self.roster.clone_from(roster);
                for line in lines {
                    self.notice(&line)?;
                }
                Ok(())
            }
            SessionEvent::ChatReceived(line) => self.chat(line),
            SessionEvent::ConnectFailed(failure) => {
                self.notice(&format!("could not join: {failure}"))
            }
            SessionEvent::CommandIgnored { command, state } => {
                self.notice(&format!("cannot {command} while {state}"))
            }
            SessionEvent::Stopped => self.notice("bye"),
        }
    }

    /// Prints the roster in join order.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn print_roster(&mut self) -> io::Result<()> {
        if self.roster.is_empty() {
            return self.notice("nobody here");
        }
        let names = self.roster.join(", ");
        self.notice(&format!("members: {names}"))
    }

    /// Prints a system notice.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "* {text}")?;
        self.out.flush()
    }

    fn chat(&mut self, line: &ChatLine) -> io::Result<()> {
        writeln!(
            self.out,
            "[{}] {}: {}",
            line.received_at.format(TIMESTAMP_FORMAT),
            line.sender,
            line.body
        )?;
        self.out.flush()
    }
}
