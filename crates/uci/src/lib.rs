//! UCI (Universal Chess Interface) protocol codec.
//!
//! This crate provides types, parsing and formatting for the UCI protocol
//! on both ends of the pipe: an engine reads [`GuiCommand`]s and writes
//! [`EngineMessage`]s, a driver does the opposite.
//!
//! # Commands (driver to engine)
//!
//! - `uci` - Initialize engine, get id and options
//! - `isready` / `readyok` - Synchronization
//! - `ucinewgame` - Next position is from a different game
//! - `position fen <fen> [moves <move>...]` - Set position
//! - `go [infinite] [depth <d>] [movetime <ms>]` - Start search
//! - `stop` - Stop search
//! - `quit` - Exit engine
//!
//! # Messages (engine to driver)
//!
//! - `id name <name>` / `id author <author>`
//! - `uciok`, `readyok`
//! - `info ...` - Search progress, see [`EngineInfo`]
//! - `bestmove <move> [ponder <move>]`

mod command;
mod info;

pub use command::{GoOptions, GuiCommand};
pub use info::{EngineInfo, InfoBuilder, Score};

use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification.
    Id { name: Option<String>, author: Option<String> },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information.
    Info(EngineInfo),
    /// Best move found.
    BestMove { mv: String, ponder: Option<String> },
}

impl EngineMessage {
    /// Format message for output.
    pub fn to_uci(&self) -> String {
        match self {
            EngineMessage::Id { name, author } => {
                let mut parts = Vec::new();
                if let Some(n) = name {
                    parts.push(format!("id name {}", n));
                }
                if let Some(a) = author {
                    parts.push(format!("id author {}", a));
                }
                parts.join("\n")
            }
            EngineMessage::UciOk => "uciok".to_string(),
            EngineMessage::ReadyOk => "readyok".to_string(),
            EngineMessage::Info(info) => info.to_uci(),
            EngineMessage::BestMove { mv, ponder } => match ponder {
                Some(p) => format!("bestmove {} ponder {}", mv, p),
                None => format!("bestmove {}", mv),
            },
        }
    }

    /// Parse one line of engine output.
    ///
    /// Returns `None` for lines that are not part of the protocol subset we
    /// understand (`option ...`, banners, malformed `bestmove`).
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));

        match head {
            "uciok" => Some(EngineMessage::UciOk),
            "readyok" => Some(EngineMessage::ReadyOk),
            "info" => EngineInfo::parse(line).map(EngineMessage::Info),
            "id" => {
                let (key, value) = rest.trim().split_once(' ')?;
                let value = Some(value.trim().to_string());
                match key {
                    "name" => Some(EngineMessage::Id {
                        name: value,
                        author: None,
                    }),
                    "author" => Some(EngineMessage::Id {
                        name: None,
                        author: value,
                    }),
                    _ => None,
                }
            }
            "bestmove" => {
                let mut parts = rest.split_whitespace();
                let mv = parts.next()?.to_string();
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                Some(EngineMessage::BestMove { mv, ponder })
            }
            _ => None,
        }
    }
}

/// Reads driver commands line by line.
pub struct UciReader<R: BufRead> {
    reader: R,
}

impl<R: BufRead> UciReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read and parse the next command.
    ///
    /// Returns `Ok(None)` once the input is closed.
    pub fn read_command(&mut self) -> Result<Option<GuiCommand>, UciError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        GuiCommand::parse(&line).map(Some)
    }
}

/// Writes protocol lines and flushes after each one.
pub struct UciWriter<W: Write> {
    writer: W,
}

impl<W: Write> UciWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a raw protocol line.
    pub fn send_line(&mut self, line: &str) -> Result<(), UciError> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Send a command to an engine.
    pub fn send_command(&mut self, cmd: &GuiCommand) -> Result<(), UciError> {
        self.send_line(&cmd.to_uci())
    }

    /// Send a message to a GUI.
    pub fn send(&mut self, msg: &EngineMessage) -> Result<(), UciError> {
        self.send_line(&msg.to_uci())
    }

    /// Send engine identification.
    pub fn send_id(&mut self, name: &str, author: &str) -> Result<(), UciError> {
        self.send(&EngineMessage::Id {
            name: Some(name.to_string()),
            author: Some(author.to_string()),
        })
    }

    /// Send uciok.
    pub fn send_uciok(&mut self) -> Result<(), UciError> {
        self.send(&EngineMessage::UciOk)
    }

    /// Send readyok.
    pub fn send_readyok(&mut self) -> Result<(), UciError> {
        self.send(&EngineMessage::ReadyOk)
    }

    /// Send best move.
    pub fn send_bestmove(&mut self, mv: &str) -> Result<(), UciError> {
        self.send(&EngineMessage::BestMove {
            mv: mv.to_string(),
            ponder: None,
        })
    }

    /// Send search info.
    pub fn send_info(&mut self, info: EngineInfo) -> Result<(), UciError> {
        self.send(&EngineMessage::Info(info))
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reader over stdin for engine binaries.
pub fn stdin_reader() -> UciReader<std::io::BufReader<std::io::Stdin>> {
    UciReader::new(std::io::BufReader::new(std::io::stdin()))
}

/// Writer over stdout for engine binaries.
pub fn stdout_writer() -> UciWriter<std::io::Stdout> {
    UciWriter::new(std::io::stdout())
}
