//! Commands sent from a GUI (or any driver) to an engine.
//!
//! Both directions are supported: engines parse incoming lines with
//! [`GuiCommand::parse`], drivers format outgoing lines with
//! [`GuiCommand::to_uci`].

use crate::UciError;
use std::fmt;

/// Commands sent from GUI to engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    /// Initialize UCI mode.
    Uci,
    /// Check if engine is ready.
    IsReady,
    /// The next position belongs to a different game.
    UciNewGame,
    /// Set up position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    /// Start calculating.
    Go(GoOptions),
    /// Stop calculating.
    Stop,
    /// Quit the engine.
    Quit,
    /// Unknown command (for forward compatibility).
    Unknown(String),
}

/// Options for the `go` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoOptions {
    /// Search to this depth.
    pub depth: Option<u32>,
    /// Search for exactly this time in milliseconds.
    pub movetime: Option<u64>,
    /// Search at most this many nodes.
    pub nodes: Option<u64>,
    /// White time remaining in milliseconds.
    pub wtime: Option<u64>,
    /// Black time remaining in milliseconds.
    pub btime: Option<u64>,
    /// Search indefinitely until `stop`.
    pub infinite: bool,
}

impl GoOptions {
    /// Options for `go infinite`.
    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    /// Format the option list that follows `go`.
    ///
    /// `infinite` wins over every bound, matching how engines treat it.
    fn write_args(&self, out: &mut String) {
        if self.infinite {
            out.push_str(" infinite");
            return;
        }
        if let Some(d) = self.depth {
            out.push_str(&format!(" depth {}", d));
        }
        if let Some(ms) = self.movetime {
            out.push_str(&format!(" movetime {}", ms));
        }
        if let Some(n) = self.nodes {
            out.push_str(&format!(" nodes {}", n));
        }
        if let Some(t) = self.wtime {
            out.push_str(&format!(" wtime {}", t));
        }
        if let Some(t) = self.btime {
            out.push_str(&format!(" btime {}", t));
        }
    }
}

impl GuiCommand {
    /// Parse a UCI command string.
    pub fn parse(input: &str) -> Result<Self, UciError> {
        let input = input.trim();
        let mut parts = input.split_whitespace();

        let cmd = parts.next().unwrap_or("");

        match cmd {
            "uci" => Ok(GuiCommand::Uci),
            "isready" => Ok(GuiCommand::IsReady),
            "ucinewgame" => Ok(GuiCommand::UciNewGame),
            "stop" => Ok(GuiCommand::Stop),
            "quit" => Ok(GuiCommand::Quit),
            "position" => Self::parse_position(parts),
            "go" => Ok(GuiCommand::Go(Self::parse_go(parts))),
            _ => Ok(GuiCommand::Unknown(input.to_string())),
        }
    }

    /// Format the command as a single protocol line (without newline).
    pub fn to_uci(&self) -> String {
        match self {
            GuiCommand::Uci => "uci".to_string(),
            GuiCommand::IsReady => "isready".to_string(),
            GuiCommand::UciNewGame => "ucinewgame".to_string(),
            GuiCommand::Position { fen, moves } => {
                let mut line = match fen {
                    Some(f) => format!("position fen {}", f),
                    None => "position startpos".to_string(),
                };
                if !moves.is_empty() {
                    line.push_str(" moves ");
                    line.push_str(&moves.join(" "));
                }
                line
            }
            GuiCommand::Go(opts) => {
                let mut line = "go".to_string();
                opts.write_args(&mut line);
                line
            }
            GuiCommand::Stop => "stop".to_string(),
            GuiCommand::Quit => "quit".to_string(),
            GuiCommand::Unknown(raw) => raw.clone(),
        }
    }

    fn parse_position<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Self, UciError> {
        let fen = match parts.next() {
            Some("startpos") => None,
            Some("fen") => {
                let fen_parts: Vec<&str> = parts.by_ref().take_while(|p| *p != "moves").collect();
                if fen_parts.is_empty() {
                    return Err(UciError::ParseError("Empty FEN".to_string()));
                }
                Some(fen_parts.join(" "))
            }
            Some(other) => {
                return Err(UciError::ParseError(format!(
                    "Expected 'startpos' or 'fen', got '{}'",
                    other
                )));
            }
            None => {
                return Err(UciError::ParseError(
                    "Expected 'startpos' or 'fen'".to_string(),
                ));
            }
        };

        // For FEN the `moves` keyword was consumed by take_while.
        let moves = if fen.is_some() {
            parts.map(str::to_string).collect()
        } else {
            parts
                .skip_while(|p| *p != "moves")
                .skip(1)
                .map(str::to_string)
                .collect()
        };

        Ok(GuiCommand::Position { fen, moves })
    }

    fn parse_go<'a>(mut parts: impl Iterator<Item = &'a str>) -> GoOptions {
        let mut opts = GoOptions::default();

        while let Some(token) = parts.next() {
            match token {
                "infinite" => opts.infinite = true,
                "depth" => opts.depth = parts.next().and_then(|v| v.parse().ok()),
                "movetime" => opts.movetime = parts.next().and_then(|v| v.parse().ok()),
                "nodes" => opts.nodes = parts.next().and_then(|v| v.parse().ok()),
                "wtime" => opts.wtime = parts.next().and_then(|v| v.parse().ok()),
                "btime" => opts.btime = parts.next().and_then(|v| v.parse().ok()),
                // Options we do not model still carry a value.
                "winc" | "binc" | "movestogo" | "mate" => {
                    parts.next();
                }
                _ => {}
            }
        }

        opts
    }
}

impl fmt::Display for GuiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uci())
    }
}
