//! Search requests and progress snapshots.

use crate::search::{MATE_SCORE, MATE_THRESHOLD};
use crate::Move;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uci::{EngineInfo, Score};

/// Bounds for one analysis run.
///
/// Zero means "no bound" for every numeric field. `infinite` keeps the
/// search going until it is stopped explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Deepest iteration to complete, in plies.
    pub max_depth: u32,
    /// Wall-clock budget in milliseconds.
    pub max_time_ms: u64,
    /// Node budget across all iterations.
    pub max_nodes: u64,
    /// Ignore the other bounds and run until stopped.
    pub infinite: bool,
}

impl SearchParams {
    pub fn depth(depth: u32) -> Self {
        Self {
            max_depth: depth,
            ..Self::default()
        }
    }

    pub fn movetime(ms: u64) -> Self {
        Self {
            max_time_ms: ms,
            ..Self::default()
        }
    }

    pub fn nodes(nodes: u64) -> Self {
        Self {
            max_nodes: nodes,
            ..Self::default()
        }
    }

    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    /// True when nothing bounds the search and it is not infinite either.
    pub fn is_unbounded(&self) -> bool {
        !self.infinite && self.max_depth == 0 && self.max_time_ms == 0 && self.max_nodes == 0
    }

    /// Time budget for an analysis level.
    pub fn for_level(level: AnalysisLevel) -> Self {
        match level {
            AnalysisLevel::One | AnalysisLevel::Two => Self::movetime(2000),
            AnalysisLevel::Three | AnalysisLevel::Four => Self::movetime(3000),
            AnalysisLevel::Five | AnalysisLevel::Six => Self::movetime(6000),
            AnalysisLevel::Seven => Self::movetime(10_000),
        }
    }
}

/// Coarse strength presets offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisLevel {
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
}

impl AnalysisLevel {
    /// Level from its 1-based number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            _ => None,
        }
    }
}

/// A progress snapshot published by an analysis engine.
///
/// Scores are in centipawns from the side to move's point of view.
/// `mate_in` counts plies: positive when the side to move delivers mate,
/// negative when it gets mated, zero when no mate was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisInfo {
    /// Depth of the iteration this snapshot reports, zero for a terminal
    /// root or a search stopped before its first iteration.
    pub depth: u32,
    /// Time since the search started, in milliseconds.
    pub time_ms: u64,
    /// Nodes searched so far.
    pub nodes: u64,
    /// Nodes per second.
    pub nps: u64,
    /// Evaluation in centipawns.
    pub score_cp: i32,
    /// Signed distance to mate in plies, 0 when none was found.
    pub mate_in: i32,
    /// Principal variation, starting with the best move.
    pub pv: Vec<Move>,
    /// Best move found, or `None` when the root has no legal moves.
    pub best_move: Option<Move>,
    /// Raw UCI tokens of the principal variation, kept even when a token
    /// cannot be resolved against the board.
    pub uci_pv: Vec<String>,
}

impl AnalysisInfo {
    /// Convert to a UCI `info` line payload.
    pub fn to_engine_info(&self) -> EngineInfo {
        let score = if self.mate_in != 0 {
            Score::Mate(mate_plies_to_moves(self.mate_in))
        } else {
            Score::Cp(self.score_cp)
        };
        let pv = if self.uci_pv.is_empty() {
            self.pv.iter().map(Move::to_uci).collect()
        } else {
            self.uci_pv.clone()
        };
        EngineInfo {
            depth: Some(self.depth),
            score: Some(score),
            nodes: Some(self.nodes),
            nps: Some(self.nps),
            time: Some(self.time_ms),
            pv,
            ..EngineInfo::default()
        }
    }
}

/// Nodes per second, or the raw node count when no measurable time passed.
pub fn nodes_per_second(nodes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs < 1e-6 {
        nodes
    } else {
        (nodes as f64 / secs) as u64
    }
}

/// Signed mate distance in plies for a search score, or 0.
pub fn mate_in_plies(score: i32) -> i32 {
    if score.abs() >= MATE_THRESHOLD {
        score.signum() * (MATE_SCORE - score.abs())
    } else {
        0
    }
}

/// Plies to full moves as UCI reports them (`mate 1` is one ply).
pub fn mate_plies_to_moves(plies: i32) -> i32 {
    plies.signum() * ((plies.abs() + 1) / 2)
}

/// UCI `mate N` to plies. A mate given by the side to move takes an odd
/// number of plies, a mate suffered takes an even number.
pub fn mate_moves_to_plies(moves: i32) -> i32 {
    if moves > 0 {
        2 * moves - 1
    } else {
        2 * moves
    }
}
