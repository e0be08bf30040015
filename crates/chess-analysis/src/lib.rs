//! Chess position analysis engines.
//!
//! Two engines implement one contract, [`AnalysisEngine`]:
//!
//! - [`LocalEngine`] - in-process iterative-deepening alpha-beta search
//!   with quiescence and a transposition table
//! - [`ExternalEngine`] - adapter driving a UCI engine subprocess such as
//!   Stockfish
//!
//! Both run one search at a time in the background and publish an
//! [`AnalysisInfo`] snapshot per completed iteration, readable with
//! [`AnalysisEngine::best_now`] and streamed to subscribers.
//!
//! # Example
//!
//! ```no_run
//! use chess_analysis::{AnalysisEngine, LocalEngine, SearchParams};
//!
//! let engine = LocalEngine::default();
//! engine.set_position_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1")?;
//! engine.start_analysis(SearchParams::depth(4))?;
//! let info = engine.wait_done()?;
//! println!("best {:?}, mate in {} plies", info.best_move, info.mate_in);
//! # Ok::<(), chess_analysis::EngineError>(())
//! ```

pub mod board;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod external;
pub mod local;
mod mov;
pub mod search;
pub mod tt;
mod types;
pub mod zobrist;

pub use board::{Board, GameStatus};
pub use config::{ConfigError, EngineConfig, ExternalConfig, LocalConfig};
pub use engine::{AnalysisEngine, EngineError, Subscription};
pub use external::ExternalEngine;
pub use local::LocalEngine;
pub use mov::Move;
pub use search::{CancelToken, MATE_SCORE, MATE_THRESHOLD, MAX_DEPTH};
pub use types::{
    mate_in_plies, mate_moves_to_plies, mate_plies_to_moves, nodes_per_second, AnalysisInfo,
    AnalysisLevel, SearchParams,
};
