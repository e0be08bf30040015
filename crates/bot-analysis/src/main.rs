//! Analysis bot.
//!
//! A UCI chess bot that searches through the analysis engine contract. By
//! default the in-process alpha-beta engine does the work; `--engine
//! external` relays every search to the external engine from the config
//! file instead. The search runs in the background, so `info` lines stream
//! while it thinks and `stop` is honoured.

use anyhow::Context;
use chess_analysis::board::{apply_move, parse_fen, parse_uci_move, starting_position, Board};
use chess_analysis::{
    AnalysisEngine, EngineConfig, EngineError, ExternalEngine, LocalEngine, SearchParams,
};
use clap::{Parser, ValueEnum};
use crossbeam_channel::bounded;
use shakmaty::{Color, Position};
use std::io::Stdout;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing_subscriber::EnvFilter;
use uci::{GoOptions, GuiCommand, UciWriter};

type SharedWriter = Arc<Mutex<UciWriter<Stdout>>>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    External,
}

/// UCI chess bot backed by an analysis engine.
#[derive(Parser)]
#[command(name = "bot-analysis")]
#[command(about = "UCI chess bot backed by an analysis engine")]
struct Args {
    /// Path to the engine configuration file
    #[arg(long, default_value = "analysis.toml")]
    config: PathBuf,

    /// Which analysis engine performs the search
    #[arg(long, value_enum, default_value = "local")]
    engine: Backend,
}

fn lock(writer: &SharedWriter) -> MutexGuard<'_, UciWriter<Stdout>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the position from a `position` command.
fn build_position(fen: Option<&str>, moves: &[String]) -> Result<Board, EngineError> {
    let mut board = match fen {
        Some(f) => parse_fen(f)?,
        None => starting_position(),
    };
    for token in moves {
        let mv = parse_uci_move(token, &board)
            .ok_or_else(|| EngineError::IllegalMove(token.clone()))?;
        apply_move(&mut board, mv)?;
    }
    Ok(board)
}

/// Translate `go` options. A bare `go` leaves every bound at zero and the
/// engine falls back to its default depth.
fn search_params(opts: &GoOptions, turn: Color) -> SearchParams {
    if opts.infinite {
        return SearchParams::infinite();
    }

    let our_time = match turn {
        Color::White => opts.wtime,
        Color::Black => opts.btime,
    };
    // Use about 2.5% of remaining time
    let movetime = opts.movetime.or(our_time.map(|t| t / 40));

    SearchParams {
        max_depth: opts.depth.unwrap_or(0),
        max_time_ms: movetime.unwrap_or(0),
        max_nodes: opts.nodes.unwrap_or(0),
        infinite: false,
    }
}

/// Start a background search that streams `info` lines and finishes with
/// `bestmove`.
fn start_search(
    engine: &Arc<dyn AnalysisEngine>,
    writer: &SharedWriter,
    board: Board,
    params: SearchParams,
) -> Result<JoinHandle<()>, EngineError> {
    engine.set_position(board)?;

    let (tx, rx) = bounded(64);
    let subscription = engine.subscribe(tx);
    if let Err(e) = engine.start_analysis(params) {
        subscription.unsubscribe();
        return Err(e);
    }

    let info_writer = Arc::clone(writer);
    let forwarder = thread::spawn(move || {
        for info in rx {
            if info.best_move.is_some() {
                let _ = lock(&info_writer).send_info(info.to_engine_info());
            }
        }
    });

    let engine = Arc::clone(engine);
    let writer = Arc::clone(writer);
    Ok(thread::spawn(move || {
        // Only `stop` or the engine itself ends a search; a slow engine is
        // simply waited on again.
        let result = loop {
            match engine.wait_done() {
                Ok(info) => break info,
                Err(EngineError::Timeout(what)) => {
                    tracing::debug!(%what, "still searching");
                }
                Err(e) => {
                    tracing::warn!("Search ended abnormally: {}", e);
                    break engine.best_now();
                }
            }
        };
        // Ends the forwarder once it has drained its mailbox.
        subscription.unsubscribe();
        let _ = forwarder.join();

        let best = result
            .best_move
            .map_or_else(|| "0000".to_string(), |m| m.to_uci());
        tracing::debug!(depth = result.depth, %best, "search finished");
        let _ = lock(&writer).send_bestmove(&best);
    }))
}

fn finish_search(engine: &dyn AnalysisEngine, search: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = search.take() {
        let _ = engine.stop_analysis();
        let _ = handle.join();
    }
}

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = EngineConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let engine: Arc<dyn AnalysisEngine> = match args.engine {
        Backend::Local => Arc::new(LocalEngine::new(config.local)),
        Backend::External => Arc::new(
            ExternalEngine::spawn(config.external).context("starting external engine")?,
        ),
    };
    tracing::info!(engine = ?args.engine, "bot-analysis ready");

    let writer: SharedWriter = Arc::new(Mutex::new(uci::stdout_writer()));
    let mut reader = uci::stdin_reader();
    let mut position = starting_position();
    let mut search: Option<JoinHandle<()>> = None;

    loop {
        let cmd = match reader.read_command() {
            Ok(Some(cmd)) => cmd,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Error reading command: {}", e);
                continue;
            }
        };

        match cmd {
            GuiCommand::Uci => {
                let mut out = lock(&writer);
                out.send_id("AnalysisBot", "Chess Devtools")?;
                out.send_uciok()?;
            }

            GuiCommand::IsReady => {
                lock(&writer).send_readyok()?;
            }

            GuiCommand::UciNewGame => {}

            GuiCommand::Position { fen, moves } => {
                match build_position(fen.as_deref(), &moves) {
                    Ok(board) => position = board,
                    Err(e) => tracing::warn!("Ignoring position: {}", e),
                }
            }

            GuiCommand::Go(opts) => {
                finish_search(engine.as_ref(), &mut search);
                let params = search_params(&opts, position.turn());
                match start_search(&engine, &writer, position.clone(), params) {
                    Ok(handle) => search = Some(handle),
                    Err(e) => {
                        tracing::error!("Failed to start search: {}", e);
                        lock(&writer).send_bestmove("0000")?;
                    }
                }
            }

            GuiCommand::Stop => {
                let _ = engine.stop_analysis();
            }

            GuiCommand::Quit => break,

            GuiCommand::Unknown(_) => {}
        }
    }

    finish_search(engine.as_ref(), &mut search);
    engine.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_infinite_wins() {
        let mut opts = GoOptions::infinite();
        opts.depth = Some(3);
        assert_eq!(search_params(&opts, Color::White), SearchParams::infinite());
    }

    #[test]
    fn test_clock_time_for_side_to_move() {
        let opts = GoOptions {
            wtime: Some(40_000),
            btime: Some(8_000),
            ..GoOptions::default()
        };
        assert_eq!(search_params(&opts, Color::White).max_time_ms, 1000);
        assert_eq!(search_params(&opts, Color::Black).max_time_ms, 200);
    }

    #[test]
    fn test_explicit_bounds_pass_through() {
        let opts = GoOptions {
            depth: Some(5),
            movetime: Some(750),
            nodes: Some(10_000),
            wtime: Some(60_000),
            ..GoOptions::default()
        };
        let params = search_params(&opts, Color::White);
        assert_eq!(params.max_depth, 5);
        assert_eq!(params.max_time_ms, 750);
        assert_eq!(params.max_nodes, 10_000);
    }

    #[test]
    fn test_bare_go_is_unbounded() {
        assert!(search_params(&GoOptions::default(), Color::Black).is_unbounded());
    }

    #[test]
    fn test_build_position_applies_moves() {
        let moves = vec!["e2e4".to_string(), "e7e5".to_string(), "g1f3".to_string()];
        let board = build_position(None, &moves).unwrap();
        assert_eq!(board.turn(), Color::Black);
        assert_eq!(
            chess_analysis::board::to_fen(&board),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2"
        );
    }

    #[test]
    fn test_build_position_rejects_illegal_move() {
        let moves = vec!["e2e5".to_string()];
        assert!(matches!(
            build_position(None, &moves),
            Err(EngineError::IllegalMove(_))
        ));
        assert!(build_position(Some("garbage"), &[]).is_err());
    }
}
