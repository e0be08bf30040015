//! In-process analysis engine.
//!
//! Runs iterative-deepening alpha-beta on a background thread and publishes
//! one snapshot per completed depth.

use crate::board::{parse_fen, Board};
use crate::config::LocalConfig;
use crate::engine::{lock, AnalysisEngine, EngineError, Subscribers, Subscription};
use crate::search::{principal_variation, CancelToken, RootResult, Searcher, MATE_SCORE, MAX_DEPTH};
use crate::tt::TranspositionTable;
use crate::types::{mate_in_plies, nodes_per_second};
use crate::{AnalysisInfo, Move, SearchParams};
use crossbeam_channel::Sender;
use shakmaty::Position;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Default)]
struct State {
    board: Option<Board>,
    running: bool,
    last_info: AnalysisInfo,
    cancel: Option<CancelToken>,
}

struct Shared {
    config: LocalConfig,
    state: Mutex<State>,
    done: Condvar,
    subscribers: Subscribers,
    tt: TranspositionTable,
}

/// Alpha-beta analysis engine running in this process.
pub struct LocalEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalEngine {
    pub fn new(config: LocalConfig) -> Self {
        let tt = TranspositionTable::new(config.tt_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                done: Condvar::new(),
                subscribers: Subscribers::default(),
                tt,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    fn join_worker(&self) {
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

impl AnalysisEngine for LocalEngine {
    fn set_position(&self, board: Board) -> Result<(), EngineError> {
        lock(&self.shared.state).board = Some(board);
        Ok(())
    }

    fn set_position_fen(&self, fen: &str) -> Result<(), EngineError> {
        self.set_position(parse_fen(fen)?)
    }

    fn start_analysis(&self, params: SearchParams) -> Result<(), EngineError> {
        let (root, cancel) = {
            let mut state = lock(&self.shared.state);
            if state.running {
                return Err(EngineError::AlreadyRunning);
            }
            let root = state.board.clone().ok_or(EngineError::PositionNotSet)?;
            let cancel = CancelToken::new();
            state.running = true;
            state.cancel = Some(cancel.clone());
            state.last_info = AnalysisInfo::default();
            (root, cancel)
        };

        // The previous worker has already cleared `running`, so this join
        // returns at once.
        self.join_worker();
        self.shared.tt.clear();

        info!(?params, "starting local analysis");
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("local-analysis".to_string())
            .spawn(move || shared.run(root, params, cancel));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.finish();
                Err(EngineError::SpawnError(e))
            }
        }
    }

    fn stop_analysis(&self) -> Result<(), EngineError> {
        let state = lock(&self.shared.state);
        match (&state.cancel, state.running) {
            (Some(cancel), true) => {
                info!("stopping local analysis");
                cancel.cancel();
                Ok(())
            }
            _ => Err(EngineError::NotRunning),
        }
    }

    fn best_now(&self) -> AnalysisInfo {
        lock(&self.shared.state).last_info.clone()
    }

    fn wait_done(&self) -> Result<AnalysisInfo, EngineError> {
        let mut state = lock(&self.shared.state);
        while state.running {
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(state.last_info.clone())
    }

    fn subscribe(&self, tx: Sender<AnalysisInfo>) -> Subscription {
        self.shared.subscribers.subscribe(tx)
    }

    fn close(&self) -> Result<(), EngineError> {
        match self.stop_analysis() {
            Ok(()) | Err(EngineError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.join_worker();
        Ok(())
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Shared {
    fn depth_limit(&self, params: &SearchParams) -> u32 {
        if params.max_depth > 0 {
            params.max_depth.min(MAX_DEPTH)
        } else if params.is_unbounded() {
            self.config.default_depth.clamp(1, MAX_DEPTH)
        } else {
            MAX_DEPTH
        }
    }

    fn run(&self, root: Board, params: SearchParams, cancel: CancelToken) {
        let start = Instant::now();
        let deadline = (params.max_time_ms > 0 && !params.infinite)
            .then(|| start + Duration::from_millis(params.max_time_ms));
        let node_limit = (params.max_nodes > 0 && !params.infinite).then_some(params.max_nodes);
        let max_depth = self.depth_limit(&params);

        let mut searcher = Searcher::new(Some(&self.tt), &cancel)
            .with_deadline(deadline)
            .with_node_limit(node_limit);
        let mut previous_best: Option<Move> = None;
        let mut partial: Option<RootResult> = None;
        // One generation per run: deeper entries from earlier iterations
        // must survive shallower stores.
        self.tt.new_generation();

        for depth in 1..=max_depth {
            if cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            let position = root.clone();
            if position.legal_moves().is_empty() {
                self.publish(terminal_snapshot(&position));
                break;
            }

            let result = match searcher.search_root(&position, depth, previous_best) {
                Some(result) if result.completed => result,
                Some(result) => {
                    partial = Some(result);
                    break;
                }
                None => break,
            };

            let pv = principal_variation(&self.tt, &position, result.best_move, depth as usize + 4);
            let elapsed = start.elapsed();
            let snapshot = AnalysisInfo {
                depth,
                time_ms: elapsed.as_millis() as u64,
                nodes: searcher.nodes(),
                nps: nodes_per_second(searcher.nodes(), elapsed),
                score_cp: result.score,
                mate_in: mate_in_plies(result.score),
                best_move: Some(result.best_move),
                pv,
                uci_pv: Vec::new(),
            };
            debug!(
                depth,
                score = snapshot.score_cp,
                nodes = snapshot.nodes,
                best = %result.best_move,
                "iteration complete"
            );
            let mate_in = snapshot.mate_in;
            self.publish(snapshot);
            previous_best = Some(result.best_move);

            // A proven mate will not change with more depth.
            if mate_in != 0 && mate_in.unsigned_abs() <= depth && !params.infinite {
                break;
            }
        }

        // Without a completed iteration, report the best move seen so far.
        if previous_best.is_none() {
            if let Some(result) = partial {
                let elapsed = start.elapsed();
                self.publish(AnalysisInfo {
                    depth: 0,
                    time_ms: elapsed.as_millis() as u64,
                    nodes: searcher.nodes(),
                    nps: nodes_per_second(searcher.nodes(), elapsed),
                    score_cp: result.score,
                    mate_in: mate_in_plies(result.score),
                    best_move: Some(result.best_move),
                    pv: vec![result.best_move],
                    uci_pv: Vec::new(),
                });
            }
        }

        info!(
            nodes = searcher.nodes(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local analysis finished"
        );
        self.finish();
    }

    fn publish(&self, snapshot: AnalysisInfo) {
        lock(&self.state).last_info = snapshot.clone();
        self.subscribers.publish(&snapshot);
    }

    fn finish(&self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.cancel = None;
        self.done.notify_all();
    }
}

/// Snapshot for a root with no legal moves.
fn terminal_snapshot(board: &Board) -> AnalysisInfo {
    AnalysisInfo {
        score_cp: if board.is_check() { -MATE_SCORE } else { 0 },
        ..AnalysisInfo::default()
    }
}
