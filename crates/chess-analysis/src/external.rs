//! External UCI engine adapter.
//!
//! Drives an engine subprocess (Stockfish or anything speaking UCI) and
//! republishes its `info` output as [`AnalysisInfo`] snapshots.
//!
//! A reader thread owns the process's stdout for its whole lifetime. Every
//! line goes into a bounded buffer that handshake waiters consume, and is
//! also interpreted: `info` lines update the running snapshot, `bestmove`
//! finalizes it and signals [`wait_done`](AnalysisEngine::wait_done).

use crate::board::{find_legal, parse_fen, parse_uci_move, to_fen, Board};
use crate::config::ExternalConfig;
use crate::engine::{lock, AnalysisEngine, EngineError, Subscribers, Subscription};
use crate::search::MATE_SCORE;
use crate::types::{mate_moves_to_plies, nodes_per_second};
use crate::{AnalysisInfo, Move, SearchParams};
use crossbeam_channel::{
    after, bounded, never, select, Receiver, RecvTimeoutError, Sender, TryRecvError,
    TrySendError,
};
use shakmaty::Position;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uci::{EngineInfo, EngineMessage, GoOptions, GuiCommand, Score, UciWriter};

struct Process {
    child: Child,
    stdin: UciWriter<ChildStdin>,
}

/// How long `wait_done` waits for `bestmove`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum WaitLimit {
    /// `go infinite`: only `stop` ends it.
    #[default]
    UntilStopped,
    /// The engine ends the search itself after this long.
    Movetime(Duration),
    /// Depth or node bound, or a bare `go`.
    Deadline(Duration),
}

#[derive(Default)]
struct AdapterState {
    process: Option<Process>,
    running: bool,
    limit: WaitLimit,
    info: AnalysisInfo,
    board: Option<Board>,
}

/// State shared with the reader thread.
struct Inner {
    state: Mutex<AdapterState>,
    subscribers: Subscribers,
}

/// Analysis engine backed by an external UCI process.
pub struct ExternalEngine {
    config: ExternalConfig,
    inner: Arc<Inner>,
    name: String,
    banner: String,
    lines: Receiver<String>,
    bestmove: Receiver<()>,
    reader_done: Receiver<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
    // Dropping the sender is the shutdown signal.
    shutdown: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl ExternalEngine {
    /// Spawn the engine process and complete the UCI handshake.
    ///
    /// # Errors
    ///
    /// - `EngineError::NotFound` if the executable does not exist
    /// - `EngineError::SpawnError` if the process fails to start
    /// - `EngineError::Timeout` / `EngineError::HandshakeFailed` if the
    ///   engine does not answer the handshake in time; the process is
    ///   torn down before returning
    pub fn spawn(config: ExternalConfig) -> Result<Self, EngineError> {
        info!(path = %config.path.display(), args = ?config.args, "spawning uci engine");
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EngineError::NotFound(config.path.display().to_string())
                }
                _ => EngineError::SpawnError(e),
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::HandshakeFailed("engine pipes unavailable".to_string()));
            }
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(AdapterState {
                process: Some(Process {
                    child,
                    stdin: UciWriter::new(stdin),
                }),
                ..AdapterState::default()
            }),
            subscribers: Subscribers::default(),
        });

        let (lines_tx, lines) = bounded(config.line_buffer.max(1));
        let (bestmove_tx, bestmove) = bounded(1);
        let (done_tx, reader_done) = bounded::<()>(0);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let reader_inner = Arc::clone(&inner);
        let reader_shutdown = shutdown_rx.clone();
        let reader = thread::Builder::new()
            .name("uci-reader".to_string())
            .spawn(move || {
                // Held until the loop ends; its drop is the "reader finished" signal.
                let _done = done_tx;
                reader_inner.read_loop(stdout, lines_tx, bestmove_tx, reader_shutdown);
            });

        let mut engine = Self {
            config,
            inner,
            name: String::new(),
            banner: String::new(),
            lines,
            bestmove,
            reader_done,
            reader: Mutex::new(None),
            shutdown: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        };
        match reader {
            Ok(handle) => *lock(&engine.reader) = Some(handle),
            Err(e) => {
                if let Some(mut process) = lock(&engine.inner.state).process.take() {
                    let _ = process.child.kill();
                    let _ = process.child.wait();
                }
                return Err(EngineError::SpawnError(e));
            }
        }

        match engine.handshake() {
            Ok((banner, name)) => {
                info!(%banner, %name, "uci engine ready");
                engine.banner = banner;
                engine.name = name;
                Ok(engine)
            }
            Err(e) => {
                warn!(error = %e, "uci handshake failed");
                let _ = engine.close();
                Err(e)
            }
        }
    }

    /// Name from the engine's `id name` line, or empty if it sent none.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First line the engine printed.
    pub fn banner(&self) -> &str {
        &self.banner
    }

    fn handshake(&self) -> Result<(String, String), EngineError> {
        let timeout = self.config.handshake_timeout();
        let banner = self.wait_line("identification", timeout, |_| true)?;
        let mut name = id_name(&banner).unwrap_or_default();

        self.send(&GuiCommand::Uci)?;
        self.wait_line("uciok", timeout, |line| {
            if let Some(n) = id_name(line) {
                name = n;
            }
            line.starts_with("uciok")
        })?;

        self.sync_ready()?;
        Ok((banner, name))
    }

    /// `isready` round trip.
    fn sync_ready(&self) -> Result<(), EngineError> {
        // Anything still buffered predates this request.
        while self.lines.try_recv().is_ok() {}
        self.send(&GuiCommand::IsReady)?;
        self.wait_line("readyok", self.config.handshake_timeout(), |line| {
            line.starts_with("readyok")
        })?;
        Ok(())
    }

    /// Wait for a buffered output line accepted by `accept`.
    fn wait_line(
        &self,
        what: &str,
        timeout: Duration,
        mut accept: impl FnMut(&str) -> bool,
    ) -> Result<String, EngineError> {
        let deadline = after(timeout);
        loop {
            select! {
                recv(self.lines) -> line => match line {
                    Ok(line) => {
                        if accept(&line) {
                            return Ok(line);
                        }
                    }
                    Err(_) => {
                        return Err(EngineError::HandshakeFailed(format!(
                            "engine exited while waiting for {}",
                            what
                        )))
                    }
                },
                recv(deadline) -> _ => return Err(EngineError::Timeout(what.to_string())),
                recv(self.shutdown_rx) -> _ => return Err(EngineError::Stopped),
            }
        }
    }

    fn send(&self, cmd: &GuiCommand) -> Result<(), EngineError> {
        let mut state = lock(&self.inner.state);
        let process = state.process.as_mut().ok_or(EngineError::NoProcess)?;
        debug!(command = %cmd, "-> engine");
        process.stdin.send_command(cmd)?;
        Ok(())
    }

    fn load_position(&self, board: Board, fen: &str) -> Result<(), EngineError> {
        lock(&self.inner.state).board = Some(board);
        self.send(&GuiCommand::UciNewGame)?;
        self.send(&GuiCommand::Position {
            fen: Some(fen.to_string()),
            moves: Vec::new(),
        })?;
        self.sync_ready()
    }

    /// `wait_done` timer fired before `bestmove`. A movetime search is
    /// stopped; any other search keeps running.
    fn missed_bestmove(&self, limit: WaitLimit) -> Result<AnalysisInfo, EngineError> {
        if let WaitLimit::Movetime(movetime) = limit {
            warn!(?movetime, "engine overran its movetime, sending stop");
            let stopped = self.send(&GuiCommand::Stop).is_ok()
                && self.bestmove.recv_timeout(self.config.stop_grace()).is_ok();
            if stopped {
                return Ok(self.best_now());
            }
            warn!("engine ignored stop");
            lock(&self.inner.state).running = false;
        } else {
            debug!(?limit, "no bestmove before the deadline");
        }
        Err(EngineError::Timeout("bestmove".to_string()))
    }
}

fn id_name(line: &str) -> Option<String> {
    match EngineMessage::parse(line)? {
        EngineMessage::Id { name, .. } => name,
        _ => None,
    }
}

fn go_options(params: &SearchParams) -> GoOptions {
    if params.infinite {
        return GoOptions::infinite();
    }
    let bound = |v: u64| (v > 0).then_some(v);
    GoOptions {
        depth: (params.max_depth > 0).then_some(params.max_depth),
        movetime: bound(params.max_time_ms),
        nodes: bound(params.max_nodes),
        ..GoOptions::default()
    }
}

/// Resolve UCI tokens move by move against `board`. Stops at the first
/// token that does not decode to a legal move.
fn parse_pv(board: &Board, tokens: &[String]) -> Vec<Move> {
    let mut position = board.clone();
    let mut pv = Vec::with_capacity(tokens.len());
    for token in tokens {
        let Some(mv) = parse_uci_move(token, &position) else {
            break;
        };
        let Some(legal) = find_legal(&position, mv) else {
            break;
        };
        position.play_unchecked(&legal);
        pv.push(mv);
    }
    pv
}

impl Inner {
    fn read_loop(
        &self,
        stdout: ChildStdout,
        lines: Sender<String>,
        bestmove: Sender<()>,
        shutdown: Receiver<()>,
    ) {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim().to_string();
            trace!(%line, "<- engine");

            match EngineMessage::parse(&line) {
                Some(EngineMessage::Info(info)) => self.apply_info(info),
                Some(EngineMessage::BestMove { mv, .. }) => {
                    self.apply_bestmove(&mv);
                    let _ = bestmove.try_send(());
                }
                _ => {}
            }

            if let Err(TrySendError::Full(line)) = lines.try_send(line) {
                debug!(%line, "line buffer full, dropping");
            }
            if matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
                break;
            }
        }
        debug!("uci reader finished");
    }

    fn apply_info(&self, info: EngineInfo) {
        let reported = info.depth.is_some()
            || info.score.is_some()
            || info.nodes.is_some()
            || info.nps.is_some()
            || info.time.is_some()
            || !info.pv.is_empty();
        if !reported {
            // `info string ...`, `info currmove ...` and friends.
            return;
        }
        let published = {
            let mut guard = lock(&self.state);
            let AdapterState {
                info: snapshot,
                board,
                ..
            } = &mut *guard;

            if let Some(depth) = info.depth {
                snapshot.depth = depth;
            }
            if let Some(nodes) = info.nodes {
                snapshot.nodes = nodes;
            }
            if let Some(time) = info.time {
                snapshot.time_ms = time;
            }
            snapshot.nps = match info.nps {
                Some(nps) => nps,
                None if info.nodes.is_some() => {
                    nodes_per_second(snapshot.nodes, Duration::from_millis(snapshot.time_ms))
                }
                None => snapshot.nps,
            };
            match info.score {
                Some(Score::Cp(cp)) => {
                    snapshot.score_cp = cp;
                    snapshot.mate_in = 0;
                }
                Some(Score::Mate(moves)) => {
                    let plies = mate_moves_to_plies(moves);
                    snapshot.mate_in = plies;
                    snapshot.score_cp = if plies < 0 {
                        -MATE_SCORE - plies
                    } else {
                        MATE_SCORE - plies
                    };
                }
                None => {}
            }
            if !info.pv.is_empty() {
                snapshot.pv = board
                    .as_ref()
                    .map(|b| parse_pv(b, &info.pv))
                    .unwrap_or_default();
                snapshot.best_move = snapshot.pv.first().copied();
                snapshot.uci_pv = info.pv;
            }
            snapshot.clone()
        };
        self.subscribers.publish(&published);
    }

    fn apply_bestmove(&self, token: &str) {
        let snapshot = {
            let mut state = lock(&self.state);
            state.running = false;
            if token == "(none)" || token == "0000" {
                state.info.clone()
            } else {
                let mv = state.board.as_ref().and_then(|b| parse_uci_move(token, b));
                if let Some(mv) = mv {
                    state.info.best_move = Some(mv);
                    if state.info.pv.first() != Some(&mv) {
                        state.info.pv = vec![mv];
                    }
                }
                if state.info.uci_pv.first().map(String::as_str) != Some(token) {
                    state.info.uci_pv = vec![token.to_string()];
                }
                state.info.clone()
            }
        };
        self.subscribers.publish(&snapshot);
    }
}

impl AnalysisEngine for ExternalEngine {
    fn set_position(&self, board: Board) -> Result<(), EngineError> {
        let fen = to_fen(&board);
        self.load_position(board, &fen)
    }

    fn set_position_fen(&self, fen: &str) -> Result<(), EngineError> {
        let board = parse_fen(fen)?;
        self.load_position(board, fen.trim())
    }

    fn start_analysis(&self, params: SearchParams) -> Result<(), EngineError> {
        let cmd = GuiCommand::Go(go_options(&params));
        let mut state = lock(&self.inner.state);
        if state.process.is_none() {
            return Err(EngineError::NoProcess);
        }
        if state.running {
            return Err(EngineError::AlreadyRunning);
        }

        // A late `bestmove` from an earlier search must not end this one.
        while self.bestmove.try_recv().is_ok() {}
        state.info = AnalysisInfo::default();
        state.limit = if params.infinite {
            WaitLimit::UntilStopped
        } else if params.max_time_ms > 0 {
            WaitLimit::Movetime(Duration::from_millis(params.max_time_ms))
        } else {
            WaitLimit::Deadline(self.config.bestmove_timeout())
        };
        state.running = true;

        info!(command = %cmd, "starting external analysis");
        let sent = match state.process.as_mut() {
            Some(process) => process.stdin.send_command(&cmd),
            None => return Err(EngineError::NoProcess),
        };
        if let Err(e) = sent {
            state.running = false;
            return Err(e.into());
        }
        Ok(())
    }

    fn stop_analysis(&self) -> Result<(), EngineError> {
        let running = {
            let state = lock(&self.inner.state);
            if state.process.is_none() {
                return Err(EngineError::NoProcess);
            }
            state.running
        };
        if running {
            self.send(&GuiCommand::Stop)?;
        }
        Ok(())
    }

    fn best_now(&self) -> AnalysisInfo {
        lock(&self.inner.state).info.clone()
    }

    fn wait_done(&self) -> Result<AnalysisInfo, EngineError> {
        let (running, limit) = {
            let state = lock(&self.inner.state);
            (state.running, state.limit)
        };
        if !running {
            return Ok(self.best_now());
        }

        let timer = match limit {
            WaitLimit::UntilStopped => never(),
            WaitLimit::Movetime(movetime) => after(movetime + self.config.stop_grace()),
            WaitLimit::Deadline(timeout) => after(timeout),
        };

        select! {
            recv(self.bestmove) -> signal => match signal {
                Ok(()) => Ok(self.best_now()),
                Err(_) => {
                    warn!("engine output closed during search");
                    lock(&self.inner.state).running = false;
                    Err(EngineError::Stopped)
                }
            },
            recv(timer) -> _ => self.missed_bestmove(limit),
            recv(self.shutdown_rx) -> _ => Err(EngineError::Stopped),
        }
    }

    fn subscribe(&self, tx: Sender<AnalysisInfo>) -> Subscription {
        self.inner.subscribers.subscribe(tx)
    }

    fn close(&self) -> Result<(), EngineError> {
        let Some(shutdown) = lock(&self.shutdown).take() else {
            return Ok(());
        };
        let _ = self.send(&GuiCommand::Quit);
        drop(shutdown);

        let exited = matches!(
            self.reader_done.recv_timeout(self.config.close_grace()),
            Err(RecvTimeoutError::Disconnected)
        );

        let process = {
            let mut state = lock(&self.inner.state);
            state.running = false;
            state.process.take()
        };
        if let Some(Process { mut child, stdin }) = process {
            if !exited {
                warn!("engine did not exit after quit, killing it");
                let _ = child.kill();
            }
            drop(stdin);
            if let Some(reader) = lock(&self.reader).take() {
                let _ = reader.join();
            }
            let _ = child.wait();
        }
        info!("uci process terminated");
        Ok(())
    }
}

impl Drop for ExternalEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::starting_position;

    #[test]
    fn test_go_command_shapes() {
        let go = |p: SearchParams| GuiCommand::Go(go_options(&p)).to_uci();
        assert_eq!(go(SearchParams::infinite()), "go infinite");
        assert_eq!(go(SearchParams::depth(8)), "go depth 8");
        assert_eq!(
            go(SearchParams {
                max_depth: 10,
                max_time_ms: 500,
                ..SearchParams::default()
            }),
            "go depth 10 movetime 500"
        );
        assert_eq!(go(SearchParams::nodes(1000)), "go nodes 1000");
        assert_eq!(go(SearchParams::default()), "go");
    }

    #[test]
    fn test_pv_is_replayed_through_the_board() {
        let tokens: Vec<String> = ["e2e4", "e7e5", "g1f3", "b8c6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pv = parse_pv(&starting_position(), &tokens);
        assert_eq!(pv.len(), 4);
        // Black's reply is resolved on the position after e2e4.
        assert_eq!(pv[1].piece.color, shakmaty::Color::Black);
        assert_eq!(pv[3].piece.role, shakmaty::Role::Knight);
    }

    #[test]
    fn test_pv_stops_at_first_bad_token() {
        let tokens: Vec<String> = ["e2e4", "e2e4", "g1f3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(parse_pv(&starting_position(), &tokens).len(), 1);
    }

    #[test]
    fn test_id_name_extraction() {
        assert_eq!(id_name("id name Stub"), Some("Stub".to_string()));
        assert_eq!(id_name("id author Someone"), None);
        assert_eq!(id_name("Stockfish 16 by the Stockfish developers"), None);
    }

    fn inner_with_board() -> Inner {
        Inner {
            state: Mutex::new(AdapterState {
                board: Some(starting_position()),
                running: true,
                ..AdapterState::default()
            }),
            subscribers: Subscribers::default(),
        }
    }

    #[test]
    fn test_info_lines_merge_into_snapshot() {
        let inner = inner_with_board();
        let line = "info depth 3 score cp 31 nodes 900 nps 4500 time 200 pv d2d4 d7d5";
        inner.apply_info(EngineInfo::parse(line).unwrap());
        inner.apply_info(EngineInfo::parse("info depth 4 currmove c2c4 currmovenumber 2").unwrap());

        let info = lock(&inner.state).info.clone();
        assert_eq!(info.depth, 4);
        assert_eq!(info.score_cp, 31);
        assert_eq!(info.nodes, 900);
        assert_eq!(info.nps, 4500);
        assert_eq!(info.time_ms, 200);
        assert_eq!(info.pv.len(), 2);
        assert_eq!(info.best_move.map(|m| m.to_uci()), Some("d2d4".to_string()));
    }

    #[test]
    fn test_counter_only_lines_update_progress() {
        let inner = inner_with_board();
        inner.apply_info(EngineInfo::parse("info depth 6 score cp 20 pv e2e4").unwrap());
        inner.apply_info(EngineInfo::parse("info nodes 80000 nps 160000 time 500").unwrap());
        inner.apply_info(EngineInfo::parse("info string NNUE enabled").unwrap());

        let info = lock(&inner.state).info.clone();
        assert_eq!(info.depth, 6);
        assert_eq!(info.score_cp, 20);
        assert_eq!(info.nodes, 80_000);
        assert_eq!(info.nps, 160_000);
        assert_eq!(info.time_ms, 500);
        assert_eq!(info.uci_pv, vec!["e2e4"]);
    }

    #[test]
    fn test_nps_derived_when_missing() {
        let inner = inner_with_board();
        inner.apply_info(EngineInfo::parse("info depth 2 nodes 3000 time 500").unwrap());
        assert_eq!(lock(&inner.state).info.nps, 6000);
    }

    #[test]
    fn test_mate_scores_become_plies() {
        let inner = inner_with_board();
        inner.apply_info(EngineInfo::parse("info depth 9 score mate 2 pv e2e4").unwrap());
        let info = lock(&inner.state).info.clone();
        assert_eq!(info.mate_in, 3);
        assert_eq!(info.score_cp, MATE_SCORE - 3);

        inner.apply_info(EngineInfo::parse("info depth 10 score mate -1").unwrap());
        let info = lock(&inner.state).info.clone();
        assert_eq!(info.mate_in, -2);
        assert_eq!(info.score_cp, -(MATE_SCORE - 2));
    }

    #[test]
    fn test_bestmove_finalizes_snapshot() {
        let inner = inner_with_board();
        inner.apply_info(EngineInfo::parse("info depth 5 score cp 12 pv e2e4 e7e5").unwrap());
        inner.apply_bestmove("g1f3");

        let state = lock(&inner.state);
        assert!(!state.running);
        assert_eq!(state.info.best_move.map(|m| m.to_uci()), Some("g1f3".to_string()));
        assert_eq!(state.info.pv.len(), 1);
        assert_eq!(state.info.uci_pv, vec!["g1f3"]);
        assert_eq!(state.info.score_cp, 12);
    }

    #[test]
    fn test_bestmove_none_keeps_snapshot() {
        let inner = inner_with_board();
        inner.apply_bestmove("(none)");
        let state = lock(&inner.state);
        assert!(!state.running);
        assert_eq!(state.info.best_move, None);
    }

    #[test]
    fn test_missing_executable_is_not_found() {
        let result = ExternalEngine::spawn(ExternalConfig::new("/nonexistent/uci-engine"));
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }
}
