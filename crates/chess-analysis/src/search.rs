//! Negamax alpha-beta search with quiescence and a transposition table.

use crate::board::{find_legal, Board};
use crate::evaluation::{capture_order, evaluate};
use crate::tt::{Bound, TranspositionTable};
use crate::zobrist::position_hash;
use crate::Move;
use shakmaty::{Color, Position};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Score of being mated at the current node. Mates further away score
/// closer to zero by one point per ply.
pub const MATE_SCORE: i32 = 1_000_000;
/// Scores at least this large in magnitude are mate scores.
pub const MATE_THRESHOLD: i32 = 900_000;
pub const INFINITY: i32 = 1_000_000_000;
pub const MAX_DEPTH: u32 = 64;

/// Deadline and node budget are only checked this often.
const CHECK_INTERVAL: u64 = 1024;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of searching every root move at one depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootResult {
    pub best_move: Move,
    pub score: i32,
    /// False when the search was interrupted before every root move was
    /// searched. The result then only covers the moves that finished.
    pub completed: bool,
}

/// Search state for one analysis run.
///
/// The node counter is cumulative across calls, so a single searcher is
/// reused for every iteration of iterative deepening.
pub struct Searcher<'a> {
    tt: Option<&'a TranspositionTable>,
    cancel: &'a CancelToken,
    deadline: Option<Instant>,
    node_limit: Option<u64>,
    nodes: u64,
    stopped: bool,
}

impl<'a> Searcher<'a> {
    pub fn new(tt: Option<&'a TranspositionTable>, cancel: &'a CancelToken) -> Self {
        Searcher {
            tt,
            cancel,
            deadline: None,
            node_limit: None,
            nodes: 0,
            stopped: false,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_node_limit(mut self, limit: Option<u64>) -> Self {
        self.node_limit = limit;
        self
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    /// True once cancellation, the deadline or the node budget stopped the search.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    fn should_stop(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        if self.cancel.is_cancelled() {
            self.stopped = true;
        } else if self.nodes % CHECK_INTERVAL == 0 {
            let late = self.deadline.is_some_and(|d| Instant::now() >= d);
            let spent = self.node_limit.is_some_and(|limit| self.nodes >= limit);
            self.stopped = late || spent;
        }
        self.stopped
    }

    /// Search every root move to `depth` with a full window.
    ///
    /// `preferred` is searched first, falling back to the table's move for
    /// the root. Returns `None` if the root has no legal moves or the search
    /// was stopped before the first move finished.
    pub fn search_root(
        &mut self,
        root: &Board,
        depth: u32,
        preferred: Option<Move>,
    ) -> Option<RootResult> {
        let turn = root.turn();
        let mut moves = root.legal_moves();
        let key = position_hash(root);
        let first = preferred.or_else(|| {
            self.tt
                .and_then(|tt| tt.probe(key))
                .and_then(|e| e.best_move)
        });
        if let Some(first) = first {
            promote(&mut moves, first, turn);
        }

        let mut best: Option<(Move, i32)> = None;
        for m in &moves {
            let mut child = root.clone();
            child.play_unchecked(m);
            let score = -self.search(&child, depth.saturating_sub(1), -INFINITY, INFINITY, 1);
            if self.stopped {
                break;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Move::from_chess(m, turn).map(|mv| (mv, score));
            }
        }

        let (best_move, score) = best?;
        let completed = !self.stopped;
        if completed {
            if let Some(tt) = self.tt {
                tt.store(key, depth, Bound::Exact, score, Some(best_move));
            }
        }
        Some(RootResult {
            best_move,
            score,
            completed,
        })
    }

    /// Negamax alpha-beta. Returns 0 once the search has been stopped.
    pub fn search(
        &mut self,
        board: &Board,
        depth: u32,
        mut alpha: i32,
        mut beta: i32,
        ply: u32,
    ) -> i32 {
        if self.should_stop() {
            return 0;
        }
        self.nodes += 1;

        let key = position_hash(board);
        let entry = self.tt.and_then(|tt| tt.probe(key));
        if let Some(entry) = entry.filter(|e| e.depth >= depth) {
            let score = score_from_tt(entry.score, ply);
            match entry.bound {
                Bound::Exact => return score,
                Bound::Lower => alpha = alpha.max(score),
                Bound::Upper => beta = beta.min(score),
            }
            if alpha >= beta {
                return score;
            }
        }

        if depth == 0 {
            return self.quiesce(board, alpha, beta);
        }

        let turn = board.turn();
        let mut moves = board.legal_moves();
        if moves.is_empty() {
            return if board.is_check() {
                -MATE_SCORE + ply as i32
            } else {
                0
            };
        }
        moves.sort_by_key(|m| Reverse(capture_order(m)));
        if let Some(tt_move) = entry.and_then(|e| e.best_move) {
            promote(&mut moves, tt_move, turn);
        }

        let alpha_orig = alpha;
        let mut best_score = -INFINITY;
        let mut best_move = None;
        for m in &moves {
            let mut child = board.clone();
            child.play_unchecked(m);
            let score = -self.search(&child, depth - 1, -beta, -alpha, ply + 1);
            if self.stopped {
                return 0;
            }
            if score > best_score {
                best_score = score;
                best_move = Some(m);
            }
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }

        if let Some(tt) = self.tt {
            let bound = if best_score <= alpha_orig {
                Bound::Upper
            } else if best_score >= beta {
                Bound::Lower
            } else {
                Bound::Exact
            };
            let best_move = best_move.and_then(|m| Move::from_chess(m, turn));
            tt.store(key, depth, bound, score_to_tt(best_score, ply), best_move);
        }
        best_score
    }

    /// Capture-only search from a stand-pat material score.
    pub fn quiesce(&mut self, board: &Board, mut alpha: i32, beta: i32) -> i32 {
        if self.should_stop() {
            return 0;
        }
        self.nodes += 1;

        let stand_pat = evaluate(board);
        if stand_pat >= beta {
            return beta;
        }
        alpha = alpha.max(stand_pat);

        let mut captures = board.capture_moves();
        captures.sort_by_key(|m| Reverse(capture_order(m)));
        for m in &captures {
            let mut child = board.clone();
            child.play_unchecked(m);
            let score = -self.quiesce(&child, -beta, -alpha);
            if self.stopped {
                return 0;
            }
            if score >= beta {
                return beta;
            }
            alpha = alpha.max(score);
        }
        alpha
    }
}

/// Move `first` to the front, keeping the order of the others.
fn promote(moves: &mut [shakmaty::Move], first: Move, turn: Color) {
    if let Some(i) = moves
        .iter()
        .position(|m| Move::from_chess(m, turn) == Some(first))
    {
        moves[..=i].rotate_right(1);
    }
}

// Mate scores are stored relative to the node so they stay valid when the
// same position is reached at a different ply.
fn score_to_tt(score: i32, ply: u32) -> i32 {
    if score >= MATE_THRESHOLD {
        score + ply as i32
    } else if score <= -MATE_THRESHOLD {
        score - ply as i32
    } else {
        score
    }
}

fn score_from_tt(score: i32, ply: u32) -> i32 {
    if score >= MATE_THRESHOLD {
        score - ply as i32
    } else if score <= -MATE_THRESHOLD {
        score + ply as i32
    } else {
        score
    }
}

/// Follow recorded best moves from `root`, re-checking legality at each
/// step. The result always starts with `best`.
pub fn principal_variation(
    tt: &TranspositionTable,
    root: &Board,
    best: Move,
    max_len: usize,
) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut position = root.clone();
    while pv.len() < max_len {
        let Some(mv) = tt.probe(position_hash(&position)).and_then(|e| e.best_move) else {
            break;
        };
        let Some(legal) = find_legal(&position, mv) else {
            break;
        };
        position.play_unchecked(&legal);
        pv.push(mv);
    }
    if pv.first() != Some(&best) {
        pv = vec![best];
    }
    pv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{apply_move, parse_fen, starting_position};
    use crate::types::mate_in_plies;
    use proptest::prelude::*;
    use proptest::sample::Index;

    const BACK_RANK_MATE: &str = "6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1";

    /// Full-width negamax with the same leaves and terminal scores as `search`.
    fn minimax(board: &Board, depth: u32, ply: u32) -> i32 {
        if depth == 0 {
            let cancel = CancelToken::new();
            return Searcher::new(None, &cancel).quiesce(board, -INFINITY, INFINITY);
        }
        let moves = board.legal_moves();
        if moves.is_empty() {
            return if board.is_check() { -MATE_SCORE + ply as i32 } else { 0 };
        }
        moves
            .iter()
            .map(|m| {
                let mut child = board.clone();
                child.play_unchecked(m);
                -minimax(&child, depth - 1, ply + 1)
            })
            .max()
            .unwrap_or(0)
    }

    fn playout(choices: &[Index]) -> Board {
        let mut board = starting_position();
        for choice in choices {
            let moves = board.legal_moves();
            if moves.is_empty() {
                break;
            }
            let m = moves[choice.index(moves.len())].clone();
            board.play_unchecked(&m);
        }
        board
    }

    #[test]
    fn test_finds_back_rank_mate() {
        let board = parse_fen(BACK_RANK_MATE).unwrap();
        let cancel = CancelToken::new();
        let tt = TranspositionTable::new(1 << 12);
        let mut searcher = Searcher::new(Some(&tt), &cancel);

        let result = searcher.search_root(&board, 2, None).unwrap();
        assert!(result.completed);
        assert_eq!(result.best_move.to_uci(), "a1a8");
        assert_eq!(result.score, MATE_SCORE - 1);
        assert_eq!(mate_in_plies(result.score), 1);
    }

    #[test]
    fn test_wins_hanging_queen() {
        let board = parse_fen("4k3/8/8/3q4/8/8/8/3RK3 w - - 0 1").unwrap();
        let cancel = CancelToken::new();
        let mut searcher = Searcher::new(None, &cancel);
        let result = searcher.search_root(&board, 1, None).unwrap();
        assert_eq!(result.best_move.to_uci(), "d1d5");
        assert_eq!(result.score, 500);
    }

    #[test]
    fn test_terminal_root_has_no_result() {
        let mated =
            parse_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3").unwrap();
        let cancel = CancelToken::new();
        assert!(Searcher::new(None, &cancel).search_root(&mated, 3, None).is_none());
    }

    #[test]
    fn test_cancelled_search_stops_immediately() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut searcher = Searcher::new(None, &cancel);
        assert!(searcher.search_root(&starting_position(), 5, None).is_none());
        assert!(searcher.stopped());
        assert_eq!(searcher.nodes(), 0);
    }

    #[test]
    fn test_node_budget_stops_search() {
        let cancel = CancelToken::new();
        let mut searcher = Searcher::new(None, &cancel).with_node_limit(Some(2048));
        let result = searcher.search_root(&starting_position(), 6, None);
        assert!(searcher.stopped());
        assert!(result.map_or(true, |r| !r.completed));
        assert!(searcher.nodes() <= 2048 + CHECK_INTERVAL);
    }

    #[test]
    fn test_preferred_move_is_searched_first() {
        let mut moves = starting_position().legal_moves();
        let last = Move::from_chess(&moves[moves.len() - 1], Color::White).unwrap();
        promote(&mut moves, last, Color::White);
        assert_eq!(Move::from_chess(&moves[0], Color::White), Some(last));
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn test_mate_scores_survive_table_round_trip() {
        let at_node = MATE_SCORE - 5;
        assert_eq!(score_from_tt(score_to_tt(at_node, 3), 3), at_node);
        assert_eq!(score_from_tt(score_to_tt(-at_node, 2), 7), -at_node + 5);
        assert_eq!(score_to_tt(120, 9), 120);
    }

    #[test]
    fn test_pv_starts_with_best_move_and_is_legal() {
        let board = parse_fen(BACK_RANK_MATE).unwrap();
        let cancel = CancelToken::new();
        let tt = TranspositionTable::new(1 << 12);
        let mut searcher = Searcher::new(Some(&tt), &cancel);
        let result = searcher.search_root(&board, 3, None).unwrap();

        let pv = principal_variation(&tt, &board, result.best_move, 7);
        assert_eq!(pv[0], result.best_move);
        let mut replay = board.clone();
        for mv in pv {
            apply_move(&mut replay, mv).unwrap();
        }
    }

    #[test]
    fn test_pv_falls_back_to_best_move() {
        let tt = TranspositionTable::new(16);
        let board = starting_position();
        let best = crate::board::parse_uci_move("d2d4", &board).unwrap();
        assert_eq!(principal_variation(&tt, &board, best, 5), vec![best]);
    }

    #[test]
    fn test_alpha_beta_matches_minimax_at_depth_three() {
        // Few pieces keep full-width search cheap.
        let board = parse_fen("r3k3/1p6/8/3n4/8/2N5/1P6/R3K3 w Qq - 0 1").unwrap();
        let cancel = CancelToken::new();
        let mut searcher = Searcher::new(None, &cancel);
        let score = searcher.search(&board, 3, -INFINITY, INFINITY, 0);
        assert_eq!(score, minimax(&board, 3, 0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_alpha_beta_matches_minimax(
            choices in prop::collection::vec(any::<Index>(), 0..16),
            depth in 1u32..=2,
        ) {
            let board = playout(&choices);
            let cancel = CancelToken::new();
            let mut searcher = Searcher::new(None, &cancel);
            let score = searcher.search(&board, depth, -INFINITY, INFINITY, 0);
            prop_assert_eq!(score, minimax(&board, depth, 0));
        }

        #[test]
        fn test_pv_replays_legally(choices in prop::collection::vec(any::<Index>(), 0..16)) {
            let board = playout(&choices);
            let cancel = CancelToken::new();
            let tt = TranspositionTable::new(1 << 14);
            let mut searcher = Searcher::new(Some(&tt), &cancel);
            if let Some(result) = searcher.search_root(&board, 2, None) {
                let pv = principal_variation(&tt, &board, result.best_move, 6);
                prop_assert_eq!(pv[0], result.best_move);
                let mut replay = board.clone();
                for mv in pv {
                    prop_assert!(apply_move(&mut replay, mv).is_ok());
                }
            }
        }
    }
}
