//! The analysis engine contract and the progress fan-out it shares.

use crate::board::Board;
use crate::{AnalysisInfo, AnalysisLevel, SearchParams};
use crossbeam_channel::{Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Errors that can occur when working with chess engines.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `start_analysis` while a search is active.
    #[error("Analysis already running")]
    AlreadyRunning,
    /// `stop_analysis` with nothing to stop.
    #[error("Analysis not running")]
    NotRunning,
    #[error("Position not set")]
    PositionNotSet,
    #[error("Invalid FEN: {0}")]
    InvalidFen(String),
    #[error("Illegal move: {0}")]
    IllegalMove(String),
    /// Engine executable was not found at the specified path.
    #[error("Engine not found at path: {0}")]
    NotFound(String),
    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine: {0}")]
    SpawnError(#[from] std::io::Error),
    /// The engine process is gone.
    #[error("No engine process")]
    NoProcess,
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    /// Engine failed to initialize properly (UCI handshake failed).
    #[error("Engine initialization failed: {0}")]
    HandshakeFailed(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] uci::UciError),
    /// The adapter shut down while an operation was waiting.
    #[error("Engine stopped")]
    Stopped,
}

/// A chess analysis engine.
///
/// Implementations run at most one search at a time in the background and
/// publish an [`AnalysisInfo`] snapshot per completed iteration.
///
/// Live delivery through [`subscribe`](AnalysisEngine::subscribe) is
/// best-effort: a snapshot is dropped for any subscriber whose channel is
/// full. [`best_now`](AnalysisEngine::best_now) always returns the latest
/// snapshot.
pub trait AnalysisEngine: Send + Sync {
    /// Replace the analysis root. A running search keeps its own root.
    fn set_position(&self, board: Board) -> Result<(), EngineError>;

    fn set_position_fen(&self, fen: &str) -> Result<(), EngineError>;

    /// Start a background search and return immediately.
    fn start_analysis(&self, params: SearchParams) -> Result<(), EngineError>;

    /// Ask the running search to stop. Does not wait for it.
    fn stop_analysis(&self) -> Result<(), EngineError>;

    /// Latest published snapshot, without blocking.
    fn best_now(&self) -> AnalysisInfo;

    /// Block until the current search finishes and return its final snapshot.
    ///
    /// # Errors
    ///
    /// - `EngineError::Timeout` if the search did not finish within the
    ///   engine's deadline; the search is left running and may be waited on
    ///   again or stopped
    /// - `EngineError::Stopped` if the engine was closed while waiting
    fn wait_done(&self) -> Result<AnalysisInfo, EngineError>;

    fn subscribe(&self, tx: Sender<AnalysisInfo>) -> Subscription;

    /// Stop any search and release the engine's resources.
    fn close(&self) -> Result<(), EngineError>;

    fn level_params(&self, level: AnalysisLevel) -> SearchParams {
        SearchParams::for_level(level)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Mailboxes {
    next_id: u64,
    senders: HashMap<u64, Sender<AnalysisInfo>>,
}

/// Snapshot fan-out to subscriber channels.
#[derive(Default)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<Mailboxes>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self, tx: Sender<AnalysisInfo>) -> Subscription {
        let mut boxes = lock(&self.inner);
        let id = boxes.next_id;
        boxes.next_id += 1;
        boxes.senders.insert(id, tx);
        Subscription {
            id,
            mailboxes: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `info` to every subscriber that can take it right now.
    pub(crate) fn publish(&self, info: &AnalysisInfo) {
        let mut boxes = lock(&self.inner);
        boxes.senders.retain(|_, tx| match tx.try_send(info.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).senders.len()
    }
}

/// Handle returned by [`AnalysisEngine::subscribe`].
///
/// Dropping it keeps the subscription alive; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove the channel.
#[must_use = "the channel stays subscribed until `unsubscribe` is called"]
pub struct Subscription {
    id: u64,
    mailboxes: Weak<Mutex<Mailboxes>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(mailboxes) = self.mailboxes.upgrade() {
            lock(&mailboxes).senders.remove(&self.id);
        }
    }
}
