//! Per-session turn ordering.
//!
//! One turn per session runs at a time; later turns wait in arrival order
//! (the keyed locks are fair). Different sessions never wait on each other.
//! The running turn of a session can be stopped through its cancellation
//! token.

use parley_core::keyed_lock::KeyedLocks;
use parley_core::message::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Running = Arc<Mutex<HashMap<SessionId, (u64, CancellationToken)>>>;

#[derive(Default)]
pub struct TurnScheduler {
    locks: KeyedLocks<SessionId>,
    running: Running,
    next_turn: AtomicU64,
}

/// The right to run one turn. Dropping it lets the next queued turn start.
pub struct TurnPermit {
    session_id: SessionId,
    turn: u64,
    token: CancellationToken,
    running: Running,
    _guard: OwnedMutexGuard<()>,
}

impl TurnPermit {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.get(&self.session_id).is_some_and(|(turn, _)| *turn == self.turn) {
            running.remove(&self.session_id);
        }
    }
}

impl TurnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `session_id` has no turn in flight, then claim it.
    pub async fn acquire(&self, session_id: &SessionId) -> TurnPermit {
        let guard = self.locks.lock(session_id).await;
        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), (turn, token.clone()));
        debug!(session_id = %session_id, turn, "Turn admitted");
        TurnPermit {
            session_id: session_id.clone(),
            turn,
            token,
            running: self.running.clone(),
            _guard: guard,
        }
    }

    /// Stop the turn currently running for `session_id`.
    ///
    /// Returns `false` when nothing is running. Queued turns are unaffected.
    pub fn stop(&self, session_id: &SessionId) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(session_id) {
            Some((turn, token)) => {
                debug!(session_id = %session_id, turn, "Stop requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &SessionId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_turns_run_in_arrival_order() {
        let scheduler = Arc::new(TurnScheduler::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let id = SessionId::from("s1");

        let first = scheduler.acquire(&id).await;
        let mut waiters = Vec::new();
        for n in 0..3 {
            let scheduler = scheduler.clone();
            let order = order.clone();
            let id = id.clone();
            waiters.push(tokio::spawn(async move {
                let _permit = scheduler.acquire(&id).await;
                order.lock().await.push(n);
            }));
            // Let each waiter queue before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(first);
        for w in waiters {
            w.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn other_sessions_are_not_blocked() {
        let scheduler = TurnScheduler::new();
        let _a = scheduler.acquire(&SessionId::from("a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            scheduler.acquire(&SessionId::from("b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn stop_cancels_only_the_running_turn() {
        let scheduler = TurnScheduler::new();
        let id = SessionId::from("s1");
        assert!(!scheduler.stop(&id));

        let permit = scheduler.acquire(&id).await;
        let token = permit.token();
        assert!(scheduler.is_running(&id));
        assert!(scheduler.stop(&id));
        assert!(token.is_cancelled());
        drop(permit);

        assert!(!scheduler.is_running(&id));
        let next = scheduler.acquire(&id).await;
        assert!(!next.token().is_cancelled());
    }
}
