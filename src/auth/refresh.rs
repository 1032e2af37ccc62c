//! Single-flight access token refresh
//!
//! Any number of requests may see a 401 at the same time; only the first one
//! to arrive while the coordinator is idle performs the refresh. The rest
//! park on a oneshot channel and are woken with the outcome, in arrival
//! order, when the refresh settles.
//!
//! The mutex is never held across an `.await`: the idle check and the switch
//! to refreshing happen in one critical section, and so do taking the queue
//! and switching back to idle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::api::error::AuthExpiredReason;

/// New access token, or the reason the session could not be renewed.
pub type RefreshOutcome = Result<String, AuthExpiredReason>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    pending: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// What a request that just saw a 401 should do next.
pub enum Ticket<'a> {
    /// This caller owns the refresh and must settle the lease.
    Lead(RefreshLease<'a>),
    /// A refresh is already running; await its outcome.
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// The token was replaced after this request went out; replay with it.
    Replay(String),
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of requests parked behind the current refresh.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Called after a 401. `sent_with` is the token the failed request
    /// carried, `current` the token in the store right now.
    pub fn enter(&self, sent_with: Option<&str>, current: Option<&str>) -> Ticket<'_> {
        let mut state = self.lock();

        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            tracing::debug!("Refresh in flight, queued request ({} waiting)", state.pending.len());
            return Ticket::Wait(rx);
        }

        if let Some(current) = current {
            if sent_with != Some(current) {
                tracing::debug!("Access token already rotated, replaying without refresh");
                return Ticket::Replay(current.to_string());
            }
        }

        state.refreshing = true;
        tracing::info!("Access token rejected, starting refresh");
        Ticket::Lead(RefreshLease {
            coordinator: self,
            settled: false,
        })
    }

    /// Return to idle and wake every waiter with `outcome`.
    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.lock();
            state.refreshing = false;
            std::mem::take(&mut state.pending)
        };

        match outcome {
            Ok(_) => tracing::info!("Token refreshed, replaying {} queued request(s)", waiters.len()),
            Err(reason) => tracing::warn!(
                "Token refresh failed ({}), rejecting {} queued request(s)",
                reason,
                waiters.len()
            ),
        }

        for waiter in waiters {
            // Receiver gone means the caller stopped waiting; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Proof of owning the in-flight refresh. Dropping it unsettled (the leading
/// future was cancelled) fails the cycle so waiters are never stranded.
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    pub fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&Err(AuthExpiredReason::RefreshFailed(
                "refresh was abandoned".to_string(),
            )));
        }
    }
}
