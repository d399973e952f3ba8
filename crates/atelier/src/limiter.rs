//! Leading-edge + coalesced-trailing scheduler for expensive refresh work.
//!
//! The first trigger in a quiet period fires immediately; triggers that
//! arrive inside `min_interval` of the last fire are coalesced into a
//! single trailing fire at `last + min_interval`, carrying only the most
//! recent action. At most one trailing trigger is pending at any time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct RefreshLimiter {
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    last_fire: Option<Instant>,
    pending: Option<JoinHandle<()>>,
}

impl RefreshLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Request a refresh. Fires `action` immediately when outside the
    /// interval, otherwise supersedes any pending trailing fire with this
    /// action. A cancelled `cancel` token skips the action on both paths.
    pub fn try_update<F>(self: &Arc<Self>, cancel: CancellationToken, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        let now = Instant::now();

        match state.last_fire {
            Some(last) if now.duration_since(last) < self.min_interval => {
                if let Some(pending) = state.pending.take() {
                    pending.abort();
                }
                let fire_at = last + self.min_interval;
                let limiter = Arc::clone(self);
                state.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(fire_at).await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    {
                        let mut state = limiter.state.lock();
                        state.last_fire = Some(Instant::now());
                        state.pending = None;
                    }
                    action.await;
                }));
            }
            _ => {
                state.last_fire = Some(now);
                drop(state);
                tokio::spawn(async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    action.await;
                });
            }
        }
    }

    /// True when a trailing fire is scheduled and has not run yet.
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}
