//! Minimum-dwell busy indicator.
//!
//! Once shown, the indicator stays visible for at least `min_dwell`, however
//! quickly the caller's busy signal drops again. States:
//!
//! - hidden
//! - visible, stamped with the instant it opened
//! - visible with a scheduled hide pending
//!
//! Scheduling uses the tokio clock, so the timer must be driven from inside a
//! runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MIN_DWELL: Duration = Duration::from_millis(1200);

#[derive(Debug, Default)]
struct PresenceState {
    visible: bool,
    opened_at: Option<Instant>,
    pending_hide: Option<CancellationToken>,
}

impl PresenceState {
    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending_hide.take() {
            token.cancel();
        }
    }
}

#[derive(Clone)]
pub struct PresenceTimer {
    min_dwell: Duration,
    state: Arc<Mutex<PresenceState>>,
    visible_tx: Arc<watch::Sender<bool>>,
}

impl PresenceTimer {
    pub fn new(min_dwell: Duration) -> Self {
        let (visible_tx, _) = watch::channel(false);
        Self {
            min_dwell,
            state: Arc::new(Mutex::new(PresenceState::default())),
            visible_tx: Arc::new(visible_tx),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    /// Receiver that observes every visibility change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.visible_tx.subscribe()
    }

    /// Feed the caller's current busy signal.
    pub fn set_requested_open(&self, open: bool) {
        let mut state = self.lock();
        if open {
            state.cancel_pending();
            state.opened_at = Some(Instant::now());
            if !state.visible {
                state.visible = true;
                self.visible_tx.send_replace(true);
            }
            debug!("presence opened");
            return;
        }

        if !state.visible || state.pending_hide.is_some() {
            return;
        }

        let elapsed = state
            .opened_at
            .map(|opened| opened.elapsed())
            .unwrap_or(self.min_dwell);
        if elapsed >= self.min_dwell {
            self.hide(&mut state);
            return;
        }

        let remaining = self.min_dwell - elapsed;
        let token = CancellationToken::new();
        state.pending_hide = Some(token.clone());
        debug!(remaining_ms = remaining.as_millis() as u64, "presence hide scheduled");

        let timer = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(remaining) => {
                    let mut state = timer.lock();
                    // A reopen cancels under the same lock, so a cancelled
                    // token here means this hide lost the race.
                    if !token.is_cancelled() {
                        state.pending_hide = None;
                        timer.hide(&mut state);
                    }
                }
            }
        });
    }

    fn hide(&self, state: &mut PresenceState) {
        state.visible = false;
        state.opened_at = None;
        self.visible_tx.send_replace(false);
        debug!("presence hidden");
    }

    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PresenceTimer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DWELL)
    }
}
