//! Buffering for briefly-disconnected users
//!
//! When an authenticated session tears down, its user identity and a frozen
//! copy of its filter matrix are kept for a grace window. Calls that would
//! have matched keep accumulating in a bounded FIFO (drop-oldest) buffer and
//! are replayed, paced, into the next session the user opens. Records the
//! grace window outlives are invisible to ingest and swept periodically.

use crate::commands::OutboundMessage;
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wavecap_core::access;
use wavecap_core::config::ReconnectionConfig;
use wavecap_core::directory::Directory;
use wavecap_core::types::{Call, FilterMatrix, User, UserKey};

/// Pause between replayed frames, preserving order under backpressure
const REPLAY_SPACING: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct DisconnectedState {
    user: Arc<User>,
    last_seen: Instant,
    filter: FilterMatrix,
    missed: VecDeque<Arc<Call>>,
    max_buffer: usize,
}

/// Snapshot of the manager for the health surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionStats {
    /// Whether buffering is enabled at all
    pub enabled: bool,
    /// Users currently holding a disconnected-state record
    pub disconnected_users: usize,
    /// Calls buffered across all records
    pub buffered_calls: usize,
}

/// Keeps per-user buffers across short disconnects
#[derive(Debug)]
pub struct ReconnectionManager {
    states: Mutex<HashMap<UserKey, DisconnectedState>>,
    enabled: bool,
    grace: Duration,
    max_buffer: usize,
    user_auth_required: bool,
}

impl ReconnectionManager {
    /// Build from configuration
    #[must_use]
    pub fn new(config: &ReconnectionConfig, user_auth_required: bool) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            enabled: config.enabled,
            grace: Duration::from_secs(config.grace_secs),
            max_buffer: config.buffer_max,
            user_auth_required,
        }
    }

    /// Snapshot a closing session so its user can pick up where they left off
    pub fn on_disconnect(&self, session: &Session) {
        if !self.enabled {
            return;
        }
        let Some(user) = session.user() else {
            return;
        };
        // A revoked or expired user gets no buffer
        if user.pin_expired(wavecap_core::utils::now_ms()) {
            return;
        }

        let key = UserKey::for_user(&user);
        let mut states = self.states.lock();
        states.insert(
            key.clone(),
            DisconnectedState {
                user,
                last_seen: Instant::now(),
                // Frozen copy; later client filter changes do not apply
                filter: session.filter(),
                missed: VecDeque::with_capacity(self.max_buffer),
                max_buffer: self.max_buffer,
            },
        );

        tracing::debug!(user = %key, "saved disconnected state");
    }

    /// Offer a freshly persisted call to every in-grace record
    ///
    /// No outbox I/O happens here; the walk is O(records).
    pub fn on_call_persisted(&self, call: &Arc<Call>, directory: &Directory) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        let mut states = self.states.lock();

        for state in states.values_mut() {
            // Expired records are invisible to ingest; the sweeper removes them
            if now.duration_since(state.last_seen) > self.grace {
                continue;
            }

            if !state.filter.accepts(call.system_ref, call.talkgroup_ref) {
                continue;
            }

            if self.user_auth_required && !access::authorize(&state.user, call, directory) {
                continue;
            }

            if state.missed.len() >= state.max_buffer {
                state.missed.pop_front();
            }
            state.missed.push_back(Arc::clone(call));
        }
    }

    /// Consume the user's record into a fresh session
    ///
    /// Installs the frozen filter matrix (the client may override it later)
    /// and replays the buffer in FIFO order on a detached task, pacing sends
    /// and stopping early if the new outbox fills. Returns the number of
    /// buffered calls, or `None` when there was no usable record.
    pub fn restore(&self, session: &Arc<Session>) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        let user = session.user()?;
        let key = UserKey::for_user(&user);

        let state = {
            let mut states = self.states.lock();
            let expired = states
                .get(&key)
                .is_some_and(|s| s.last_seen.elapsed() > self.grace);
            if expired {
                states.remove(&key);
                tracing::debug!(user = %key, "grace window expired, record dropped");
                return None;
            }
            states.remove(&key)?
        };

        session.set_filter(state.filter);

        let buffered = state.missed.len();
        if buffered == 0 {
            tracing::debug!(user = %key, "reconnected with no missed calls");
            return Some(0);
        }

        let session = Arc::clone(session);
        let missed = state.missed;
        tokio::spawn(async move {
            let mut sent = 0usize;
            for call in missed {
                if !session.try_send(OutboundMessage::call(&call)) {
                    tracing::warn!(
                        session_id = session.id(),
                        sent,
                        buffered,
                        "outbox full during replay, stopping early"
                    );
                    return;
                }
                sent += 1;
                tokio::time::sleep(REPLAY_SPACING).await;
            }
            tracing::debug!(session_id = session.id(), replayed = sent, "replay complete");
        });

        Some(buffered)
    }

    /// Drop every record older than the grace window, returning how many
    pub fn sweep(&self) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, state| state.last_seen.elapsed() <= self.grace);
        let removed = before - states.len();
        if removed > 0 {
            tracing::info!(removed, "swept expired reconnection records");
        }
        removed
    }

    /// Run the periodic sweeper until the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }

    /// Current record counts
    #[must_use]
    pub fn stats(&self) -> ReconnectionStats {
        let states = self.states.lock();
        ReconnectionStats {
            enabled: self.enabled,
            disconnected_users: states.len(),
            buffered_calls: states.values().map(|s| s.missed.len()).sum(),
        }
    }
}
