//! Per-connection session state
//!
//! A session owns a bounded outbox drained by the transport's write side and
//! a shutdown signal that both transport tasks watch. Everything the
//! dispatcher reads is lock-protected and never held across I/O.

use crate::commands::OutboundMessage;
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use wavecap_core::types::{FilterMatrix, User};
use wavecap_core::ErrorKind;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, no credentials yet
    Connected,
    /// Credentials accepted, no filter submitted
    Authenticated,
    /// Receiving the live feed
    Live,
    /// Live fan-out suppressed, calls played on request
    Playback,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether the session has passed authentication
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Live | Self::Playback)
    }
}

/// Receiving ends handed to the transport when a session is opened
#[derive(Debug)]
pub struct SessionReceivers {
    /// Outbound frames to write to the client
    pub outbox: mpsc::Receiver<OutboundMessage>,
    /// Becomes true when the session must close
    pub shutdown: watch::Receiver<bool>,
}

/// One live client connection
#[derive(Debug)]
pub struct Session {
    id: u64,
    remote_ip: IpAddr,
    user: RwLock<Option<Arc<User>>>,
    filter: RwLock<FilterMatrix>,
    state: RwLock<SessionState>,
    outbox: mpsc::Sender<OutboundMessage>,
    dropped: AtomicU64,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Build a session and the receivers its transport will drain
    #[must_use]
    pub fn new(id: u64, remote_ip: IpAddr, outbox_capacity: usize) -> (Arc<Self>, SessionReceivers) {
        let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            remote_ip,
            user: RwLock::new(None),
            filter: RwLock::new(FilterMatrix::new()),
            state: RwLock::new(SessionState::Connected),
            outbox: outbox_tx,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: shutdown_tx,
        });

        (
            session,
            SessionReceivers {
                outbox: outbox_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Registry-assigned session id
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Peer address the transport reported
    #[must_use]
    pub const fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    /// The authenticated user, if any
    #[must_use]
    pub fn user(&self) -> Option<Arc<User>> {
        self.user.read().clone()
    }

    /// Install the authenticated user
    pub fn set_user(&self, user: Arc<User>) {
        *self.user.write() = Some(user);
    }

    /// Snapshot of the current filter matrix
    #[must_use]
    pub fn filter(&self) -> FilterMatrix {
        self.filter.read().clone()
    }

    /// Whether the filter accepts a (system, talkgroup) pair
    #[must_use]
    pub fn filter_accepts(&self, system: i32, talkgroup: i32) -> bool {
        self.filter.read().accepts(system, talkgroup)
    }

    /// Replace the filter matrix
    pub fn set_filter(&self, filter: FilterMatrix) {
        *self.filter.write() = filter;
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to a new lifecycle state; `Closed` is terminal
    pub fn set_state(&self, state: SessionState) {
        let mut guard = self.state.write();
        if *guard != SessionState::Closed {
            *guard = state;
        }
    }

    /// Whether live calls flow to this session right now
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() == SessionState::Live
    }

    /// Enqueue a frame without blocking
    ///
    /// Returns false and bumps the dropped counter when the outbox is full
    /// or the transport has gone away.
    pub fn try_send(&self, message: OutboundMessage) -> bool {
        match self.outbox.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Frames dropped because the outbox was full
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether a close has been requested or completed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Force-close the session with a single terminal `error` frame
    ///
    /// Idempotent: only the first caller emits the frame. The transport
    /// observes the shutdown signal and tears the connection down.
    pub fn close_with_error(&self, kind: ErrorKind, message: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self
            .outbox
            .try_send(OutboundMessage::error_with_message(kind, message));
        self.set_state(SessionState::Closed);
        let _ = self.shutdown.send(true);
    }

    /// Close without an error frame (normal transport teardown)
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Closed);
        let _ = self.shutdown.send(true);
    }
}
