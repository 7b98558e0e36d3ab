//! Push-connection lifecycle
//!
//! [`ConnectionManager`] is the state machine behind the event stream. It
//! performs no IO: the async driver in [`crate::runner`] reports transport
//! events to it and acts on what it returns.
//!
//! ```text
//!            connect()                on_open()
//!   (none) ───────────▶ Connecting ─────────────▶ Open
//!                          ▲   │                  │  │
//!                          │   │ on_error()       │  │ on_clean_close()
//!       reconnect timer /  │   ▼                  │  ▼
//!       manual connect()   ClosedError ◀──────────┘  ClosedClean
//! ```
//!
//! Errors schedule a reconnect after the current backoff delay, which then
//! doubles up to a ceiling. A successful open resets the delay to its floor.
//! A clean close never reconnects on its own.

use std::time::{Duration, Instant};

use crate::config::ReconnectConfig;
use crate::types::SessionStatus;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedClean,
    ClosedError,
}

/// Exponential backoff between a floor and a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(base);
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// Delay to use now; the following call returns double, capped.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay the next failure would be scheduled with
    pub fn peek(&self) -> Duration {
        self.current
    }
}

/// A reconnect the driver must perform unless it is cancelled first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReconnect {
    pub delay: Duration,
    pub due_at: Instant,
    /// Consecutive failures that led to this reconnect
    pub attempt: u32,
}

/// What the driver must do after a successful open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOutcome {
    /// Events may have been missed while disconnected; refetch the tree
    pub resync: bool,
}

/// Owns the connection state, status signal and reconnect timer
#[derive(Debug)]
pub struct ConnectionManager {
    state: Option<ConnectionState>,
    status: SessionStatus,
    backoff: Backoff,
    has_opened: bool,
    consecutive_failures: u32,
    reconnect: Option<ScheduledReconnect>,
    connect_attempts: u64,
}

impl ConnectionManager {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            state: None,
            status: SessionStatus::Idle,
            backoff: Backoff::new(config.base(), config.ceiling()),
            has_opened: false,
            consecutive_failures: 0,
            reconnect: None,
            connect_attempts: 0,
        }
    }

    /// Start a connection attempt. Supersedes any pending reconnect.
    pub fn connect(&mut self) {
        if self.cancel_reconnect() {
            tracing::debug!("Manual connect superseded pending reconnect");
        }
        self.connect_attempts += 1;
        self.state = Some(ConnectionState::Connecting);
        tracing::debug!(attempt = self.connect_attempts, "Connecting to event stream");
    }

    /// The stream handshake succeeded.
    pub fn on_open(&mut self) -> OpenOutcome {
        let resync = self.has_opened;
        self.has_opened = true;
        self.consecutive_failures = 0;
        self.backoff.reset();
        self.reconnect = None;
        self.state = Some(ConnectionState::Open);
        self.status = SessionStatus::Running;
        tracing::info!(resync, "Event stream open");
        OpenOutcome { resync }
    }

    /// The producer ended the stream without error.
    pub fn on_clean_close(&mut self) {
        self.state = Some(ConnectionState::ClosedClean);
        self.status = SessionStatus::Complete;
        self.reconnect = None;
        tracing::info!("Event stream closed cleanly, workflow complete");
    }

    /// The connection failed or dropped. Returns the scheduled reconnect.
    pub fn on_error(&mut self, reason: &str) -> ScheduledReconnect {
        self.state = Some(ConnectionState::ClosedError);
        self.status = SessionStatus::Stopped;
        self.consecutive_failures += 1;

        let delay = self.backoff.next_delay();
        let scheduled = ScheduledReconnect {
            delay,
            due_at: Instant::now() + delay,
            attempt: self.consecutive_failures,
        };
        tracing::warn!(
            reason,
            attempt = scheduled.attempt,
            delay_ms = delay.as_millis() as u64,
            "Event stream error, reconnect scheduled"
        );
        self.reconnect = Some(scheduled.clone());
        scheduled
    }

    /// Drop the pending reconnect, if any. Returns whether one was pending.
    pub fn cancel_reconnect(&mut self) -> bool {
        self.reconnect.take().is_some()
    }

    /// Session teardown: nothing may fire afterwards.
    pub fn shutdown(&mut self) {
        if self.cancel_reconnect() {
            tracing::debug!("Cancelled pending reconnect on shutdown");
        }
    }

    pub fn pending_reconnect(&self) -> Option<&ScheduledReconnect> {
        self.reconnect.as_ref()
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.state == Some(ConnectionState::Open)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
