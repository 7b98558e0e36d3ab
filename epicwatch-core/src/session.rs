//! The dashboard session
//!
//! A [`DashboardSession`] owns everything with state: the connection
//! manager, the sequencer for the active run, and the project store. Each
//! inbound message runs through one synchronous pipeline:
//!
//! ```text
//! SseMessage ─▶ liveness? ─▶ JSON ─▶ validate ─▶ RunSequencer::ingest ─▶ ProjectStore::apply (each released)
//! ```
//!
//! Nothing in the pipeline returns an error. Malformed messages are logged
//! and counted; unresolved references are silent no-ops.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::connection::{ConnectionManager, OpenOutcome, ScheduledReconnect};
use crate::envelope;
use crate::reconciler::ApplyOutcome;
use crate::sequencer::{RunSequencer, SequencerStats};
use crate::sse::SseMessage;
use crate::store::{ActivityEntry, ProjectStore};
use crate::types::{ExpandTarget, ProjectStateTree, SessionStatus};

/// Stream messages that only signal liveness and never reach the reconciler
pub const LIVENESS_EVENTS: [&str; 3] = ["heartbeat", "status", "connected"];

/// Session-level counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Messages dropped by JSON decoding or envelope validation
    pub invalid_messages: u64,
    /// Liveness pings received
    pub heartbeats: u64,
    /// Events that changed the tree
    pub applied: u64,
    /// Events whose epic/story/phase was not in the tree
    pub unresolved: u64,
    /// Events of unknown kind or action
    pub ignored: u64,
    /// Successful full-state replacements
    pub resyncs: u64,
    /// Failed full-state fetches
    pub resync_failures: u64,
    /// Transport failures seen
    pub transport_errors: u64,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Heartbeat or connection ping
    Liveness,
    /// Dropped: not JSON or not a valid envelope
    Invalid(String),
    /// Dropped: arrived while the stream was not open
    NotOpen,
    /// Passed to the sequencer, which released `released` events
    Sequenced { released: usize },
}

/// Read-only snapshot of a session for the UI
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    /// Bumped on every change
    pub version: u64,
    pub status: SessionStatus,
    pub tree: ProjectStateTree,
    pub run_id: Option<String>,
    pub last_sequence: u64,
    /// Events buffered behind a gap
    pub pending: usize,
    /// Sequence the buffer is waiting for
    pub waiting_for: Option<u64>,
    /// Auto-expand requests with their request numbers; honour any
    /// number above the last one seen
    pub expand_requests: BTreeMap<ExpandTarget, u64>,
    pub activity: Vec<ActivityEntry>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Pending reconnect as `(attempt, delay_ms)`
    pub reconnect: Option<(u32, u64)>,
    pub stats: SessionStats,
    pub sequencer: SequencerStats,
}

/// One dashboard session: connection, ordering state and project tree
#[derive(Debug)]
pub struct DashboardSession {
    connection: ConnectionManager,
    sequencer: RunSequencer,
    store: ProjectStore,
    stats: SessionStats,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl DashboardSession {
    pub fn new(config: &Config) -> Self {
        Self {
            connection: ConnectionManager::new(&config.reconnect),
            sequencer: RunSequencer::new(config.sequencer.dedup_window),
            store: ProjectStore::new(config.sequencer.recent_activity),
            stats: SessionStats::default(),
            last_heartbeat: None,
        }
    }

    // ========== Connection lifecycle ==========

    /// Begin a connection attempt, cancelling any pending reconnect
    pub fn begin_connect(&mut self) {
        self.connection.connect();
        self.store.touch();
    }

    pub fn on_open(&mut self) -> OpenOutcome {
        let outcome = self.connection.on_open();
        self.store.touch();
        outcome
    }

    pub fn on_clean_close(&mut self) {
        self.connection.on_clean_close();
        self.store.touch();
    }

    pub fn on_transport_error(&mut self, reason: &str) -> ScheduledReconnect {
        self.stats.transport_errors += 1;
        let scheduled = self.connection.on_error(reason);
        self.store.touch();
        scheduled
    }

    /// Tear down: cancels any pending reconnect
    pub fn shutdown(&mut self) {
        self.connection.shutdown();
        tracing::info!(
            applied = self.stats.applied,
            unresolved = self.stats.unresolved,
            ignored = self.stats.ignored,
            invalid = self.stats.invalid_messages,
            duplicates = self.sequencer.stats().duplicates,
            pending = self.sequencer.pending_len(),
            resyncs = self.stats.resyncs,
            transport_errors = self.stats.transport_errors,
            "Dashboard session stats"
        );
    }

    // ========== Resync ==========

    /// Replace the tree with a full snapshot
    pub fn replace_tree(&mut self, tree: ProjectStateTree) {
        self.stats.resyncs += 1;
        self.store.replace_tree(tree);
    }

    pub fn record_resync_failure(&mut self, error: &crate::error::Error) {
        self.stats.resync_failures += 1;
        tracing::warn!(error = %error, "Full state resync failed, keeping current tree");
    }

    // ========== Message pipeline ==========

    /// Handle one server-sent message
    pub fn handle_message(&mut self, message: &SseMessage) -> MessageOutcome {
        if LIVENESS_EVENTS.contains(&message.name()) {
            self.stats.heartbeats += 1;
            self.last_heartbeat = Some(Utc::now());
            tracing::trace!(event = %message.name(), "Liveness ping");
            self.store.touch();
            return MessageOutcome::Liveness;
        }

        if !self.connection.is_open() {
            tracing::debug!(event = %message.name(), "Dropping message received while not open");
            return MessageOutcome::NotOpen;
        }

        let raw: Value = match serde_json::from_str(&message.data) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.invalid_messages += 1;
                tracing::warn!(event = %message.name(), error = %e, "Dropping non-JSON message");
                self.store.touch();
                return MessageOutcome::Invalid(format!("invalid JSON: {}", e));
            }
        };
        self.handle_raw(&raw)
    }

    /// Validate, sequence and apply one decoded message body
    pub fn handle_raw(&mut self, raw: &Value) -> MessageOutcome {
        let envelope = match envelope::validate(raw) {
            Ok(envelope) => envelope,
            Err(failure) => {
                self.stats.invalid_messages += 1;
                tracing::warn!(reason = %failure, "Dropping malformed event envelope");
                self.store.touch();
                return MessageOutcome::Invalid(failure.to_string());
            }
        };

        let released = self.sequencer.ingest(envelope);
        for event in &released {
            match self.store.apply(event) {
                ApplyOutcome::Updated { .. } => self.stats.applied += 1,
                ApplyOutcome::Unresolved => self.stats.unresolved += 1,
                ApplyOutcome::Ignored => self.stats.ignored += 1,
            }
            tracing::debug!(
                run_id = %event.run_id,
                sequence_id = event.sequence_id,
                event_type = %event.event_type,
                "Applied event"
            );
        }
        if released.is_empty() {
            self.store.touch();
        }
        MessageOutcome::Sequenced {
            released: released.len(),
        }
    }

    // ========== Read access ==========

    pub fn status(&self) -> SessionStatus {
        self.connection.status()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn sequencer(&self) -> &RunSequencer {
        &self.sequencer
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Snapshot everything the UI renders
    pub fn view(&self) -> DashboardView {
        DashboardView {
            version: self.store.version(),
            status: self.connection.status(),
            tree: self.store.tree().clone(),
            run_id: self.sequencer.current_run_id().map(str::to_string),
            last_sequence: self.sequencer.last_applied(),
            pending: self.sequencer.pending_len(),
            waiting_for: self.sequencer.waiting_for(),
            expand_requests: self.store.expand_requests().clone(),
            activity: self.store.activity().iter().cloned().collect(),
            last_heartbeat: self.last_heartbeat,
            reconnect: self
                .connection
                .pending_reconnect()
                .map(|r| (r.attempt, r.delay.as_millis() as u64)),
            stats: self.stats,
            sequencer: self.sequencer.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoryStatus;
    use serde_json::json;

    fn open_session() -> DashboardSession {
        let mut session = DashboardSession::new(&Config::default());
        session.replace_tree(
            serde_json::from_value(json!({
                "epics": [
                    {"id": 1, "stories": [{"id": 4, "status": "ready-for-dev"}]},
                    {"id": 2, "stories": [{"id": 3, "status": "ready-for-dev"}]}
                ]
            }))
            .unwrap(),
        );
        session.begin_connect();
        session.on_open();
        session
    }

    fn sse(event: Option<&str>, data: Value) -> SseMessage {
        SseMessage {
            event: event.map(str::to_string),
            data: data.to_string(),
            id: None,
        }
    }

    fn story_status(seq: u64, story: u32, status: &str) -> Value {
        json!({
            "type": "story_status",
            "timestamp": 1760000000.0,
            "run_id": "r1",
            "sequence_id": seq,
            "data": {"epic_num": 2, "story_num": story, "status": status}
        })
    }

    #[test]
    fn test_duplicate_delivery_leaves_tree_unchanged() {
        let mut session = open_session();
        assert_eq!(
            session.handle_raw(&story_status(1, 3, "in-progress")),
            MessageOutcome::Sequenced { released: 1 }
        );
        assert_eq!(
            session.store().story(2, 3).unwrap().status,
            StoryStatus::InProgress
        );

        let tree_before = session.store().tree().clone();
        assert_eq!(
            session.handle_raw(&story_status(1, 3, "in-progress")),
            MessageOutcome::Sequenced { released: 0 }
        );
        assert_eq!(session.store().tree(), &tree_before);
        assert_eq!(session.stats().applied, 1);
    }

    #[test]
    fn test_out_of_order_messages_apply_in_sequence() {
        let mut session = open_session();
        session.handle_raw(&story_status(2, 3, "review"));
        assert_eq!(session.view().pending, 1);
        assert_eq!(
            session.store().story(2, 3).unwrap().status,
            StoryStatus::ReadyForDev
        );

        session.handle_raw(&story_status(1, 3, "in-progress"));
        assert_eq!(session.store().story(2, 3).unwrap().status, StoryStatus::Review);
        assert_eq!(session.view().last_sequence, 2);
    }

    #[test]
    fn test_malformed_message_is_dropped_and_stream_continues() {
        let mut session = open_session();

        let outcome = session.handle_message(&sse(None, json!({"type": "story_status"})));
        assert!(matches!(outcome, MessageOutcome::Invalid(_)));

        let garbage = SseMessage {
            event: None,
            data: "{not json".to_string(),
            id: None,
        };
        assert!(matches!(
            session.handle_message(&garbage),
            MessageOutcome::Invalid(_)
        ));
        assert_eq!(session.stats().invalid_messages, 2);

        session.handle_message(&sse(Some("story_status"), story_status(1, 3, "done")));
        assert_eq!(session.store().story(2, 3).unwrap().status, StoryStatus::Done);
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_liveness_messages_never_reach_reconciler() {
        let mut session = open_session();
        let before = session.store().tree().clone();

        for name in LIVENESS_EVENTS {
            assert_eq!(
                session.handle_message(&sse(Some(name), json!({"status": "connected"}))),
                MessageOutcome::Liveness
            );
        }
        assert_eq!(session.stats().heartbeats, 3);
        assert!(session.view().last_heartbeat.is_some());
        assert_eq!(session.store().tree(), &before);
        assert_eq!(session.sequencer().current_run_id(), None);
    }

    #[test]
    fn test_messages_while_not_open_are_dropped() {
        let mut session = DashboardSession::new(&Config::default());
        assert_eq!(
            session.handle_message(&sse(None, story_status(1, 3, "done"))),
            MessageOutcome::NotOpen
        );
        assert_eq!(session.sequencer().last_applied(), 0);
    }

    #[test]
    fn test_transition_started_flags_expansion_in_view() {
        let mut session = open_session();
        session.handle_raw(&json!({
            "type": "story_transition",
            "timestamp": 1760000000.0,
            "run_id": "r1",
            "sequence_id": 1,
            "data": {"epic_num": 1, "story_num": 4, "action": "started"}
        }));

        let view = session.view();
        assert!(view.expand_requests.contains_key(&ExpandTarget::Epic { epic: 1 }));
        assert!(view
            .expand_requests
            .contains_key(&ExpandTarget::Story { epic: 1, story: 4 }));
        assert_eq!(view.activity.last().unwrap().summary, "story 1.4 started");
    }

    #[test]
    fn test_view_reflects_reconnect_and_version_moves() {
        let mut session = open_session();
        let v0 = session.view().version;

        session.on_transport_error("connection reset");
        let view = session.view();
        assert_eq!(view.status, SessionStatus::Stopped);
        assert_eq!(view.reconnect, Some((1, 1000)));
        assert!(view.version > v0);

        session.shutdown();
        assert_eq!(session.view().reconnect, None);
    }

    #[test]
    fn test_resync_replaces_tree_without_touching_ordering() {
        let mut session = open_session();
        session.handle_raw(&story_status(1, 3, "review"));

        session.replace_tree(ProjectStateTree::default());
        assert!(session.store().epic(2).is_none());
        assert_eq!(session.sequencer().last_applied(), 1);
        assert_eq!(session.stats().resyncs, 2);
    }
}
