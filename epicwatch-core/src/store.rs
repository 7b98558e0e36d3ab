//! Project state store
//!
//! Holds the one [`ProjectStateTree`] of a session together with the
//! side-channels the UI reads: auto-expand requests, the recent activity
//! feed, and a version counter bumped on every change. Only the session
//! pipeline writes to it.
//!
//! Expand requests are numbered, not just remembered: a story started a
//! second time gets a new number so the UI opens it again even after the
//! user collapsed it.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::envelope::EventEnvelope;
use crate::reconciler::{self, ApplyOutcome};
use crate::types::{Epic, ExpandTarget, ProjectStateTree, Story};

/// One applied event as shown in the activity feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    /// Monotonic position in the feed, never reused within a session
    pub ordinal: u64,
    pub run_id: String,
    pub sequence_id: u64,
    pub event_type: String,
    pub summary: String,
    pub emitted_at: Option<DateTime<Utc>>,
    /// `updated`, `unresolved` or `ignored`
    pub outcome: &'static str,
}

/// Mutable state tree plus UI side-channels
#[derive(Debug)]
pub struct ProjectStore {
    tree: ProjectStateTree,
    /// Latest request number per node
    expand_requests: BTreeMap<ExpandTarget, u64>,
    expand_counter: u64,
    activity: VecDeque<ActivityEntry>,
    activity_capacity: usize,
    next_ordinal: u64,
    version: u64,
}

impl ProjectStore {
    pub fn new(activity_capacity: usize) -> Self {
        Self {
            tree: ProjectStateTree::default(),
            expand_requests: BTreeMap::new(),
            expand_counter: 0,
            activity: VecDeque::new(),
            activity_capacity,
            next_ordinal: 1,
            version: 0,
        }
    }

    pub fn tree(&self) -> &ProjectStateTree {
        &self.tree
    }

    pub fn epic(&self, epic_id: u32) -> Option<&Epic> {
        self.tree.epic(epic_id)
    }

    pub fn story(&self, epic_id: u32, story_id: u32) -> Option<&Story> {
        self.tree.story(epic_id, story_id)
    }

    /// Nodes the reconciler has asked the UI to open, each with the number
    /// of its most recent request. Numbers only grow within a session.
    pub fn expand_requests(&self) -> &BTreeMap<ExpandTarget, u64> {
        &self.expand_requests
    }

    /// Most recent applied events, oldest first
    pub fn activity(&self) -> &VecDeque<ActivityEntry> {
        &self.activity
    }

    /// Incremented on every change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace the whole tree with a fresh snapshot from the backend.
    pub fn replace_tree(&mut self, tree: ProjectStateTree) {
        tracing::info!(
            epics = tree.epics.len(),
            stories = tree.story_count(),
            "Replacing project state from snapshot"
        );
        self.tree = tree;
        self.version += 1;
    }

    /// Apply one ordered event through the reconciler and record it.
    pub fn apply(&mut self, envelope: &EventEnvelope) -> ApplyOutcome {
        let outcome = reconciler::apply(&mut self.tree, envelope);
        if let ApplyOutcome::Updated { expand } = &outcome {
            for target in expand {
                self.expand_counter += 1;
                self.expand_requests.insert(*target, self.expand_counter);
            }
        }
        self.record(envelope, &outcome);
        self.version += 1;
        outcome
    }

    /// Bump the version for changes that live outside the tree
    pub fn touch(&mut self) {
        self.version += 1;
    }

    fn record(&mut self, envelope: &EventEnvelope, outcome: &ApplyOutcome) {
        if self.activity_capacity == 0 {
            return;
        }
        let entry = ActivityEntry {
            ordinal: self.next_ordinal,
            run_id: envelope.run_id.clone(),
            sequence_id: envelope.sequence_id,
            event_type: envelope.event_type.clone(),
            summary: reconciler::describe(envelope),
            emitted_at: envelope.emitted_at(),
            outcome: outcome.as_str(),
        };
        self.next_ordinal += 1;
        self.activity.push_back(entry);
        while self.activity.len() > self.activity_capacity {
            self.activity.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoryStatus;
    use serde_json::json;

    fn snapshot() -> ProjectStateTree {
        serde_json::from_value(json!({
            "epics": [{"id": 1, "stories": [{"id": 4, "status": "backlog"}]}]
        }))
        .unwrap()
    }

    fn transition(seq: u64, action: &str) -> EventEnvelope {
        EventEnvelope {
            event_type: "story_transition".to_string(),
            timestamp: 1760000000.0,
            run_id: "r1".to_string(),
            sequence_id: seq,
            data: json!({"epic_num": 1, "story_num": 4, "action": action}),
        }
    }

    #[test]
    fn test_replace_tree_is_atomic_and_bumps_version() {
        let mut store = ProjectStore::new(10);
        store.replace_tree(snapshot());
        assert_eq!(store.version(), 1);
        assert!(store.story(1, 4).is_some());

        store.replace_tree(ProjectStateTree::default());
        assert!(store.epic(1).is_none());
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_apply_records_expansion_and_activity() {
        let mut store = ProjectStore::new(10);
        store.replace_tree(snapshot());

        store.apply(&transition(1, "started"));

        assert_eq!(store.story(1, 4).unwrap().status, StoryStatus::InProgress);
        let requests = store.expand_requests();
        assert!(requests.contains_key(&ExpandTarget::Epic { epic: 1 }));
        assert!(requests.contains_key(&ExpandTarget::Story { epic: 1, story: 4 }));

        let entry = store.activity().back().unwrap();
        assert_eq!(entry.ordinal, 1);
        assert_eq!(entry.summary, "story 1.4 started");
        assert_eq!(entry.outcome, "updated");
    }

    #[test]
    fn test_restarted_story_gets_new_expand_request() {
        let mut store = ProjectStore::new(10);
        store.replace_tree(snapshot());
        let story = ExpandTarget::Story { epic: 1, story: 4 };

        store.apply(&transition(1, "started"));
        let first = store.expand_requests()[&story];

        store.apply(&transition(2, "completed"));
        assert_eq!(store.expand_requests()[&story], first);

        store.apply(&transition(3, "started"));
        assert!(store.expand_requests()[&story] > first);
        assert!(store.expand_requests()[&ExpandTarget::Epic { epic: 1 }] > first);
    }

    #[test]
    fn test_activity_feed_is_bounded() {
        let mut store = ProjectStore::new(3);
        for seq in 1..=5 {
            store.apply(&transition(seq, "completed"));
        }
        let ordinals: Vec<u64> = store.activity().iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, vec![3, 4, 5]);
        assert!(store.activity().iter().all(|e| e.outcome == "unresolved"));
    }
}
