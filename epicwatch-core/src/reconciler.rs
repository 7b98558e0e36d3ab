//! Applies ordered events to the project state tree
//!
//! By the time an envelope reaches [`apply`] it is in order and unique, so
//! each handler only has to find its story and set a field. A story that is
//! not in the tree (for example because the initial fetch has not finished)
//! is an expected, silent no-op.

use crate::envelope::{
    DashboardEvent, EventEnvelope, StoryStatusChange, StoryTransition, TransitionAction,
    WorkflowStatus,
};
use crate::types::{ExpandTarget, ProjectStateTree, Story, StoryStatus};

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The tree was updated. `expand` lists nodes the UI should open.
    Updated { expand: Vec<ExpandTarget> },
    /// The referenced epic, story or phase is not in the tree
    Unresolved,
    /// Unknown kind, unknown action, or an undecodable payload
    Ignored,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Updated { .. } => "updated",
            ApplyOutcome::Unresolved => "unresolved",
            ApplyOutcome::Ignored => "ignored",
        }
    }
}

/// Apply one envelope. Never panics and never fails for a validated envelope.
pub fn apply(tree: &mut ProjectStateTree, envelope: &EventEnvelope) -> ApplyOutcome {
    let event = match DashboardEvent::decode(envelope) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                event_type = %envelope.event_type,
                sequence_id = envelope.sequence_id,
                error = %e,
                "Ignoring event with undecodable payload"
            );
            return ApplyOutcome::Ignored;
        }
    };

    match event {
        DashboardEvent::WorkflowStatus(status) => apply_workflow_status(tree, &status),
        DashboardEvent::StoryStatus(change) => apply_story_status(tree, change),
        DashboardEvent::StoryTransition(transition) => apply_story_transition(tree, &transition),
        DashboardEvent::Unknown { event_type } => {
            tracing::debug!(event_type = %event_type, "Ignoring unknown event type");
            ApplyOutcome::Ignored
        }
    }
}

/// Locate a story and run `mutate` on it, or report it unresolved.
fn with_story<F>(tree: &mut ProjectStateTree, epic: u32, story: u32, mutate: F) -> ApplyOutcome
where
    F: FnOnce(&mut Story) -> ApplyOutcome,
{
    match tree.story_mut(epic, story) {
        Some(found) => mutate(found),
        None => {
            tracing::debug!(epic, story, "Event refers to a story not in the tree");
            ApplyOutcome::Unresolved
        }
    }
}

fn apply_workflow_status(tree: &mut ProjectStateTree, status: &WorkflowStatus) -> ApplyOutcome {
    let Some((epic, story)) = status.story_ref() else {
        return ApplyOutcome::Unresolved;
    };
    let (Some(phase_name), Some(phase_status)) = (&status.current_phase, &status.phase_status)
    else {
        return ApplyOutcome::Unresolved;
    };

    with_story(tree, epic, story, |story| {
        let mut matched = 0;
        for phase in story.phases.iter_mut().filter(|p| &p.name == phase_name) {
            phase.status = phase_status.clone();
            matched += 1;
        }
        if matched == 0 {
            ApplyOutcome::Unresolved
        } else {
            ApplyOutcome::Updated { expand: Vec::new() }
        }
    })
}

fn apply_story_status(tree: &mut ProjectStateTree, change: StoryStatusChange) -> ApplyOutcome {
    with_story(tree, change.epic_num, change.story_num, |story| {
        story.status = change.status;
        ApplyOutcome::Updated { expand: Vec::new() }
    })
}

fn apply_story_transition(tree: &mut ProjectStateTree, transition: &StoryTransition) -> ApplyOutcome {
    let (epic, story_num) = (transition.epic_num, transition.story_num);
    match &transition.action {
        TransitionAction::Started => with_story(tree, epic, story_num, |story| {
            story.status = StoryStatus::InProgress;
            ApplyOutcome::Updated {
                expand: vec![
                    ExpandTarget::Epic { epic },
                    ExpandTarget::Story {
                        epic,
                        story: story_num,
                    },
                ],
            }
        }),
        TransitionAction::Completed => with_story(tree, epic, story_num, |story| {
            story.status = StoryStatus::Done;
            ApplyOutcome::Updated { expand: Vec::new() }
        }),
        TransitionAction::Other(action) => {
            tracing::debug!(epic, story = story_num, action = %action, "Ignoring unknown story action");
            ApplyOutcome::Ignored
        }
    }
}

/// One-line human description of an envelope for the activity feed
pub fn describe(envelope: &EventEnvelope) -> String {
    match DashboardEvent::decode(envelope) {
        Ok(DashboardEvent::WorkflowStatus(status)) => format!(
            "story {} phase {} -> {}",
            status.current_story.as_deref().unwrap_or("?"),
            status.current_phase.as_deref().unwrap_or("?"),
            status.phase_status.as_ref().map(|s| s.as_str()).unwrap_or("?"),
        ),
        Ok(DashboardEvent::StoryStatus(change)) => format!(
            "story {}.{} -> {}",
            change.epic_num, change.story_num, change.status
        ),
        Ok(DashboardEvent::StoryTransition(t)) => {
            let action = match &t.action {
                TransitionAction::Started => "started",
                TransitionAction::Completed => "completed",
                TransitionAction::Other(a) => a.as_str(),
            };
            format!("story {}.{} {}", t.epic_num, t.story_num, action)
        }
        Ok(DashboardEvent::Unknown { event_type }) => event_type,
        Err(_) => format!("{} (unreadable payload)", envelope.event_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PhaseStatus;
    use serde_json::{json, Value};

    fn tree() -> ProjectStateTree {
        serde_json::from_value(json!({
            "epics": [
                {"id": 1, "stories": [
                    {"id": 4, "status": "ready-for-dev", "phases": [
                        {"name": "create-story", "status": "completed"},
                        {"name": "dev-story", "status": "pending"}
                    ]}
                ]},
                {"id": 2, "stories": [
                    {"id": 3, "status": "backlog", "phases": [
                        {"name": "dev-story", "status": "pending"},
                        {"name": "dev-story", "status": "pending"}
                    ]}
                ]}
            ]
        }))
        .unwrap()
    }

    fn env(event_type: &str, data: Value) -> EventEnvelope {
        EventEnvelope {
            event_type: event_type.to_string(),
            timestamp: 1760000000.0,
            run_id: "r1".to_string(),
            sequence_id: 1,
            data,
        }
    }

    #[test]
    fn test_workflow_status_updates_every_matching_phase() {
        let mut tree = tree();
        let outcome = apply(
            &mut tree,
            &env(
                "workflow_status",
                json!({"current_story": "2.3", "current_phase": "dev-story", "phase_status": "completed"}),
            ),
        );

        assert_eq!(outcome, ApplyOutcome::Updated { expand: vec![] });
        let story = tree.story(2, 3).unwrap();
        assert!(story.phases.iter().all(|p| p.status == PhaseStatus::Completed));
    }

    #[test]
    fn test_workflow_status_for_missing_story_is_noop() {
        let mut tree = tree();
        let before = tree.clone();
        let outcome = apply(
            &mut tree,
            &env(
                "workflow_status",
                json!({"current_story": "2.9", "current_phase": "dev-story", "phase_status": "completed"}),
            ),
        );
        assert_eq!(outcome, ApplyOutcome::Unresolved);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_workflow_status_with_bad_story_ref_is_noop() {
        let mut tree = tree();
        let before = tree.clone();
        for story in ["two.three", "2", "", "2.3.1"] {
            apply(
                &mut tree,
                &env(
                    "workflow_status",
                    json!({"current_story": story, "current_phase": "dev-story", "phase_status": "completed"}),
                ),
            );
        }
        assert_eq!(tree, before);
    }

    #[test]
    fn test_workflow_status_without_matching_phase_changes_nothing() {
        let mut tree = tree();
        let before = tree.clone();
        let outcome = apply(
            &mut tree,
            &env(
                "workflow_status",
                json!({"current_story": "1.4", "current_phase": "code-review", "phase_status": "in-progress"}),
            ),
        );
        assert_eq!(outcome, ApplyOutcome::Unresolved);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_story_status_sets_status() {
        let mut tree = tree();
        apply(
            &mut tree,
            &env("story_status", json!({"epic_num": 1, "story_num": 4, "status": "review"})),
        );
        assert_eq!(tree.story(1, 4).unwrap().status, StoryStatus::Review);
    }

    #[test]
    fn test_story_transition_started_requests_expansion() {
        let mut tree = tree();
        let outcome = apply(
            &mut tree,
            &env("story_transition", json!({"epic_num": 1, "story_num": 4, "action": "started"})),
        );

        assert_eq!(tree.story(1, 4).unwrap().status, StoryStatus::InProgress);
        assert_eq!(
            outcome,
            ApplyOutcome::Updated {
                expand: vec![
                    ExpandTarget::Epic { epic: 1 },
                    ExpandTarget::Story { epic: 1, story: 4 }
                ]
            }
        );
    }

    #[test]
    fn test_story_transition_completed_marks_done() {
        let mut tree = tree();
        apply(
            &mut tree,
            &env("story_transition", json!({"epic_num": 1, "story_num": 4, "action": "completed"})),
        );
        assert_eq!(tree.story(1, 4).unwrap().status, StoryStatus::Done);
    }

    #[test]
    fn test_unknown_action_and_kind_are_ignored() {
        let mut tree = tree();
        let before = tree.clone();
        assert_eq!(
            apply(
                &mut tree,
                &env("story_transition", json!({"epic_num": 1, "story_num": 4, "action": "paused"})),
            ),
            ApplyOutcome::Ignored
        );
        assert_eq!(
            apply(&mut tree, &env("retrospective", json!({"epic_num": 1}))),
            ApplyOutcome::Ignored
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn test_apply_is_total_over_known_kinds() {
        let payloads = [
            json!(null),
            json!({}),
            json!([]),
            json!("x"),
            json!({"epic_num": -1, "story_num": 4, "status": "done"}),
            json!({"epic_num": 99, "story_num": 99, "status": "done", "action": "started"}),
            json!({"current_story": 2.3, "current_phase": "dev-story", "phase_status": "completed"}),
        ];
        for kind in ["workflow_status", "story_status", "story_transition"] {
            for data in &payloads {
                let mut tree = tree();
                let outcome = apply(&mut tree, &env(kind, data.clone()));
                assert!(matches!(
                    outcome,
                    ApplyOutcome::Updated { .. } | ApplyOutcome::Unresolved | ApplyOutcome::Ignored
                ));
            }
        }
    }

    #[test]
    fn test_apply_on_empty_tree() {
        let mut tree = ProjectStateTree::default();
        assert_eq!(
            apply(
                &mut tree,
                &env("story_transition", json!({"epic_num": 1, "story_num": 4, "action": "started"})),
            ),
            ApplyOutcome::Unresolved
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(&env("story_transition", json!({"epic_num": 1, "story_num": 4, "action": "started"}))),
            "story 1.4 started"
        );
        assert_eq!(
            describe(&env("story_status", json!({"epic_num": 2, "story_num": 3, "status": "done"}))),
            "story 2.3 -> done"
        );
        assert_eq!(describe(&env("story_status", json!(null))), "story_status (unreadable payload)");
    }
}
