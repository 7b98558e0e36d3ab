//! Event envelopes and their validation
//!
//! Every message on the push stream carries a JSON envelope:
//!
//! ```json
//! {"type": "story_status", "timestamp": 1760000000.5, "run_id": "r1",
//!  "sequence_id": 7, "data": {"epic_num": 2, "story_num": 3, "status": "review"}}
//! ```
//!
//! [`validate`] checks only the envelope shape. Payloads are decoded per
//! kind by [`DashboardEvent::decode`] when the reconciler applies them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{PhaseStatus, StoryStatus};

/// Fields every envelope must carry, in report order
pub const REQUIRED_FIELDS: [&str; 5] = ["type", "timestamp", "run_id", "sequence_id", "data"];

/// One validated push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event kind (workflow_status, story_status, story_transition, ...)
    #[serde(rename = "type")]
    pub event_type: String,

    /// Producer emission time in seconds since the epoch. Display only.
    pub timestamp: f64,

    /// Logical execution of the backend this event belongs to
    pub run_id: String,

    /// Per-run ordering key, starting at 1
    pub sequence_id: u64,

    /// Kind-specific payload
    pub data: Value,
}

impl EventEnvelope {
    /// Key used for duplicate detection: `type-run_id-sequence_id`
    pub fn dedup_key(&self) -> String {
        format!("{}-{}-{}", self.event_type, self.run_id, self.sequence_id)
    }

    /// Producer timestamp as a UTC datetime, if representable
    pub fn emitted_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() {
            return None;
        }
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1_000_000_000.0) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// Why a raw message was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("event body is not a JSON object")]
    NotAnObject,

    #[error("missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Check a deserialized message body against the envelope shape.
///
/// All missing fields are reported together. Field types are checked only
/// at the envelope level; `data` may hold anything.
pub fn validate(raw: &Value) -> Result<EventEnvelope, ValidationFailure> {
    let obj = raw.as_object().ok_or(ValidationFailure::NotAnObject)?;

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !obj.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(ValidationFailure::MissingFields { fields: missing });
    }

    let event_type = obj["type"]
        .as_str()
        .ok_or(ValidationFailure::InvalidField {
            field: "type",
            expected: "a string",
        })?;
    let timestamp = obj["timestamp"]
        .as_f64()
        .ok_or(ValidationFailure::InvalidField {
            field: "timestamp",
            expected: "a number",
        })?;
    let run_id = obj["run_id"]
        .as_str()
        .ok_or(ValidationFailure::InvalidField {
            field: "run_id",
            expected: "a string",
        })?;
    let sequence_id = obj["sequence_id"]
        .as_u64()
        .filter(|seq| *seq >= 1)
        .ok_or(ValidationFailure::InvalidField {
            field: "sequence_id",
            expected: "an integer >= 1",
        })?;

    Ok(EventEnvelope {
        event_type: event_type.to_string(),
        timestamp,
        run_id: run_id.to_string(),
        sequence_id,
        data: obj["data"].clone(),
    })
}

// ============================================
// Typed payloads
// ============================================

pub const WORKFLOW_STATUS: &str = "workflow_status";
pub const STORY_STATUS: &str = "story_status";
pub const STORY_TRANSITION: &str = "story_transition";

/// A decoded event, one variant per kind the reconciler understands
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    WorkflowStatus(WorkflowStatus),
    StoryStatus(StoryStatusChange),
    StoryTransition(StoryTransition),
    /// Any kind this build does not know about
    Unknown { event_type: String },
}

impl DashboardEvent {
    /// Decode the payload of a validated envelope.
    ///
    /// Unknown kinds decode successfully to [`DashboardEvent::Unknown`]; only a
    /// known kind with a payload of the wrong shape is an error.
    pub fn decode(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        let data = envelope.data.clone();
        Ok(match envelope.event_type.as_str() {
            WORKFLOW_STATUS => DashboardEvent::WorkflowStatus(serde_json::from_value(data)?),
            STORY_STATUS => DashboardEvent::StoryStatus(serde_json::from_value(data)?),
            STORY_TRANSITION => DashboardEvent::StoryTransition(serde_json::from_value(data)?),
            other => DashboardEvent::Unknown {
                event_type: other.to_string(),
            },
        })
    }
}

/// Payload of `workflow_status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowStatus {
    /// Story reference in `E.S` form
    #[serde(default, deserialize_with = "string_or_number")]
    pub current_story: Option<String>,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub phase_status: Option<PhaseStatus>,
}

impl WorkflowStatus {
    /// Parse `current_story` into `(epic, story)`
    pub fn story_ref(&self) -> Option<(u32, u32)> {
        parse_story_ref(self.current_story.as_deref()?)
    }
}

/// Payload of `story_status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoryStatusChange {
    pub epic_num: u32,
    pub story_num: u32,
    pub status: StoryStatus,
}

/// Payload of `story_transition`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoryTransition {
    pub epic_num: u32,
    pub story_num: u32,
    pub action: TransitionAction,
}

/// What happened to a story
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TransitionAction {
    Started,
    Completed,
    Other(String),
}

impl From<String> for TransitionAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "started" => TransitionAction::Started,
            "completed" => TransitionAction::Completed,
            _ => TransitionAction::Other(s),
        }
    }
}

/// Split `"E.S"` into integers. Anything else is `None`.
pub fn parse_story_ref(s: &str) -> Option<(u32, u32)> {
    let (epic, story) = s.trim().split_once('.')?;
    Some((epic.parse().ok()?, story.parse().ok()?))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(seq: u64) -> Value {
        json!({
            "type": "story_status",
            "timestamp": 1760000000.25,
            "run_id": "r1",
            "sequence_id": seq,
            "data": {"epic_num": 2, "story_num": 3, "status": "review"}
        })
    }

    #[test]
    fn test_validate_accepts_complete_envelope() {
        let env = validate(&raw(4)).unwrap();
        assert_eq!(env.event_type, "story_status");
        assert_eq!(env.run_id, "r1");
        assert_eq!(env.sequence_id, 4);
        assert_eq!(env.dedup_key(), "story_status-r1-4");
        assert_eq!(env.emitted_at().unwrap().timestamp(), 1760000000);
    }

    #[test]
    fn test_validate_reports_every_missing_field() {
        let err = validate(&json!({"type": "story_status", "data": {}})).unwrap_err();
        assert_eq!(
            err,
            ValidationFailure::MissingFields {
                fields: vec!["timestamp", "run_id", "sequence_id"]
            }
        );
        assert_eq!(
            err.to_string(),
            "missing required fields: timestamp, run_id, sequence_id"
        );
    }

    #[test]
    fn test_validate_rejects_non_objects_and_bad_types() {
        assert_eq!(validate(&json!([1, 2])), Err(ValidationFailure::NotAnObject));

        let mut bad = raw(1);
        bad["sequence_id"] = json!("1");
        assert!(matches!(
            validate(&bad),
            Err(ValidationFailure::InvalidField { field: "sequence_id", .. })
        ));

        let zero = raw(0);
        assert!(matches!(
            validate(&zero),
            Err(ValidationFailure::InvalidField { field: "sequence_id", .. })
        ));
    }

    #[test]
    fn test_validate_does_not_inspect_data() {
        let mut odd = raw(1);
        odd["data"] = json!("not an object");
        assert!(validate(&odd).is_ok());
    }

    #[test]
    fn test_decode_known_and_unknown_kinds() {
        let env = validate(&raw(1)).unwrap();
        assert_eq!(
            DashboardEvent::decode(&env).unwrap(),
            DashboardEvent::StoryStatus(StoryStatusChange {
                epic_num: 2,
                story_num: 3,
                status: StoryStatus::Review,
            })
        );

        let mut future = env.clone();
        future.event_type = "agent_thought".to_string();
        assert_eq!(
            DashboardEvent::decode(&future).unwrap(),
            DashboardEvent::Unknown {
                event_type: "agent_thought".to_string()
            }
        );

        let mut broken = env;
        broken.data = json!({"epic_num": "two"});
        assert!(DashboardEvent::decode(&broken).is_err());
    }

    #[test]
    fn test_workflow_status_story_ref() {
        let status: WorkflowStatus = serde_json::from_value(json!({
            "current_story": "2.3",
            "current_phase": "dev-story",
            "phase_status": "completed"
        }))
        .unwrap();
        assert_eq!(status.story_ref(), Some((2, 3)));
        assert_eq!(status.phase_status, Some(PhaseStatus::Completed));

        let idle: WorkflowStatus = serde_json::from_value(json!({"current_story": null})).unwrap();
        assert_eq!(idle.story_ref(), None);
    }

    #[test]
    fn test_parse_story_ref() {
        assert_eq!(parse_story_ref("1.4"), Some((1, 4)));
        assert_eq!(parse_story_ref("1"), None);
        assert_eq!(parse_story_ref("a.4"), None);
        assert_eq!(parse_story_ref("1.4.2"), None);
        assert_eq!(parse_story_ref(""), None);
    }

    #[test]
    fn test_transition_action_from_string() {
        assert_eq!(TransitionAction::from("started".to_string()), TransitionAction::Started);
        assert_eq!(
            TransitionAction::from("paused".to_string()),
            TransitionAction::Other("paused".to_string())
        );
    }
}
