//! Core domain types for epicwatch
//!
//! These types describe the workflow being mirrored. The backend drives a
//! three-level hierarchy:
//!
//! | Term | Definition |
//! |------|------------|
//! | **Epic** | A numbered group of stories |
//! | **Story** | A unit of work inside an epic, addressed as `E.S` (or key `E-S`) |
//! | **Phase** | One lifecycle step of a story (e.g. `create-story`, `dev-story`) |
//! | **Run** | One execution of the backend workflow, identified by `run_id` |
//!
//! The tree is produced by a full state fetch and then kept current by the
//! reconciler as events stream in.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================
// Project State Tree
// ============================================

/// The complete workflow state as seen by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStateTree {
    /// Project display name, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Epics in backend order
    #[serde(default)]
    pub epics: Vec<Epic>,
}

impl ProjectStateTree {
    /// Find an epic by id
    pub fn epic(&self, epic_id: u32) -> Option<&Epic> {
        self.epics.iter().find(|e| e.id == epic_id)
    }

    /// Find a story by epic and story id
    pub fn story(&self, epic_id: u32, story_id: u32) -> Option<&Story> {
        self.epic(epic_id)?.stories.iter().find(|s| s.id == story_id)
    }

    /// Find a story for in-place mutation
    pub fn story_mut(&mut self, epic_id: u32, story_id: u32) -> Option<&mut Story> {
        self.epics
            .iter_mut()
            .find(|e| e.id == epic_id)?
            .stories
            .iter_mut()
            .find(|s| s.id == story_id)
    }

    /// Total number of stories across all epics
    pub fn story_count(&self) -> usize {
        self.epics.iter().map(|e| e.stories.len()).sum()
    }
}

/// A group of stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub stories: Vec<Story>,
}

impl Epic {
    /// Number of stories marked done
    pub fn done_count(&self) -> usize {
        self.stories
            .iter()
            .filter(|s| s.status == StoryStatus::Done)
            .count()
    }
}

/// A unit of work inside an epic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

/// One lifecycle step of a story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub status: PhaseStatus,
}

// ============================================
// Statuses
// ============================================

/// Story lifecycle status.
///
/// Unrecognised values from the backend are kept verbatim in `Other` so a
/// newer backend never breaks the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoryStatus {
    #[default]
    Backlog,
    ReadyForDev,
    InProgress,
    Review,
    Done,
    Other(String),
}

impl StoryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StoryStatus::Backlog => "backlog",
            StoryStatus::ReadyForDev => "ready-for-dev",
            StoryStatus::InProgress => "in-progress",
            StoryStatus::Review => "review",
            StoryStatus::Done => "done",
            StoryStatus::Other(s) => s,
        }
    }
}

impl From<String> for StoryStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "backlog" => StoryStatus::Backlog,
            "ready-for-dev" => StoryStatus::ReadyForDev,
            "in-progress" => StoryStatus::InProgress,
            "review" => StoryStatus::Review,
            "done" => StoryStatus::Done,
            _ => StoryStatus::Other(s),
        }
    }
}

impl From<&str> for StoryStatus {
    fn from(s: &str) -> Self {
        StoryStatus::from(s.to_string())
    }
}

impl From<StoryStatus> for String {
    fn from(status: StoryStatus) -> Self {
        match status {
            StoryStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Other(String),
}

impl PhaseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in-progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Other(s) => s,
        }
    }
}

impl From<String> for PhaseStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => PhaseStatus::Pending,
            "in-progress" => PhaseStatus::InProgress,
            "completed" => PhaseStatus::Completed,
            _ => PhaseStatus::Other(s),
        }
    }
}

impl From<&str> for PhaseStatus {
    fn from(s: &str) -> Self {
        PhaseStatus::from(s.to_string())
    }
}

impl From<PhaseStatus> for String {
    fn from(status: PhaseStatus) -> Self {
        match status {
            PhaseStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Session
// ============================================

/// Connectivity/run status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No connection attempted yet
    #[default]
    Idle,
    /// Stream is open and events are flowing
    Running,
    /// The backend ended the stream cleanly
    Complete,
    /// The stream failed; a reconnect is pending
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Complete => "complete",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SessionStatus::Idle),
            "running" => Ok(SessionStatus::Running),
            "complete" => Ok(SessionStatus::Complete),
            "stopped" => Ok(SessionStatus::Stopped),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// A UI node the reconciler asks to be expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpandTarget {
    Epic { epic: u32 },
    Story { epic: u32, story: u32 },
}

impl ExpandTarget {
    /// Story key in `E-S` form, or the epic number for epics
    pub fn key(&self) -> String {
        match self {
            ExpandTarget::Epic { epic } => epic.to_string(),
            ExpandTarget::Story { epic, story } => format!("{}-{}", epic, story),
        }
    }
}
