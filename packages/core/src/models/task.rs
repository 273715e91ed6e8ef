//! Task Data Structures
//!
//! A task is a derived work item owned by one entity and assigned to one
//! person. Terminal statuses (`completed`, `cancelled`) are immutable
//! endpoints: no further status transition is valid from them.

use crate::models::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Closed enumeration of task kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Pay,
    Confirm,
    Prepare,
    Pickup,
    Deliver,
    Receive,
    Rate,
    Checkin,
    Serve,
    Complete,
}

impl TaskKind {
    /// Human-readable label used as the default task title.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pay => "Pay",
            Self::Confirm => "Confirm",
            Self::Prepare => "Prepare",
            Self::Pickup => "Pick up",
            Self::Deliver => "Deliver",
            Self::Receive => "Receive",
            Self::Rate => "Rate",
            Self::Checkin => "Check in",
            Self::Serve => "Serve",
            Self::Complete => "Complete",
        }
    }
}

impl FromStr for TaskKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pay" => Ok(Self::Pay),
            "confirm" => Ok(Self::Confirm),
            "prepare" => Ok(Self::Prepare),
            "pickup" => Ok(Self::Pickup),
            "deliver" => Ok(Self::Deliver),
            "receive" => Ok(Self::Receive),
            "rate" => Ok(Self::Rate),
            "checkin" => Ok(Self::Checkin),
            "serve" => Ok(Self::Serve),
            "complete" => Ok(Self::Complete),
            _ => Err(ValidationError::unknown_tag("task kind", s)),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Pay => "pay",
            Self::Confirm => "confirm",
            Self::Prepare => "prepare",
            Self::Pickup => "pickup",
            Self::Deliver => "deliver",
            Self::Receive => "receive",
            Self::Rate => "rate",
            Self::Checkin => "checkin",
            Self::Serve => "serve",
            Self::Complete => "complete",
        };
        write!(f, "{}", tag)
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Progress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "progress" => Ok(Self::Progress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ValidationError::unknown_tag("task status", s)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Progress => write!(f, "progress"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task priority, stored as an integer column (0 normal, 1 high, 2 urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
            Self::Urgent => 2,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, ValidationError> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::High),
            2 => Ok(Self::Urgent),
            _ => Err(ValidationError::invalid_value(format!(
                "task priority must be 0, 1 or 2, got {}",
                value
            ))),
        }
    }
}

/// Derived work item tied to one entity and one assignee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub entity_id: String,
    pub person_id: String,
    pub kind: TaskKind,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due: Option<DateTime<Utc>>,
    /// Opaque task payload; never interpreted by the store
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task with a generated UUID. The title
    /// defaults to the kind's label when left empty by the caller.
    pub fn new(
        entity_id: impl Into<String>,
        person_id: impl Into<String>,
        kind: TaskKind,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let title = title.into();
        let title = if title.trim().is_empty() {
            kind.label().to_string()
        } else {
            title
        };
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            person_id: person_id.into(),
            kind,
            title,
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            due: None,
            payload: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the due time (builder style).
    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    /// Set the priority (builder style).
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Required fields for the store boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::missing_field("entity_id"));
        }
        if self.person_id.trim().is_empty() {
            return Err(ValidationError::missing_field("person_id"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::missing_field("title"));
        }
        Ok(())
    }

    /// Whether a transition from the current status to `next` is legal.
    /// Only terminal-state immutability is enforced; non-terminal states
    /// transition freely.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.status == next {
            return true;
        }
        !self.status.is_terminal()
    }
}

/// Partial update for a task. `None` leaves a field untouched; `due`
/// uses the nested-option pattern so it can be cleared.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due: Option<Option<DateTime<Utc>>>,
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for tag in [
            "pay", "confirm", "prepare", "pickup", "deliver", "receive", "rate", "checkin",
            "serve", "complete",
        ] {
            let kind: TaskKind = tag.parse().unwrap();
            assert_eq!(kind.to_string(), tag);
        }
        assert!("ship".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Progress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transitions() {
        let mut task = Task::new("e1", "p1", TaskKind::Deliver, "Deliver order");
        assert!(task.can_transition_to(TaskStatus::Progress));
        assert!(task.can_transition_to(TaskStatus::Cancelled));

        task.status = TaskStatus::Completed;
        assert!(!task.can_transition_to(TaskStatus::Pending));
        assert!(!task.can_transition_to(TaskStatus::Cancelled));
        // Same-status "transition" is a no-op, not a violation
        assert!(task.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_priority_conversion() {
        assert_eq!(TaskPriority::from_i64(0).unwrap(), TaskPriority::Normal);
        assert_eq!(TaskPriority::from_i64(2).unwrap(), TaskPriority::Urgent);
        assert!(TaskPriority::from_i64(5).is_err());
        assert_eq!(TaskPriority::Urgent.as_i64(), 2);
    }

    #[test]
    fn test_default_title_from_kind() {
        let task = Task::new("e1", "p1", TaskKind::Pickup, "");
        assert_eq!(task.title, "Pick up");
    }

    #[test]
    fn test_validation() {
        assert!(Task::new("", "p1", TaskKind::Pay, "t").validate().is_err());
        assert!(Task::new("e1", "", TaskKind::Pay, "t").validate().is_err());
        assert!(Task::new("e1", "p1", TaskKind::Pay, "t").validate().is_ok());
    }
}
