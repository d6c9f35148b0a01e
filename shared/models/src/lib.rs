//! Persistent record types shared between the orchestrator binary and its
//! tests. Kept in a standalone crate so the wire-level `dto` crate can stay
//! free of `sqlx` (mirrors how the teacher workspace splits `dto` from
//! `models`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an outbound call. Terminal variants are
/// {Busy, NoAnswer, Failed, Completed} — see [`CallStatus::is_terminal`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "call_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Pending,
    Dialing,
    Ringing,
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Completed,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Busy | CallStatus::NoAnswer | CallStatus::Failed | CallStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Dialing => "dialing",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Failed => "failed",
            CallStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent outbound-call record (spec.md §3 "Call").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Call {
    pub id: i64,
    pub call_id: Uuid,
    pub phone_number: String,
    pub caller_id: String,
    pub status: CallStatus,
    pub context: String,
    pub extension: String,
    pub priority: i32,
    pub timeout_ms: i32,
    pub channel: Option<String>,
    pub unique_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i32>,
    pub billable_duration_s: Option<i32>,
    pub failure_reason: Option<String>,
    pub attempt_number: i32,
    pub max_attempts: i32,
    pub call_metadata: Option<serde_json::Value>,
    pub version: i64,
}

impl Call {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Operator account (spec.md §3 "User").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_match_spec() {
        for s in [
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Failed,
            CallStatus::Completed,
        ] {
            assert!(s.is_terminal());
        }
        for s in [
            CallStatus::Pending,
            CallStatus::Dialing,
            CallStatus::Ringing,
            CallStatus::Answered,
        ] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn as_str_round_trips_to_snake_case() {
        assert_eq!(CallStatus::NoAnswer.as_str(), "no_answer");
        assert_eq!(CallStatus::Dialing.to_string(), "dialing");
    }
}
