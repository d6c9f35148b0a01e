//! Wire-level request/response/event types shared by the orchestrator and
//! (potentially) other clients of its HTTP API. Kept separate from
//! `models` so this crate never needs `sqlx`.

use chrono::{DateTime, Utc};
use models::CallStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims carried by both access and refresh tokens (spec.md §3 "Token").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: String,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Optional routing overrides a caller may pass when originating a call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OriginateOverrides {
    pub context: Option<String>,
    pub extension: Option<String>,
    pub priority: Option<i32>,
    pub timeout_ms: Option<i32>,
    pub caller_id: Option<String>,
    pub variables: Option<serde_json::Value>,
}

/// RESTful payload for `POST /calls` — overrides plus the destination number.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCallRequest {
    pub phone_number: String,
    #[serde(flatten)]
    pub overrides: OriginateOverrides,
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginateResponse {
    pub success: bool,
    pub call_id: Uuid,
    pub phone_number: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStatusResponse {
    pub call_id: Uuid,
    pub phone_number: String,
    pub status: CallStatus,
    pub channel: Option<String>,
    pub context: String,
    pub extension: String,
    pub caller_id: String,
    pub created_at: DateTime<Utc>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i32>,
    pub failure_reason: Option<String>,
    pub attempt_number: i32,
    pub is_active: bool,
    pub is_completed: bool,
}

impl From<models::Call> for CallStatusResponse {
    fn from(c: models::Call) -> Self {
        let is_active = c.is_active();
        let is_completed = c.is_completed();
        Self {
            call_id: c.call_id,
            phone_number: c.phone_number,
            status: c.status,
            channel: c.channel,
            context: c.context,
            extension: c.extension,
            caller_id: c.caller_id,
            created_at: c.created_at,
            dialed_at: c.dialed_at,
            answered_at: c.answered_at,
            ended_at: c.ended_at,
            duration_s: c.duration_s,
            failure_reason: c.failure_reason,
            attempt_number: c.attempt_number,
            is_active,
            is_completed,
        }
    }
}

/// A channel event as emitted by the PBX over its event stream
/// (spec.md §4.2/§4.5). Recognised event types are modelled as a sum type
/// per the "polymorphic event handlers" design note (spec.md §9); anything
/// else decodes as `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PbxEvent {
    StasisStart {
        channel: ChannelInfo,
    },
    ChannelStateChange {
        channel: ChannelInfo,
    },
    ChannelDestroyed {
        channel: ChannelInfo,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub cause: Option<i32>,
    #[serde(default)]
    pub cause_txt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_destroyed_decodes_from_json() {
        let raw = r#"{"type":"ChannelDestroyed","channel":{"id":"abc","cause":17,"cause_txt":"User busy"}}"#;
        let event: PbxEvent = serde_json::from_str(raw).unwrap();
        match event {
            PbxEvent::ChannelDestroyed { channel } => {
                assert_eq!(channel.id, "abc");
                assert_eq!(channel.cause, Some(17));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_type_decodes_as_other() {
        let raw = r#"{"type":"SomethingElse"}"#;
        let event: PbxEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, PbxEvent::Other));
    }
}
