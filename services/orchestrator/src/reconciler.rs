//! Event-to-transition reconciliation (spec.md §4.5). Grounded on
//! `original_source/app/services/call_service.py`'s channel-event handling,
//! generalised onto `state_machine::check_transition` and the optimistic
//! `version` column instead of the original's unguarded read-modify-write.

use std::time::Duration;

use chrono::Utc;
use dto::{ChannelInfo, PbxEvent};
use models::CallStatus;

use crate::db::calls::StatusMutation;
use crate::db::CallsRepository;
use crate::kv::KvStore;
use crate::state_machine::check_transition;

const LEASE_TTL: Duration = Duration::from_secs(5);
const LEASE_BLOCKING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Reconciler {
    calls: CallsRepository,
    kv: KvStore,
}

/// The computed effect of one event, prior to optimistic-write retry.
struct PlannedMutation {
    target: CallStatus,
    mutation: StatusMutation,
}

impl Reconciler {
    pub fn new(calls: CallsRepository, kv: KvStore) -> Self {
        Self { calls, kv }
    }

    /// Entry point invoked by the PBX connector's event dispatch
    /// (spec.md §4.2/§4.5). Never panics or propagates — a malformed or
    /// untracked event is logged and dropped.
    pub async fn handle_event(&self, event: &PbxEvent) {
        let channel_id = match channel_id_of(event) {
            Some(id) => id,
            None => return,
        };

        let lease_key = format!("call:channel:{channel_id}");
        let Some(lease) = self
            .kv
            .acquire_lease(&lease_key, LEASE_TTL, LEASE_BLOCKING_TIMEOUT)
            .await
            .unwrap_or(None)
        else {
            tracing::warn!(%channel_id, "could not acquire reconciler lease, dropping event");
            return;
        };

        if let Err(err) = self.reconcile_channel(&channel_id, event).await {
            tracing::error!(error = %err, %channel_id, "reconciliation failed");
        }

        if let Err(err) = self.kv.release_lease(lease).await {
            tracing::warn!(error = %err, %channel_id, "failed to release reconciler lease");
        }
    }

    async fn reconcile_channel(&self, channel_id: &str, event: &PbxEvent) -> anyhow::Result<()> {
        for attempt in 0..2 {
            let Some(call) = self.calls.find_by_channel(channel_id).await? else {
                tracing::debug!(%channel_id, "no call tracked for channel, dropping event");
                return Ok(());
            };

            let Some(planned) = plan_mutation(&call, event) else {
                return Ok(());
            };

            if check_transition(call.status, planned.target, false).is_err() {
                tracing::debug!(
                    %channel_id,
                    from = %call.status,
                    to = %planned.target,
                    "event implies an invalid transition, dropping"
                );
                return Ok(());
            }

            let applied = self
                .calls
                .apply_status_mutation(call.id, call.version, &planned.mutation)
                .await?;

            if applied {
                return Ok(());
            }

            tracing::debug!(%channel_id, attempt, "lost optimistic write race, retrying once");
        }

        tracing::warn!(%channel_id, "reconciliation gave up after one retry");
        Ok(())
    }
}

fn channel_id_of(event: &PbxEvent) -> Option<String> {
    match event {
        PbxEvent::StasisStart { channel }
        | PbxEvent::ChannelStateChange { channel }
        | PbxEvent::ChannelDestroyed { channel } => Some(channel.id.clone()),
        PbxEvent::Other => None,
    }
}

fn plan_mutation(call: &models::Call, event: &PbxEvent) -> Option<PlannedMutation> {
    let now = Utc::now();
    let current = call.status;

    match event {
        PbxEvent::StasisStart { .. } => Some(PlannedMutation {
            target: CallStatus::Dialing,
            mutation: StatusMutation {
                status: CallStatus::Dialing,
                dialed_at: Some(now),
                ..Default::default()
            },
        }),

        PbxEvent::ChannelStateChange { channel } => match channel.state.as_deref() {
            Some("Ringing") => Some(PlannedMutation {
                target: CallStatus::Ringing,
                mutation: StatusMutation {
                    status: CallStatus::Ringing,
                    ..Default::default()
                },
            }),
            Some("Up") => Some(PlannedMutation {
                target: CallStatus::Answered,
                mutation: StatusMutation {
                    status: CallStatus::Answered,
                    answered_at: Some(now),
                    ..Default::default()
                },
            }),
            _ => None,
        },

        PbxEvent::ChannelDestroyed { channel } => {
            Some(plan_destroyed(current, call.answered_at, channel, now))
        }

        PbxEvent::Other => None,
    }
}

/// Duration identity (spec.md §8 property 5): when a call completes from
/// ANSWERED, `duration_s` is `floor(ended_at - answered_at)`.
fn plan_destroyed(
    current: CallStatus,
    answered_at: Option<chrono::DateTime<Utc>>,
    channel: &ChannelInfo,
    now: chrono::DateTime<Utc>,
) -> PlannedMutation {
    if current == CallStatus::Answered {
        let duration_s = answered_at.map(|answered| (now - answered).num_seconds() as i32);
        return PlannedMutation {
            target: CallStatus::Completed,
            mutation: StatusMutation {
                status: CallStatus::Completed,
                ended_at: Some(now),
                duration_s,
                ..Default::default()
            },
        };
    }

    let cause_txt = channel.cause_txt.as_deref().unwrap_or_default();
    if cause_txt.contains("BUSY") || channel.cause == Some(17) {
        return PlannedMutation {
            target: CallStatus::Busy,
            mutation: StatusMutation {
                status: CallStatus::Busy,
                ended_at: Some(now),
                ..Default::default()
            },
        };
    }

    if cause_txt.contains("NO_ANSWER") || channel.cause == Some(19) {
        return PlannedMutation {
            target: CallStatus::NoAnswer,
            mutation: StatusMutation {
                status: CallStatus::NoAnswer,
                ended_at: Some(now),
                ..Default::default()
            },
        };
    }

    let reason = if !cause_txt.is_empty() {
        cause_txt.to_string()
    } else {
        format!("cause {}", channel.cause.unwrap_or(0))
    };

    PlannedMutation {
        target: CallStatus::Failed,
        mutation: StatusMutation {
            status: CallStatus::Failed,
            ended_at: Some(now),
            failure_reason: Some(reason),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(state: Option<&str>, cause: Option<i32>, cause_txt: Option<&str>) -> ChannelInfo {
        ChannelInfo {
            id: "chan-1".to_string(),
            state: state.map(str::to_string),
            cause,
            cause_txt: cause_txt.map(str::to_string),
        }
    }

    fn call_with(status: CallStatus, answered_at: Option<chrono::DateTime<Utc>>) -> models::Call {
        models::Call {
            id: 1,
            call_id: uuid::Uuid::new_v4(),
            phone_number: "+14155552671".to_string(),
            caller_id: "Outbound Call".to_string(),
            status,
            context: "outbound-ivr".to_string(),
            extension: "s".to_string(),
            priority: 1,
            timeout_ms: 30_000,
            channel: Some("chan-1".to_string()),
            unique_id: None,
            created_at: Utc::now(),
            dialed_at: None,
            answered_at,
            ended_at: None,
            duration_s: None,
            billable_duration_s: None,
            failure_reason: None,
            attempt_number: 1,
            max_attempts: 1,
            call_metadata: None,
            version: 0,
        }
    }

    #[test]
    fn stasis_start_targets_dialing() {
        let event = PbxEvent::StasisStart {
            channel: channel(None, None, None),
        };
        let planned = plan_mutation(&call_with(CallStatus::Pending, None), &event).unwrap();
        assert_eq!(planned.target, CallStatus::Dialing);
        assert!(planned.mutation.dialed_at.is_some());
    }

    #[test]
    fn channel_state_change_up_targets_answered() {
        let event = PbxEvent::ChannelStateChange {
            channel: channel(Some("Up"), None, None),
        };
        let planned = plan_mutation(&call_with(CallStatus::Ringing, None), &event).unwrap();
        assert_eq!(planned.target, CallStatus::Answered);
        assert!(planned.mutation.answered_at.is_some());
    }

    #[test]
    fn destroyed_after_answered_completes_with_duration_fields() {
        let answered_at = Utc::now() - chrono::Duration::seconds(30);
        let event = PbxEvent::ChannelDestroyed {
            channel: channel(None, None, None),
        };
        let planned = plan_mutation(&call_with(CallStatus::Answered, Some(answered_at)), &event);
        let planned = planned.unwrap();
        assert_eq!(planned.target, CallStatus::Completed);
        assert_eq!(planned.mutation.duration_s, Some(30));
    }

    #[test]
    fn destroyed_with_busy_cause_targets_busy() {
        let event = PbxEvent::ChannelDestroyed {
            channel: channel(None, Some(17), None),
        };
        let planned = plan_mutation(&call_with(CallStatus::Dialing, None), &event).unwrap();
        assert_eq!(planned.target, CallStatus::Busy);
    }

    #[test]
    fn destroyed_with_no_answer_cause_text_targets_no_answer() {
        let event = PbxEvent::ChannelDestroyed {
            channel: channel(None, None, Some("NO_ANSWER (19)")),
        };
        let planned = plan_mutation(&call_with(CallStatus::Ringing, None), &event).unwrap();
        assert_eq!(planned.target, CallStatus::NoAnswer);
    }

    #[test]
    fn destroyed_with_unrecognised_cause_targets_failed_with_reason() {
        let event = PbxEvent::ChannelDestroyed {
            channel: channel(None, Some(42), None),
        };
        let planned = plan_mutation(&call_with(CallStatus::Dialing, None), &event).unwrap();
        assert_eq!(planned.target, CallStatus::Failed);
        assert_eq!(planned.mutation.failure_reason.as_deref(), Some("cause 42"));
    }

    #[test]
    fn ringing_state_change_ignored_when_not_a_known_state() {
        let event = PbxEvent::ChannelStateChange {
            channel: channel(Some("Down"), None, None),
        };
        assert!(plan_mutation(&call_with(CallStatus::Dialing, None), &event).is_none());
    }
}
