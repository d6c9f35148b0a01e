//! Pure call-status transition function (spec.md §4.4). Grounded on
//! `original_source/app/services/call_state_machine.py`'s
//! `CallStateMachine.can_transition`: same idempotent-same-state rule,
//! same terminal-state rejection unless overridden, same transition table.

use models::CallStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot transition from terminal state {0}")]
    FromTerminal(CallStatus),
    #[error("invalid transition {from} -> {to}")]
    Invalid { from: CallStatus, to: CallStatus },
}

fn valid_targets(from: CallStatus) -> &'static [CallStatus] {
    use CallStatus::*;
    match from {
        Pending => &[Dialing, Failed],
        Dialing => &[Ringing, Answered, Busy, NoAnswer, Failed],
        Ringing => &[Answered, NoAnswer, Busy, Failed],
        Answered => &[Completed, Failed],
        Busy | NoAnswer | Failed | Completed => &[],
    }
}

/// Check whether `current -> target` is a legal transition. Same-state is
/// always valid (idempotent). Terminal states reject every outgoing
/// transition unless `allow_terminal_override` is set (administrative
/// correction, spec.md §4.4).
pub fn check_transition(
    current: CallStatus,
    target: CallStatus,
    allow_terminal_override: bool,
) -> Result<(), TransitionError> {
    if current == target {
        return Ok(());
    }

    if current.is_terminal() && !allow_terminal_override {
        return Err(TransitionError::FromTerminal(current));
    }

    if valid_targets(current).contains(&target) {
        Ok(())
    } else {
        Err(TransitionError::Invalid {
            from: current,
            to: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallStatus::*;

    #[test]
    fn same_state_is_always_valid() {
        for s in [Pending, Dialing, Ringing, Answered, Busy, NoAnswer, Failed, Completed] {
            assert!(check_transition(s, s, false).is_ok());
        }
    }

    #[test]
    fn pending_can_reach_dialing_or_failed_only() {
        assert!(check_transition(Pending, Dialing, false).is_ok());
        assert!(check_transition(Pending, Failed, false).is_ok());
        assert!(check_transition(Pending, Ringing, false).is_err());
        assert!(check_transition(Pending, Completed, false).is_err());
    }

    #[test]
    fn dialing_can_skip_ringing_straight_to_answered() {
        assert!(check_transition(Dialing, Answered, false).is_ok());
    }

    #[test]
    fn terminal_states_reject_everything_without_override() {
        for terminal in [Busy, NoAnswer, Failed, Completed] {
            assert!(check_transition(terminal, Dialing, false).is_err());
            assert!(matches!(
                check_transition(terminal, Dialing, false),
                Err(TransitionError::FromTerminal(_))
            ));
        }
    }

    #[test]
    fn administrative_override_allows_leaving_terminal_state() {
        // Override still only allows edges present in the graph from that
        // "restarted" state — terminal states have none, so even an
        // override cannot manufacture a transition outside the graph.
        assert!(check_transition(Failed, Dialing, true).is_err());
    }

    #[test]
    fn answered_can_only_complete_or_fail() {
        assert!(check_transition(Answered, Completed, false).is_ok());
        assert!(check_transition(Answered, Failed, false).is_ok());
        assert!(check_transition(Answered, Busy, false).is_err());
    }
}
