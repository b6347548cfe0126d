//! Notification policy: whether a down-set is worth telling anyone about.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use fwconsole_core::{AlertDefinition, AlertRunState};

/// Why a notification was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Same down-set as the last notification.
    Unchanged,
    /// Nothing is down.
    Empty,
    /// Inside the definition's silence window.
    Silenced,
    /// A notification went out less than one cooldown ago.
    Cooldown,
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Notify,
    Suppress(SuppressReason),
}

/// Decide whether `down` warrants a notification.
///
/// Notifies only when the set differs from the last notified set, is
/// non-empty, and falls outside both the silence window and the cooldown.
#[must_use]
pub fn evaluate(
    definition: &AlertDefinition,
    state: &AlertRunState,
    down: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Decision {
    if *down == state.last_down_set {
        return Decision::Suppress(SuppressReason::Unchanged);
    }
    if down.is_empty() {
        return Decision::Suppress(SuppressReason::Empty);
    }
    if definition.silence.is_some_and(|w| w.contains(now)) {
        return Decision::Suppress(SuppressReason::Silenced);
    }
    if let Some(sent) = state.last_sent_at {
        if now < add(sent, definition.cooldown) {
            return Decision::Suppress(SuppressReason::Cooldown);
        }
    }
    Decision::Notify
}

/// Run state after a cycle.
///
/// The next check is always scheduled. The remembered down-set moves to
/// `down` when a notification was delivered, and is cleared on recovery, so
/// a fault suppressed by silence or cooldown is still reported later.
#[must_use]
pub fn next_state(
    definition: &AlertDefinition,
    previous: &AlertRunState,
    down: BTreeSet<String>,
    notified: bool,
    now: DateTime<Utc>,
) -> AlertRunState {
    let mut next = previous.clone();
    next.last_checked_at = Some(now);
    next.next_check_at = Some(add(now, definition.check_interval));
    if notified {
        next.last_down_set = down;
        next.last_sent_at = Some(now);
    } else if down.is_empty() {
        next.last_down_set.clear();
    }
    next
}

fn add(at: DateTime<Utc>, by: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use fwconsole_core::{AlertId, DeviceKind, SilenceWindow, TargetId};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn definition() -> AlertDefinition {
        AlertDefinition {
            id: AlertId("wan".into()),
            name: "WAN links".into(),
            targets: vec![TargetId::new("fw-01")],
            commands: vec!["get system interface physical".into()],
            device_kind: DeviceKind::FortiGate,
            interfaces: Vec::new(),
            check_interval: Duration::from_secs(300),
            cooldown: Duration::from_secs(3600),
            silence: None,
            recipients: vec!["noc@example.net".into()],
            active: true,
        }
    }

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn test_new_fault_notifies() {
        let decision = evaluate(&definition(), &AlertRunState::default(), &set(&["fw-01/port2"]), at(0));
        assert_eq!(decision, Decision::Notify);
    }

    #[test]
    fn test_unchanged_set_is_suppressed() {
        let state = AlertRunState {
            last_down_set: set(&["fw-01/port2"]),
            last_sent_at: Some(at(0)),
            ..AlertRunState::default()
        };
        let decision = evaluate(&definition(), &state, &set(&["fw-01/port2"]), at(7200));
        assert_eq!(decision, Decision::Suppress(SuppressReason::Unchanged));
    }

    #[test]
    fn test_recovery_is_not_notified() {
        let state = AlertRunState {
            last_down_set: set(&["fw-01/port2"]),
            ..AlertRunState::default()
        };
        let decision = evaluate(&definition(), &state, &BTreeSet::new(), at(0));
        assert_eq!(decision, Decision::Suppress(SuppressReason::Empty));
    }

    #[test]
    fn test_silence_window_suppresses() {
        let def = AlertDefinition {
            silence: Some(SilenceWindow { start: at(-60), end: at(60) }),
            ..definition()
        };
        let decision = evaluate(&def, &AlertRunState::default(), &set(&["fw-01/port2"]), at(0));
        assert_eq!(decision, Decision::Suppress(SuppressReason::Silenced));
        let decision = evaluate(&def, &AlertRunState::default(), &set(&["fw-01/port2"]), at(60));
        assert_eq!(decision, Decision::Notify);
    }

    #[test]
    fn test_cooldown_suppresses_new_set() {
        let state = AlertRunState {
            last_down_set: set(&["fw-01/port2"]),
            last_sent_at: Some(at(0)),
            ..AlertRunState::default()
        };
        let grown = set(&["fw-01/port2", "fw-01/port3"]);
        assert_eq!(
            evaluate(&definition(), &state, &grown, at(3599)),
            Decision::Suppress(SuppressReason::Cooldown)
        );
        assert_eq!(evaluate(&definition(), &state, &grown, at(3600)), Decision::Notify);
    }

    #[test]
    fn test_next_state_always_schedules() {
        let next = next_state(&definition(), &AlertRunState::default(), set(&["fw-01/port2"]), false, at(0));
        assert_eq!(next.next_check_at, Some(at(300)));
        assert_eq!(next.last_checked_at, Some(at(0)));
        assert!(next.last_down_set.is_empty());
        assert_eq!(next.last_sent_at, None);
    }

    #[test]
    fn test_next_state_records_notification_and_recovery() {
        let notified = next_state(&definition(), &AlertRunState::default(), set(&["fw-01/port2"]), true, at(0));
        assert_eq!(notified.last_down_set, set(&["fw-01/port2"]));
        assert_eq!(notified.last_sent_at, Some(at(0)));

        let recovered = next_state(&definition(), &notified, BTreeSet::new(), false, at(300));
        assert!(recovered.last_down_set.is_empty());
        assert_eq!(recovered.last_sent_at, Some(at(0)));
    }
}
