use super::*;
use crate::controller::clock::MockClock;
use chrono::{TimeZone, Utc};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
enum Widget {
    Ready,
    Alpha,
    Beta,
}

const WIDGET_CONDITIONS: ConditionSet<Widget> =
    ConditionSet::new(Widget::Ready, &[Widget::Alpha, Widget::Beta]);

fn fixed_clock() -> MockClock {
    MockClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

#[test]
fn test_initialize_sets_everything_unknown() {
    let mut conditions = Vec::new();
    let clock = fixed_clock();
    let mut manager = WIDGET_CONDITIONS.manage_with_clock(&mut conditions, &clock);
    manager.initialize();

    assert_eq!(manager.conditions().len(), 3);
    for c in manager.conditions() {
        assert_eq!(c.status, ConditionStatus::Unknown);
        assert!(c.reason.is_empty());
        assert!(c.message.is_empty());
    }
    assert!(!manager.is_happy());
}

#[test]
fn test_initialize_keeps_existing_conditions() {
    let mut conditions = vec![Condition::new(
        Widget::Alpha,
        ConditionStatus::True,
        "",
        "",
    )];
    WIDGET_CONDITIONS.manage(&mut conditions).initialize();

    let alpha = conditions.iter().find(|c| c.type_ == Widget::Alpha).unwrap();
    assert_eq!(alpha.status, ConditionStatus::True);
    assert_eq!(conditions.len(), 3);
}

#[test]
fn test_happy_when_all_dependents_true() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.initialize();
    manager.mark_true(Widget::Alpha);
    assert!(!manager.is_happy(), "Beta still unknown");

    manager.mark_true(Widget::Beta);
    assert!(manager.is_happy());
}

#[test]
fn test_unset_dependent_keeps_rollup_unknown() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.mark_true(Widget::Alpha);

    let ready = manager.get_condition(Widget::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::Unknown);
    assert!(!manager.is_happy());
}

#[test]
fn test_false_dependent_wins_and_carries_reason() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.mark_true(Widget::Alpha);
    manager.mark_false(Widget::Beta, "Broken", "beta is broken");

    let ready = manager.get_condition(Widget::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "Broken");
    assert_eq!(ready.message, "beta is broken");
    assert!(!manager.is_happy());
}

#[test]
fn test_first_false_in_declared_order_is_reported() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    // Mutate Beta first so insertion order differs from declared order
    manager.mark_false(Widget::Beta, "BetaDown", "beta");
    manager.mark_false(Widget::Alpha, "AlphaDown", "alpha");

    let ready = manager.get_condition(Widget::Ready).unwrap();
    assert_eq!(ready.reason, "AlphaDown");
}

#[test]
fn test_unknown_dependent_reason_propagates() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.mark_true(Widget::Alpha);
    manager.mark_unknown(Widget::Beta, "Deploying", "still rolling out");

    let ready = manager.get_condition(Widget::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::Unknown);
    assert_eq!(ready.reason, "Deploying");
}

#[test]
fn test_recovery_from_false_to_true() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.mark_true(Widget::Alpha);
    manager.mark_false(Widget::Beta, "Broken", "");
    assert!(!manager.is_happy());

    manager.mark_true(Widget::Beta);
    assert!(manager.is_happy());
    let ready = manager.get_condition(Widget::Ready).unwrap();
    assert!(ready.reason.is_empty());
}

#[test]
fn test_identical_update_is_noop() {
    let mut conditions = Vec::new();
    let clock = fixed_clock();
    {
        let mut manager = WIDGET_CONDITIONS.manage_with_clock(&mut conditions, &clock);
        manager.mark_false(Widget::Alpha, "Broken", "alpha");
    }
    let before = conditions.clone();

    clock.advance(chrono::Duration::minutes(5));
    {
        let mut manager = WIDGET_CONDITIONS.manage_with_clock(&mut conditions, &clock);
        manager.mark_false(Widget::Alpha, "Broken", "alpha");
    }

    assert_eq!(conditions, before, "Same triple must not touch transition time");
}

#[test]
fn test_changed_message_updates_transition_time() {
    let mut conditions = Vec::new();
    let clock = fixed_clock();
    {
        let mut manager = WIDGET_CONDITIONS.manage_with_clock(&mut conditions, &clock);
        manager.mark_false(Widget::Alpha, "Broken", "first");
    }
    clock.advance(chrono::Duration::minutes(5));
    {
        let mut manager = WIDGET_CONDITIONS.manage_with_clock(&mut conditions, &clock);
        manager.mark_false(Widget::Alpha, "Broken", "second");
    }

    let alpha = conditions.iter().find(|c| c.type_ == Widget::Alpha).unwrap();
    assert_eq!(alpha.message, "second");
    assert_eq!(
        alpha.last_transition_time.as_deref(),
        Some("2024-01-01T00:05:00Z")
    );
}

#[test]
fn test_non_dependent_condition_does_not_affect_rollup() {
    let mut conditions = Vec::new();
    let mut manager = WIDGET_CONDITIONS.manage(&mut conditions);
    manager.mark_true(Widget::Alpha);
    manager.mark_true(Widget::Beta);

    // Setting the happy condition directly is allowed and not recomputed
    manager.mark_false(Widget::Ready, "Override", "");
    assert!(!manager.is_happy());
}

#[test]
fn test_invert_status() {
    assert_eq!(ConditionStatus::True.invert(), ConditionStatus::False);
    assert_eq!(ConditionStatus::False.invert(), ConditionStatus::True);
    assert_eq!(ConditionStatus::Unknown.invert(), ConditionStatus::Unknown);
}

#[test]
fn test_from_k8s_status() {
    assert_eq!(ConditionStatus::from_k8s("True"), ConditionStatus::True);
    assert_eq!(ConditionStatus::from_k8s("False"), ConditionStatus::False);
    assert_eq!(ConditionStatus::from_k8s("Unknown"), ConditionStatus::Unknown);
    assert_eq!(ConditionStatus::from_k8s(""), ConditionStatus::Unknown);
}

#[test]
fn test_condition_serializes_camel_case() {
    let mut condition = Condition::new(Widget::Alpha, ConditionStatus::False, "Broken", "");
    condition.last_transition_time = Some("2024-01-01T00:00:00Z".to_string());

    let json = serde_json::to_value(&condition).unwrap();
    assert_eq!(json["type"], "Alpha");
    assert_eq!(json["status"], "False");
    assert_eq!(json["reason"], "Broken");
    assert!(json.get("message").is_none());
    assert_eq!(json["lastTransitionTime"], "2024-01-01T00:00:00Z");
}
