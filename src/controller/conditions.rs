//! Hierarchical condition model shared by every status owner
//!
//! Each owner kind (deployment, pod, serverless service, revision, route)
//! declares a `ConditionSet`: one happy condition (`Ready`) plus an ordered
//! list of dependent conditions. The happy condition is never set by callers
//! directly in normal operation; it is recomputed from the dependents after
//! every dependent mutation:
//!
//! - True iff every dependent is True
//! - False if any dependent is False (reason/message of the first False one,
//!   in declared order)
//! - Unknown otherwise, including dependents that were never set
//!
//! Condition sets are immutable constants. They are handed explicitly to
//! `ConditionSet::manage`, which borrows the owner's condition list for the
//! duration of one status update.

use crate::controller::clock::{Clock, SystemClock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state health signal
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Parse a Kubernetes condition status string ("True", "False", anything else is Unknown)
    pub fn from_k8s(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }

    /// Flip polarity, used when an upstream condition reports failure as True
    ///
    /// Unknown stays Unknown.
    pub fn invert(self) -> Self {
        match self {
            ConditionStatus::True => ConditionStatus::False,
            ConditionStatus::False => ConditionStatus::True,
            ConditionStatus::Unknown => ConditionStatus::Unknown,
        }
    }
}

/// Marker for per-owner condition type enums
pub trait ConditionType: Copy + PartialEq + fmt::Debug + 'static {}

impl<T: Copy + PartialEq + fmt::Debug + 'static> ConditionType for T {}

/// A single condition on a status owner
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition<T> {
    #[serde(rename = "type")]
    pub type_: T,

    pub status: ConditionStatus,

    /// One-word CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable details
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// RFC3339 timestamp of the last change to status, reason or message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl<T> Condition<T> {
    pub fn new(
        type_: T,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Condition {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    fn same_state(&self, other: &Condition<T>) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Fixed set of conditions tracked by one owner kind
#[derive(Clone, Copy, Debug)]
pub struct ConditionSet<T: 'static> {
    happy: T,
    dependents: &'static [T],
}

impl<T: ConditionType> ConditionSet<T> {
    pub const fn new(happy: T, dependents: &'static [T]) -> Self {
        ConditionSet { happy, dependents }
    }

    pub fn happy(&self) -> T {
        self.happy
    }

    pub fn dependents(&self) -> &'static [T] {
        self.dependents
    }

    /// Whether the happy condition in `conditions` is True
    pub fn is_happy(&self, conditions: &[Condition<T>]) -> bool {
        conditions
            .iter()
            .any(|c| c.type_ == self.happy && c.is_true())
    }

    /// Borrow an owner's conditions for mutation, stamping with the system clock
    pub fn manage<'a>(&self, conditions: &'a mut Vec<Condition<T>>) -> ConditionManager<'a, T> {
        self.manage_with_clock(conditions, &SystemClock)
    }

    pub fn manage_with_clock<'a>(
        &self,
        conditions: &'a mut Vec<Condition<T>>,
        clock: &'a dyn Clock,
    ) -> ConditionManager<'a, T> {
        ConditionManager {
            set: *self,
            conditions,
            clock,
        }
    }
}

/// Mutable view over one owner's conditions
pub struct ConditionManager<'a, T: 'static> {
    set: ConditionSet<T>,
    conditions: &'a mut Vec<Condition<T>>,
    clock: &'a dyn Clock,
}

impl<T: ConditionType> ConditionManager<'_, T> {
    /// Add every condition of the set that is missing, as Unknown
    pub fn initialize(&mut self) {
        let types = std::iter::once(self.set.happy).chain(self.set.dependents.iter().copied());
        for type_ in types {
            if self.get_condition(type_).is_none() {
                let mut condition = Condition::new(type_, ConditionStatus::Unknown, "", "");
                condition.last_transition_time = Some(self.clock.rfc3339());
                self.conditions.push(condition);
            }
        }
    }

    pub fn get_condition(&self, type_: T) -> Option<&Condition<T>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn conditions(&self) -> &[Condition<T>] {
        self.conditions
    }

    /// True when the happy condition is True
    pub fn is_happy(&self) -> bool {
        self.set.is_happy(self.conditions)
    }

    /// Set a condition, recomputing the happy condition if it was a dependent
    pub fn set_condition(&mut self, condition: Condition<T>) {
        let type_ = condition.type_;
        self.store(condition);

        if type_ != self.set.happy && self.set.dependents.contains(&type_) {
            self.recompute_happy();
        }
    }

    pub fn mark_true(&mut self, type_: T) {
        self.set_condition(Condition::new(type_, ConditionStatus::True, "", ""));
    }

    pub fn mark_false(&mut self, type_: T, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(
            type_,
            ConditionStatus::False,
            reason,
            message,
        ));
    }

    pub fn mark_unknown(
        &mut self,
        type_: T,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set_condition(Condition::new(
            type_,
            ConditionStatus::Unknown,
            reason,
            message,
        ));
    }

    /// Store a condition unless it matches the current state
    ///
    /// Returns true if anything changed.
    fn store(&mut self, mut condition: Condition<T>) -> bool {
        let position = self
            .conditions
            .iter()
            .position(|c| c.type_ == condition.type_);

        if let Some(index) = position {
            if self.conditions[index].same_state(&condition) {
                return false;
            }
        }

        condition.last_transition_time = Some(self.clock.rfc3339());
        match position {
            Some(index) => self.conditions[index] = condition,
            None => self.conditions.push(condition),
        }
        true
    }

    fn recompute_happy(&mut self) {
        let mut all_true = true;
        let mut first_unknown: Option<(String, String)> = None;

        for type_ in self.set.dependents {
            match self.get_condition(*type_) {
                Some(c) if c.status == ConditionStatus::False => {
                    let rollup = Condition::new(
                        self.set.happy,
                        ConditionStatus::False,
                        c.reason.clone(),
                        c.message.clone(),
                    );
                    self.store(rollup);
                    return;
                }
                Some(c) if c.status == ConditionStatus::True => {}
                other => {
                    all_true = false;
                    if first_unknown.is_none() {
                        first_unknown = Some(
                            other
                                .map(|c| (c.reason.clone(), c.message.clone()))
                                .unwrap_or_default(),
                        );
                    }
                }
            }
        }

        let rollup = if all_true {
            Condition::new(self.set.happy, ConditionStatus::True, "", "")
        } else {
            let (reason, message) = first_unknown.unwrap_or_default();
            Condition::new(self.set.happy, ConditionStatus::Unknown, reason, message)
        };
        self.store(rollup);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "conditions_test.rs"]
mod tests;
