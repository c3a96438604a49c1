//! Rule — trigger → condition tree → action list.
//!
//! Rules are the unit of automation: a [`TriggerSpec`] selects the events
//! that activate evaluation, a [`Condition`] tree guards execution, and an
//! ordered [`Action`] list describes the effects. Priority breaks ties
//! when two rules fired by the same event target the same device
//! attribute; the cooldown debounces re-firing under event storms.

mod action;
mod condition;
mod schedule;
mod trigger;

pub use action::{Action, ActionTarget};
pub use condition::{CompareOp, Condition, MAX_CONDITION_DEPTH, Operand};
pub use schedule::{ScheduleSpec, SunEvent, parse_time_of_day};
pub use trigger::TriggerSpec;

use serde::{Deserialize, Serialize};

use crate::error::{NidoError, ValidationError};
use crate::id::RuleId;
use crate::time::Timestamp;

/// An automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub enabled: bool,
    pub trigger: TriggerSpec,
    pub condition: Condition,
    /// Ordered action list. May be empty: audit-only rules fire for their
    /// notification side effect alone.
    pub actions: Vec<Action>,
    /// Higher priority wins attribute conflicts within one evaluation
    /// batch; ties resolve by rule-id order.
    pub priority: u8,
    /// Minimum seconds between successive firings. Zero disables the
    /// debounce.
    pub cooldown_seconds: u64,
    pub last_fired: Option<Timestamp>,
    /// Present when the rule is driven by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
}

impl Rule {
    /// Create a builder for constructing a [`Rule`].
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    /// Check domain invariants; called at rule-creation time.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::Validation`] when the name is empty, the
    /// trigger names no event types, the condition tree is malformed, the
    /// schedule is malformed, or a schedule is present without a
    /// timer-fired trigger.
    pub fn validate(&self) -> Result<(), NidoError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.trigger.event_types.is_empty() {
            return Err(ValidationError::NoTriggerEvents.into());
        }
        self.condition.validate()?;
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
            if !self.trigger.includes_timer() {
                return Err(ValidationError::ScheduleWithoutTimerTrigger.into());
            }
        }
        Ok(())
    }

    /// Whether the rule is still inside its cooldown window at `now`.
    #[must_use]
    pub fn in_cooldown(&self, now: Timestamp) -> bool {
        if self.cooldown_seconds == 0 {
            return false;
        }
        match self.last_fired {
            Some(last) => now - last < chrono::Duration::seconds(self.cooldown_seconds as i64),
            None => false,
        }
    }
}

/// Step-by-step builder for [`Rule`].
#[derive(Debug, Default)]
pub struct RuleBuilder {
    id: Option<RuleId>,
    name: Option<String>,
    enabled: Option<bool>,
    trigger: Option<TriggerSpec>,
    condition: Option<Condition>,
    actions: Vec<Action>,
    priority: Option<u8>,
    cooldown_seconds: Option<u64>,
    last_fired: Option<Timestamp>,
    schedule: Option<ScheduleSpec>,
}

impl RuleBuilder {
    #[must_use]
    pub fn id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn cooldown_seconds(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn last_fired(mut self, ts: Timestamp) -> Self {
        self.last_fired = Some(ts);
        self
    }

    #[must_use]
    pub fn schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Consume the builder, validate, and return a [`Rule`].
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::Validation`] if required fields are missing or
    /// invariants fail.
    pub fn build(self) -> Result<Rule, NidoError> {
        let rule = Rule {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
            trigger: self.trigger.unwrap_or_default(),
            condition: self.condition.unwrap_or(Condition::And {
                conditions: Vec::new(),
            }),
            actions: self.actions,
            priority: self.priority.unwrap_or(0),
            cooldown_seconds: self.cooldown_seconds.unwrap_or(0),
            last_fired: self.last_fired,
            schedule: self.schedule,
        };
        rule.validate()?;
        Ok(rule)
    }
}
