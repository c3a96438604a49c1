//! Trigger — which events cause a rule to be evaluated.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventPayload, EventType};
use crate::id::{DeviceId, RuleId};

/// Describes which events activate a rule.
///
/// A rule is evaluated when the event's type is in `event_types` and, for
/// device-sourced events, the optional `device` filter matches. Timer
/// events are targeted: a `TimerFired` event only matches the rule the
/// scheduler fired it for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Event types that activate evaluation.
    pub event_types: Vec<EventType>,
    /// Optional filter: only events from this device match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
}

impl TriggerSpec {
    /// Trigger on a set of event types, any source.
    #[must_use]
    pub fn on(event_types: Vec<EventType>) -> Self {
        Self {
            event_types,
            device: None,
        }
    }

    /// Restrict the trigger to events from one device.
    #[must_use]
    pub fn from_device(mut self, device: impl Into<DeviceId>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Whether this trigger includes timer events.
    #[must_use]
    pub fn includes_timer(&self) -> bool {
        self.event_types.contains(&EventType::TimerFired)
    }

    /// Check whether `event` activates the rule identified by `rule_id`.
    #[must_use]
    pub fn matches(&self, rule_id: RuleId, event: &Event) -> bool {
        if !self.event_types.contains(&event.event_type()) {
            return false;
        }
        if let EventPayload::TimerFired { rule } = &event.payload {
            return *rule == rule_id;
        }
        if let Some(filter) = &self.device {
            return match &event.payload {
                EventPayload::TelemetryChanged { device, .. } => device == filter,
                _ => false,
            };
        }
        true
    }
}

impl std::fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<String> = self.event_types.iter().map(ToString::to_string).collect();
        match &self.device {
            Some(device) => write!(f, "on({}) from {device}", types.join("|")),
            None => write!(f, "on({})", types.join("|")),
        }
    }
}
