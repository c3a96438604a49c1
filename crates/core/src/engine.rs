//! Rule engine — evaluates events against the enabled rule set.
//!
//! For each incoming event the engine selects candidate rules by trigger,
//! skips those still in cooldown, evaluates condition trees against the
//! registry snapshot taken at event intake, and collects the actions of
//! every rule that fired. Conflicting writes to the same device attribute
//! within one evaluation batch resolve by priority, ties by rule-id order.
//! Evaluation is total: it never fails, it only declines to fire.
//!
//! At-least-once delivery from the bus is reduced to exactly-once
//! *effective* processing with a bounded seen-set keyed on
//! `(source, sequence)`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use nido_domain::device::{AttributeValue, Capability, DeviceSnapshot};
use nido_domain::error::NidoError;
use nido_domain::event::Event;
use nido_domain::id::{DeviceId, RuleId};
use nido_domain::rule::{ActionTarget, Rule};
use nido_domain::time::Timestamp;

use crate::ports::notification::{NotificationKind, NotificationSink};
use crate::ports::rules::RuleRepository;

/// Default capacity of the duplicate-suppression set.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Outcome of evaluating one delivery.
///
/// Duplicates are distinguished from "nothing fired" so the consumer can
/// skip *all* effects of a redelivered event, including direct scene
/// requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// This `(source, sequence)` was already processed.
    Duplicate,
    /// First sighting; these actions survived conflict resolution.
    Planned(Vec<PlannedAction>),
}

impl Evaluation {
    /// The planned actions; empty for duplicates.
    #[must_use]
    pub fn actions(self) -> Vec<PlannedAction> {
        match self {
            Self::Duplicate => Vec::new(),
            Self::Planned(actions) => actions,
        }
    }

    /// Whether this delivery was a suppressed duplicate.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// An action that survived conflict resolution and is ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    /// The rule that produced this action.
    pub rule: RuleId,
    pub target: ActionTarget,
    /// Attribute changes for device targets, already pruned of values a
    /// higher-priority rule claimed.
    pub changes: HashMap<Capability, AttributeValue>,
    pub delay_seconds: Option<u64>,
}

/// Bounded insertion-ordered set of processed `(source, sequence)` keys.
struct SeenSet {
    keys: HashSet<(String, u64)>,
    order: VecDeque<(String, u64)>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a key; returns `false` when it was already present.
    fn insert(&mut self, key: (String, u64)) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

/// Evaluates events against the rule set and plans dispatchable actions.
pub struct RuleEngine<R, N> {
    rules: R,
    sink: N,
    seen: Mutex<SeenSet>,
}

impl<R, N> RuleEngine<R, N>
where
    R: RuleRepository,
    N: NotificationSink,
{
    /// Create an engine over a rule repository and notification sink.
    pub fn new(rules: R, sink: N) -> Self {
        Self::with_dedup_capacity(rules, sink, DEFAULT_DEDUP_CAPACITY)
    }

    /// Create an engine with a custom duplicate-suppression capacity.
    pub fn with_dedup_capacity(rules: R, sink: N, capacity: usize) -> Self {
        Self {
            rules,
            sink,
            seen: Mutex::new(SeenSet::new(capacity)),
        }
    }

    /// Evaluate one event against the enabled rules.
    ///
    /// `snapshot` is the registry state captured when the event was taken
    /// off the bus, so concurrent telemetry cannot race the evaluation.
    /// Duplicate deliveries of the same `(source, sequence)` come back as
    /// [`Evaluation::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rule repository fails; condition
    /// evaluation itself cannot fail.
    pub async fn evaluate(
        &self,
        event: &Event,
        snapshot: &DeviceSnapshot,
        now: Timestamp,
    ) -> Result<Evaluation, NidoError> {
        if !self
            .seen
            .lock()
            .expect("engine seen-set poisoned")
            .insert(event.idempotency_key())
        {
            tracing::debug!(
                source = %event.source.key(),
                sequence = event.sequence,
                "duplicate delivery suppressed"
            );
            return Ok(Evaluation::Duplicate);
        }

        let mut fired: Vec<Rule> = Vec::new();
        for rule in self.rules.list_enabled().await? {
            if !rule.trigger.matches(rule.id, event) {
                continue;
            }
            if rule.in_cooldown(now) {
                tracing::debug!(rule = %rule.id, name = %rule.name, "skipped by cooldown");
                continue;
            }
            if !rule.condition.evaluate(snapshot, now) {
                continue;
            }
            self.rules.record_fired(rule.id, now).await?;
            tracing::info!(rule = %rule.id, name = %rule.name, event_type = %event.event_type(), "rule fired");
            self.sink.notify(
                NotificationKind::RuleFired,
                serde_json::json!({
                    "rule": rule.id,
                    "name": rule.name,
                    "event_type": event.event_type().to_string(),
                    "source": event.source.key(),
                    "sequence": event.sequence,
                }),
            );
            fired.push(rule);
        }

        Ok(Evaluation::Planned(self.resolve_conflicts(fired, snapshot)))
    }

    /// Deterministic conflict resolution: order fired rules by priority
    /// (descending), ties by rule id; the first writer of each
    /// `(device, capability)` pair wins.
    fn resolve_conflicts(&self, mut fired: Vec<Rule>, snapshot: &DeviceSnapshot) -> Vec<PlannedAction> {
        fired.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut claimed: HashSet<(DeviceId, Capability)> = HashSet::new();
        let mut planned = Vec::new();
        for rule in &fired {
            for action in &rule.actions {
                match &action.target {
                    ActionTarget::Device { device } => {
                        if !snapshot.get(device).is_some_and(|d| d.active) {
                            tracing::warn!(rule = %rule.id, device = %device, "dropping action for unknown or inactive device");
                            self.sink.notify(
                                NotificationKind::ActionDropped,
                                serde_json::json!({
                                    "rule": rule.id,
                                    "device": device,
                                    "reason": "device not in registry",
                                }),
                            );
                            continue;
                        }
                        let changes: HashMap<Capability, AttributeValue> = action
                            .changes
                            .iter()
                            .filter(|(capability, _)| {
                                !claimed.contains(&(device.clone(), **capability))
                            })
                            .map(|(capability, value)| (*capability, value.clone()))
                            .collect();
                        if changes.is_empty() {
                            tracing::debug!(rule = %rule.id, device = %device, "action fully shadowed by higher-priority rule");
                            continue;
                        }
                        for capability in changes.keys() {
                            claimed.insert((device.clone(), *capability));
                        }
                        planned.push(PlannedAction {
                            rule: rule.id,
                            target: action.target.clone(),
                            changes,
                            delay_seconds: action.delay_seconds,
                        });
                    }
                    ActionTarget::Scene { .. } => {
                        // Scene existence is checked at activation time;
                        // a missing scene is dropped and reported there.
                        planned.push(PlannedAction {
                            rule: rule.id,
                            target: action.target.clone(),
                            changes: HashMap::new(),
                            delay_seconds: action.delay_seconds,
                        });
                    }
                }
            }
        }
        planned
    }
}
