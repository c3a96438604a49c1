//! Condition — the predicate tree guarding a rule's actions.
//!
//! Conditions form a closed set of node kinds so evaluation is exhaustive
//! and panic-free. Evaluation is *total*: a comparison against a device
//! that is absent or deactivated, an attribute that was never reported, or
//! values that cannot be ordered all evaluate to `false`. Malformed trees
//! are rejected at rule-creation time instead.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::device::{AttributeValue, Capability, DeviceSnapshot};
use crate::error::ValidationError;
use crate::id::DeviceId;
use crate::time::Timestamp;

/// Maximum nesting depth accepted at rule-creation time.
pub const MAX_CONDITION_DEPTH: usize = 16;

/// Comparison operator for leaf conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Apply the operator; non-comparable operands yield `false`.
    #[must_use]
    pub fn apply(self, left: &AttributeValue, right: &AttributeValue) -> bool {
        use std::cmp::Ordering;
        match self {
            Self::Eq => left.loosely_equals(right),
            Self::Ne => !left.loosely_equals(right),
            Self::Lt => matches!(left.partial_cmp_numeric(right), Some(Ordering::Less)),
            Self::Le => matches!(
                left.partial_cmp_numeric(right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt => matches!(left.partial_cmp_numeric(right), Some(Ordering::Greater)),
            Self::Ge => matches!(
                left.partial_cmp_numeric(right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sym = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(sym)
    }
}

/// Right-hand side of a comparison: a literal or another device's attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Literal { value: AttributeValue },
    DeviceAttribute {
        device: DeviceId,
        capability: Capability,
    },
}

impl Operand {
    fn resolve<'a>(&'a self, snapshot: &'a DeviceSnapshot) -> Option<&'a AttributeValue> {
        match self {
            Self::Literal { value } => Some(value),
            Self::DeviceAttribute { device, capability } => {
                lookup_attribute(snapshot, device, *capability)
            }
        }
    }
}

/// A predicate over device attributes and time windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a device attribute to a literal or another attribute.
    Compare {
        device: DeviceId,
        capability: Capability,
        op: CompareOp,
        operand: Operand,
    },
    /// All children must hold. Empty is vacuously true.
    And { conditions: Vec<Condition> },
    /// At least one child must hold. Empty is false.
    Or { conditions: Vec<Condition> },
    /// The child must not hold.
    Not { condition: Box<Condition> },
    /// The current time must be within the window; overnight windows
    /// (`after > before`, e.g. `22:00`..`06:00`) wrap past midnight.
    TimeWindow {
        /// Start of the window, `HH:MM` in 24-hour UTC.
        after: String,
        /// End of the window, `HH:MM` in 24-hour UTC.
        before: String,
    },
}

impl Condition {
    /// Combine conditions with logical AND.
    #[must_use]
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And { conditions }
    }

    /// Combine conditions with logical OR.
    #[must_use]
    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Or { conditions }
    }

    /// Negate a condition.
    #[must_use]
    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    /// Check structural invariants at rule-creation time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ConditionTooDeep`] when nesting exceeds
    /// [`MAX_CONDITION_DEPTH`], or [`ValidationError::InvalidTimeWindow`]
    /// when a window bound is not `HH:MM`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > MAX_CONDITION_DEPTH {
            return Err(ValidationError::ConditionTooDeep { depth });
        }
        match self {
            Self::Compare { .. } => Ok(()),
            Self::And { conditions } | Self::Or { conditions } => conditions
                .iter()
                .try_for_each(|c| c.validate_at(depth + 1)),
            Self::Not { condition } => condition.validate_at(depth + 1),
            Self::TimeWindow { after, before } => {
                for bound in [after, before] {
                    if parse_hhmm(bound).is_none() {
                        return Err(ValidationError::InvalidTimeWindow {
                            value: bound.clone(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluate against a registry snapshot. Never fails.
    #[must_use]
    pub fn evaluate(&self, snapshot: &DeviceSnapshot, now: Timestamp) -> bool {
        match self {
            Self::Compare {
                device,
                capability,
                op,
                operand,
            } => {
                let Some(actual) = lookup_attribute(snapshot, device, *capability) else {
                    return false;
                };
                let Some(expected) = operand.resolve(snapshot) else {
                    return false;
                };
                op.apply(actual, expected)
            }
            Self::And { conditions } => conditions.iter().all(|c| c.evaluate(snapshot, now)),
            Self::Or { conditions } => conditions.iter().any(|c| c.evaluate(snapshot, now)),
            Self::Not { condition } => !condition.evaluate(snapshot, now),
            Self::TimeWindow { after, before } => {
                let (Some(after), Some(before)) = (parse_hhmm(after), parse_hhmm(before)) else {
                    return false;
                };
                let current = now.time();
                if after <= before {
                    current >= after && current <= before
                } else {
                    current >= after || current <= before
                }
            }
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare {
                device,
                capability,
                op,
                ..
            } => write!(f, "compare({device}.{capability} {op} …)"),
            Self::And { conditions } => write!(f, "and({})", conditions.len()),
            Self::Or { conditions } => write!(f, "or({})", conditions.len()),
            Self::Not { .. } => f.write_str("not(…)"),
            Self::TimeWindow { after, before } => write!(f, "time_window({after}..{before})"),
        }
    }
}

fn lookup_attribute<'a>(
    snapshot: &'a DeviceSnapshot,
    device: &DeviceId,
    capability: Capability,
) -> Option<&'a AttributeValue> {
    snapshot
        .get(device)
        .filter(|d| d.active)
        .and_then(|d| d.attribute(capability))
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}
