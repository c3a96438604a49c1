//! Command outcomes — the dispatch state machine and scene activation
//! results.
//!
//! A dispatched command walks `Pending → Sent → {Acknowledged, TimedOut,
//! Rejected}`; cancellation adds a `Cancelled` terminal for commands
//! stopped before completion. Scene activations aggregate per-device
//! outcomes and are `Succeeded` only when every device applied.

use serde::{Deserialize, Serialize};

use crate::id::{ActivationId, CommandId, DeviceId, SceneId};

/// State of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    TimedOut,
    Rejected,
    /// Cancelled by identifier before reaching a device-decided terminal.
    Cancelled,
}

impl CommandStatus {
    /// Whether the command has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Sent)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Final report for one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: CommandId,
    pub device: DeviceId,
    pub status: CommandStatus,
    /// Total send attempts, including the first.
    pub attempts: u32,
    /// Failure detail for non-acknowledged terminals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// Whether the device acknowledged the command.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.status == CommandStatus::Acknowledged
    }
}

/// Per-device outcome inside a scene activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviceOutcome {
    Applied,
    Failed { reason: String },
    TimedOut,
    /// Skipped because the activation was cancelled first.
    Cancelled,
}

impl DeviceOutcome {
    /// Whether the command reached the device and took effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl From<&CommandResult> for DeviceOutcome {
    fn from(result: &CommandResult) -> Self {
        match result.status {
            CommandStatus::Acknowledged => Self::Applied,
            CommandStatus::TimedOut => Self::TimedOut,
            CommandStatus::Cancelled => Self::Cancelled,
            CommandStatus::Pending | CommandStatus::Sent | CommandStatus::Rejected => {
                Self::Failed {
                    reason: result
                        .error
                        .clone()
                        .unwrap_or_else(|| result.status.to_string()),
                }
            }
        }
    }
}

/// Overall verdict of a scene activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationOutcome {
    /// Every device outcome is applied.
    Succeeded,
    /// At least one device did not apply; per-device outcomes tell which.
    Partial,
}

/// Full report of one scene activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub activation: ActivationId,
    pub scene: SceneId,
    /// Per-device outcomes in the scene's listed order.
    pub outcomes: Vec<(DeviceId, DeviceOutcome)>,
    pub overall: ActivationOutcome,
}

impl ActivationResult {
    /// Conclude an activation from its per-device outcomes.
    ///
    /// The overall verdict is `Succeeded` only when every outcome is
    /// applied; a partial failure is never silently swallowed.
    #[must_use]
    pub fn conclude(
        activation: ActivationId,
        scene: SceneId,
        outcomes: Vec<(DeviceId, DeviceOutcome)>,
    ) -> Self {
        let overall = if outcomes.iter().all(|(_, outcome)| outcome.is_applied()) {
            ActivationOutcome::Succeeded
        } else {
            ActivationOutcome::Partial
        };
        Self {
            activation,
            scene,
            outcomes,
            overall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acked(device: &str) -> CommandResult {
        CommandResult {
            command: CommandId::new(),
            device: DeviceId::from(device),
            status: CommandStatus::Acknowledged,
            attempts: 1,
            error: None,
        }
    }

    #[test]
    fn should_mark_terminal_statuses() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Sent.is_terminal());
        assert!(CommandStatus::Acknowledged.is_terminal());
        assert!(CommandStatus::TimedOut.is_terminal());
        assert!(CommandStatus::Rejected.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
    }

    #[test]
    fn should_map_command_result_to_device_outcome() {
        assert_eq!(DeviceOutcome::from(&acked("a")), DeviceOutcome::Applied);

        let mut timed_out = acked("b");
        timed_out.status = CommandStatus::TimedOut;
        assert_eq!(DeviceOutcome::from(&timed_out), DeviceOutcome::TimedOut);

        let mut rejected = acked("c");
        rejected.status = CommandStatus::Rejected;
        rejected.error = Some("unsupported value".to_string());
        assert_eq!(
            DeviceOutcome::from(&rejected),
            DeviceOutcome::Failed {
                reason: "unsupported value".to_string()
            }
        );
    }

    #[test]
    fn should_conclude_succeeded_when_all_applied() {
        let result = ActivationResult::conclude(
            ActivationId::new(),
            SceneId::new(),
            vec![
                (DeviceId::from("a"), DeviceOutcome::Applied),
                (DeviceId::from("b"), DeviceOutcome::Applied),
            ],
        );
        assert_eq!(result.overall, ActivationOutcome::Succeeded);
    }

    #[test]
    fn should_conclude_partial_when_any_device_timed_out() {
        let result = ActivationResult::conclude(
            ActivationId::new(),
            SceneId::new(),
            vec![
                (DeviceId::from("a"), DeviceOutcome::Applied),
                (DeviceId::from("b"), DeviceOutcome::TimedOut),
            ],
        );
        assert_eq!(result.overall, ActivationOutcome::Partial);
        assert_eq!(result.outcomes[1].1, DeviceOutcome::TimedOut);
    }

    #[test]
    fn should_conclude_partial_for_empty_failure_detail() {
        let result = ActivationResult::conclude(
            ActivationId::new(),
            SceneId::new(),
            vec![(
                DeviceId::from("a"),
                DeviceOutcome::Failed {
                    reason: "device not found".to_string(),
                },
            )],
        );
        assert_eq!(result.overall, ActivationOutcome::Partial);
    }

    #[test]
    fn should_roundtrip_activation_result_through_serde_json() {
        let result = ActivationResult::conclude(
            ActivationId::new(),
            SceneId::new(),
            vec![(DeviceId::from("a"), DeviceOutcome::Applied)],
        );
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ActivationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
