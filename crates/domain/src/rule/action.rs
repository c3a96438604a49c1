//! Action — the effect performed when a rule fires.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{AttributeValue, Capability};
use crate::id::{DeviceId, SceneId};

/// What an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionTarget {
    /// Apply attribute changes to a single device.
    Device { device: DeviceId },
    /// Activate a scene.
    Scene { scene: SceneId },
}

impl std::fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device { device } => write!(f, "device({device})"),
            Self::Scene { scene } => write!(f, "scene({scene})"),
        }
    }
}

/// An operation executed when a rule's trigger fires and its condition
/// holds. Targets that no longer exist are dropped and reported at
/// dispatch time, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub target: ActionTarget,
    /// Desired attribute changes; ignored for scene targets.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub changes: HashMap<Capability, AttributeValue>,
    /// Optional delay before dispatch, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
}

impl Action {
    /// Action that sets attributes on a device.
    #[must_use]
    pub fn set_device(
        device: impl Into<DeviceId>,
        changes: HashMap<Capability, AttributeValue>,
    ) -> Self {
        Self {
            target: ActionTarget::Device {
                device: device.into(),
            },
            changes,
            delay_seconds: None,
        }
    }

    /// Action that activates a scene.
    #[must_use]
    pub fn activate_scene(scene: SceneId) -> Self {
        Self {
            target: ActionTarget::Scene { scene },
            changes: HashMap::new(),
            delay_seconds: None,
        }
    }

    /// Delay dispatch by the given number of seconds.
    #[must_use]
    pub fn after_seconds(mut self, seconds: u64) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.delay_seconds {
            Some(delay) => write!(f, "{} after {delay}s", self.target),
            None => self.target.fmt(f),
        }
    }
}
