//! Scene — a named, ordered bundle of device target states.
//!
//! Scenes are activated as one unit: best-effort dispatch with per-device
//! result tracking. Sequential scenes respect listed order; strict
//! sequential scenes stop at the first unrecoverable failure but keep the
//! partial results already collected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{AttributeValue, Capability};
use crate::error::{NidoError, ValidationError};
use crate::id::{DeviceId, SceneId};

/// How a scene's entries are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Execute entries in listed order.
    #[default]
    Sequential,
    /// Dispatch all entries concurrently and aggregate.
    Parallel,
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// One device and the target state a scene drives it to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntry {
    pub device: DeviceId,
    pub changes: HashMap<Capability, AttributeValue>,
}

/// A named bundle of device target states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    pub entries: Vec<SceneEntry>,
    pub mode: ActivationMode,
    /// Strict sequential scenes stop at the first unrecoverable failure.
    /// Ignored in parallel mode.
    pub strict: bool,
}

impl Scene {
    /// Create a builder for constructing a [`Scene`].
    #[must_use]
    pub fn builder() -> SceneBuilder {
        SceneBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::Validation`] when the name is empty
    /// ([`ValidationError::EmptyName`]) or the scene has no entries
    /// ([`ValidationError::EmptyScene`]).
    pub fn validate(&self) -> Result<(), NidoError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.entries.is_empty() {
            return Err(ValidationError::EmptyScene.into());
        }
        Ok(())
    }

    /// Devices this scene references, in listed order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.entries.iter().map(|entry| &entry.device)
    }
}

/// Step-by-step builder for [`Scene`].
#[derive(Debug, Default)]
pub struct SceneBuilder {
    id: Option<SceneId>,
    name: Option<String>,
    entries: Vec<SceneEntry>,
    mode: Option<ActivationMode>,
    strict: Option<bool>,
}

impl SceneBuilder {
    #[must_use]
    pub fn id(mut self, id: SceneId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn entry(
        mut self,
        device: impl Into<DeviceId>,
        changes: HashMap<Capability, AttributeValue>,
    ) -> Self {
        self.entries.push(SceneEntry {
            device: device.into(),
            changes,
        });
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ActivationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Consume the builder, validate, and return a [`Scene`].
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::Validation`] if required fields are missing or
    /// the scene has no entries.
    pub fn build(self) -> Result<Scene, NidoError> {
        let scene = Scene {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            entries: self.entries,
            mode: self.mode.unwrap_or_default(),
            strict: self.strict.unwrap_or(false),
        };
        scene.validate()?;
        Ok(scene)
    }
}
