//! Device — a controllable or observable thing known to the registry.
//!
//! A device advertises a set of [`Capability`] values (the attributes it can
//! report or be commanded on) and carries the last-known value for each,
//! stamped with the telemetry timestamp that produced it. Devices are never
//! hard-deleted while referenced by a rule or scene; they are deactivated
//! instead.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::time::Timestamp;

/// A controllable or observable device attribute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Power,
    Brightness,
    ColorTemp,
    TargetTemp,
    LockState,
    Temperature,
    Humidity,
    Motion,
    Presence,
}

impl Capability {
    /// Whether changes to this attribute are security-relevant.
    ///
    /// Security-relevant telemetry is treated as high priority by the
    /// event bus backpressure policy.
    #[must_use]
    pub fn is_security_relevant(self) -> bool {
        matches!(self, Self::LockState)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Power => "power",
            Self::Brightness => "brightness",
            Self::ColorTemp => "color_temp",
            Self::TargetTemp => "target_temp",
            Self::LockState => "lock_state",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Motion => "motion",
            Self::Presence => "presence",
        };
        f.write_str(name)
    }
}

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    /// Equality that treats `Int(21)` and `Float(21.0)` as the same value.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => self == other,
        }
    }

    /// Numeric ordering across `Int` and `Float`; `None` for anything else.
    #[must_use]
    pub fn partial_cmp_numeric(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Connectivity status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
    /// The device stopped acknowledging commands; set by the dispatcher
    /// after the retry budget is exhausted.
    Unreachable,
}

impl Connectivity {
    /// Whether the device is believed reachable right now.
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// An attribute value together with the telemetry timestamp that set it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeState {
    pub value: AttributeValue,
    pub updated_at: Timestamp,
}

/// Map of all devices keyed by id; the unit of consistent rule evaluation.
pub type DeviceSnapshot = HashMap<DeviceId, Device>;

/// A device known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub capabilities: BTreeSet<Capability>,
    /// Last-known value per capability, stamped with the telemetry time.
    pub attributes: HashMap<Capability, AttributeState>,
    pub connectivity: Connectivity,
    /// Battery percent for battery-powered devices.
    pub battery: Option<u8>,
    /// Received signal strength in dBm, when the adapter reports it.
    pub signal_strength: Option<i32>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    /// Soft-deactivation flag; inactive devices are skipped by evaluation
    /// and dispatch but keep their history.
    pub active: bool,
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder(id: impl Into<DeviceId>) -> DeviceBuilder {
        DeviceBuilder::new(id)
    }

    /// Whether this device advertises the given capability.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Current value for a capability, if one has been reported.
    #[must_use]
    pub fn attribute(&self, capability: Capability) -> Option<&AttributeValue> {
        self.attributes.get(&capability).map(|state| &state.value)
    }

    /// Apply a telemetry update, returning the capabilities that changed.
    ///
    /// Per-capability last-writer-wins by *timestamp*, not arrival order:
    /// an update older than the stored value is ignored. Values for
    /// capabilities the device does not advertise are ignored too.
    /// Hearing from the device at all marks it online.
    pub fn apply_telemetry(
        &mut self,
        changes: &HashMap<Capability, AttributeValue>,
        timestamp: Timestamp,
    ) -> Vec<Capability> {
        self.connectivity = Connectivity::Online;
        let mut accepted = Vec::new();
        for (capability, value) in changes {
            if !self.supports(*capability) {
                continue;
            }
            if let Some(existing) = self.attributes.get(capability) {
                if existing.updated_at > timestamp {
                    continue;
                }
            }
            self.attributes.insert(
                *capability,
                AttributeState {
                    value: value.clone(),
                    updated_at: timestamp,
                },
            );
            accepted.push(*capability);
        }
        accepted.sort_unstable();
        accepted
    }

    /// Apply the effect of an acknowledged command.
    ///
    /// The dispatcher has already verified the capabilities; the device is
    /// marked online since it just answered.
    pub fn apply_command_effect(
        &mut self,
        changes: &HashMap<Capability, AttributeValue>,
        timestamp: Timestamp,
    ) {
        self.connectivity = Connectivity::Online;
        for (capability, value) in changes {
            self.attributes.insert(
                *capability,
                AttributeState {
                    value: value.clone(),
                    updated_at: timestamp,
                },
            );
        }
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug)]
pub struct DeviceBuilder {
    id: DeviceId,
    name: Option<String>,
    capabilities: BTreeSet<Capability>,
    battery: Option<u8>,
    signal_strength: Option<i32>,
    manufacturer: Option<String>,
    model: Option<String>,
    firmware_version: Option<String>,
}

impl DeviceBuilder {
    fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            capabilities: BTreeSet::new(),
            battery: None,
            signal_strength: None,
            manufacturer: None,
            model: None,
            firmware_version: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    #[must_use]
    pub fn battery(mut self, percent: u8) -> Self {
        self.battery = Some(percent);
        self
    }

    #[must_use]
    pub fn signal_strength(mut self, dbm: i32) -> Self {
        self.signal_strength = Some(dbm);
        self
    }

    #[must_use]
    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    /// Consume the builder and return a [`Device`].
    ///
    /// A device starts offline, active, with no reported attributes. An
    /// empty name falls back to the device id.
    #[must_use]
    pub fn build(self) -> Device {
        let name = self
            .name
            .unwrap_or_else(|| self.id.as_str().to_string());
        Device {
            id: self.id,
            name,
            capabilities: self.capabilities,
            attributes: HashMap::new(),
            connectivity: Connectivity::Offline,
            battery: self.battery,
            signal_strength: self.signal_strength,
            manufacturer: self.manufacturer,
            model: self.model,
            firmware_version: self.firmware_version,
            active: true,
        }
    }
}
