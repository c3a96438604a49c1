//! # nido-domain
//!
//! Pure domain model for the nido automation core.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Devices** (capability sets, attribute values, connectivity)
//! - Define **Events** (telemetry, timer, geofence, voice and scene triggers
//!   with per-source sequence numbers)
//! - Define **Rules** (trigger → condition tree → action list, with priority
//!   and cooldown)
//! - Define **Scenes** (ordered device/target-state bundles)
//! - Define **Command outcomes** (dispatch state machine, scene activation
//!   results)
//! - Contain all invariant enforcement and condition evaluation
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `core`, adapters, or external IO
//! crates. All IO boundaries are expressed as traits in the `core` crate
//! (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod command;
pub mod device;
pub mod event;
pub mod rule;
pub mod scene;
