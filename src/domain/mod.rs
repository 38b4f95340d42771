//! Domain models - item model, occupancy metadata and action tokens
//!
//! This module contains the canonical data types used throughout the system:
//! - `ItemDef` / `ItemEvent` - registry items and the events that change them
//! - `EventMetadata` - per-sensor role, behavior flags and duration overrides
//! - `LocationSettings` - per-location default duration and action lists
//! - `ActionToken` - symbolic actions resolved into device commands

pub mod action;
pub mod metadata;
pub mod types;

pub use action::{ActionPhase, ActionToken};
pub use metadata::{Behavior, EventMetadata, LocationSettings, SensorClass, SensorRole};
pub use types::{ItemDef, ItemEvent, ItemKind, Metadata, StatusItem};
