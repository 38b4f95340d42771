//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `occupancy` - Location graph, occupancy transitions, locking and sensor roles
//! - `actions` - Resolves location action tokens into device commands

pub mod actions;
pub mod occupancy;

// Re-export commonly used types
pub use actions::ActionExecutor;
pub use occupancy::{ControlCommand, LocationGraph, NodeSnapshot, StateCommand};
