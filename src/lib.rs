//! Occupancy manager library
//!
//! Tracks which locations of a home are occupied from sensor events on the
//! home-automation event bus. Exposes modules for integration testing and
//! binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
