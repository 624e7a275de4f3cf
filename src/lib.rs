//! Core of a parallel Appium test distributor: capability resolution with
//! environment overrides, and the per-method device/driver lifecycle.

/// Command-line inspection of the resolved capabilities.
pub mod cli;
/// Names, keys and defaults shared across the crate.
pub mod constants;
/// Capability resolution and the per-method lifecycle.
pub mod core;
/// Data types shared by every layer.
pub mod models;
/// The process-wide capability store.
pub mod state;
/// Default implementations of the external collaborators.
pub mod system;
