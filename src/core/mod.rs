// src/core/mod.rs

/// Typed queries over the resolved capability tree.
pub mod capabilities;
pub mod collaborators;
pub mod execution_registry;
pub mod lifecycle;
pub mod override_resolver;
pub mod runner;
/// Bookkeeping of live driver sessions.
pub mod session;
/// Settings read from the environment and `atd.toml`.
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;
