// src/state.rs

use crate::core::capabilities::{Capabilities, ConfigurationError};
use std::sync::{Mutex, OnceLock, PoisonError};

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// Serializes the first build so concurrent first callers never load twice.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Returns the process-wide capabilities, building them on first access.
///
/// Only one thread runs the build; the others wait on the lock and then read the
/// published instance. A failed build publishes nothing, so a later call retries.
pub fn capabilities() -> Result<&'static Capabilities, ConfigurationError> {
    get_or_build(Capabilities::from_environment)
}

/// Publishes a pre-built instance. Returns `false` if one was already published.
pub fn install_capabilities(capabilities: Capabilities) -> bool {
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    CAPABILITIES.set(capabilities).is_ok()
}

fn get_or_build<F>(build: F) -> Result<&'static Capabilities, ConfigurationError>
where
    F: FnOnce() -> Result<Capabilities, ConfigurationError>,
{
    if let Some(caps) = CAPABILITIES.get() {
        return Ok(caps);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    // Another thread may have finished the build while we were waiting.
    if let Some(caps) = CAPABILITIES.get() {
        return Ok(caps);
    }

    log::debug!("Building process-wide capabilities.");
    let built = build()?;
    Ok(CAPABILITIES.get_or_init(|| built))
}
