//! # System Interaction Layer
//!
//! Default implementations of the collaborators the lifecycle controller needs
//! from the outside world.
//!
//! ## Modules
//!
//! - **`device_pool`**: An in-memory, thread-safe pool of devices. Each worker thread
//!   holds at most one device and blocks while every device is busy.
//! - **`reporter`**: Posts test results to the reporting service over HTTP.

/// Blocking device pool, one device per worker thread.
pub mod device_pool;
/// HTTP results reporter.
pub mod reporter;
