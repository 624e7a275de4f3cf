// src/core/execution_registry.rs

//! Per-thread slots for the test method currently being invoked and for the log
//! artifacts captured when it was torn down. Downstream consumers (reporters,
//! page objects) read them on the worker thread that ran the test; no other
//! thread can observe them.

use crate::models::{LogMap, TestMethod};
use std::cell::RefCell;
use thiserror::Error;

thread_local! {
    static CURRENT_METHOD: RefCell<Option<TestMethod>> = const { RefCell::new(None) };
    static CAPTURED_LOGS: RefCell<Option<LogMap>> = const { RefCell::new(None) };
}

/// Failures reading the thread registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The calling thread has no method set.
    #[error("No test method is running on this thread. Is the lifecycle controller driving this runner?")]
    NoCurrentMethod,
}

/// Publishes `method` as the one running on the calling thread.
pub fn set_current_method(method: TestMethod) {
    CURRENT_METHOD.with(|slot| *slot.borrow_mut() = Some(method));
}

/// The method being invoked on the calling thread.
pub fn current_method() -> Result<TestMethod, RegistryError> {
    CURRENT_METHOD.with(|slot| slot.borrow().clone().ok_or(RegistryError::NoCurrentMethod))
}

/// Keeps `logs` for readers on the calling thread, replacing older ones.
pub fn store_captured_logs(logs: LogMap) {
    CAPTURED_LOGS.with(|slot| *slot.borrow_mut() = Some(logs));
}

/// A copy of the last captured logs; the slot keeps its value.
pub fn captured_logs() -> Option<LogMap> {
    CAPTURED_LOGS.with(|slot| slot.borrow().clone())
}

/// Consumes the last captured logs.
pub fn take_captured_logs() -> Option<LogMap> {
    CAPTURED_LOGS.with(|slot| slot.borrow_mut().take())
}

/// Empties both slots of the calling thread.
pub fn clear() {
    CURRENT_METHOD.with(|slot| *slot.borrow_mut() = None);
    CAPTURED_LOGS.with(|slot| *slot.borrow_mut() = None);
}
