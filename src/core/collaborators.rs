// src/core/collaborators.rs

//! Contracts of the services the lifecycle controller drives. Device-, driver- and
//! logger-level implementations track their state per calling thread, the same
//! way the controller's callers are scheduled: one worker thread per running test.

use crate::models::{DeviceHandle, LogMap, TestMethod, TestReport, TestStatus};
use anyhow::Result;

/// Hands out devices from a finite pool. A device is held by at most one thread.
pub trait DeviceAllocator: Send + Sync {
    /// Picks the next idle device, blocking until one is free.
    fn next_available(&self) -> Result<DeviceHandle>;
    /// Binds `device` to the calling thread.
    fn allocate(&self, device: &DeviceHandle) -> Result<()>;
    /// Returns the calling thread's device to the pool.
    fn free(&self) -> Result<()>;
}

/// Starts the Appium server processes for a suite.
pub trait ServerProcessManager: Send + Sync {
    /// Launches every configured server.
    fn start(&self) -> Result<()>;
}

/// Owns the driver session of the calling thread.
pub trait DriverSessionManager: Send + Sync {
    /// Opens a session bound to `device`.
    fn start(&self, device: &DeviceHandle) -> Result<()>;
    /// Quits the session.
    fn stop(&self) -> Result<()>;
    /// Releases the lower-level driver-manager resources behind the session.
    fn release(&self) -> Result<()>;
    /// Platform name reported by the active session.
    fn current_platform(&self) -> Result<String>;
}

/// Captures device logs (adb, video, ...) around one test.
pub trait TestLogger: Send + Sync {
    /// Begins capture for one test.
    fn start(&self, method_name: &str, class_name: &str) -> Result<()>;
    /// Stops capture and returns the artifacts produced.
    fn end(&self, method: &TestMethod, status: TestStatus, device_model: &str) -> Result<LogMap>;
}

/// Collects screenshot paths for a device after a test.
pub trait ScreenshotExtractor: Send + Sync {
    /// Paths of the screenshots taken on device `udid` during `method`.
    fn extract(&self, udid: &str, method: &TestMethod) -> Result<Vec<String>>;
}

/// Sends results to the reporting service.
pub trait ResultReporter: Send + Sync {
    /// Delivers one report to `url`.
    fn send(&self, url: &str, report: &TestReport) -> Result<()>;
}
