//! # Lifecycle Controller
//!
//! Drives the resources of every test method through a fixed sequence:
//!
//! 1. **Start** (`on_test_start`): allocate a device, start a driver session on it
//!    and, for local devices, start log capture and describe the run.
//! 2. **Before invocation** (`before_invocation`): publish the current method to the
//!    thread registry and honour `skip_on_platform` directives.
//! 3. **After invocation** (`after_invocation`): collect logs, report, then always
//!    stop the driver, free the device and drop the session record.
//!
//! Setup and teardown failures are logged and absorbed: one test's broken device
//! must not stop the rest of the batch. The only control transfer out of the
//! controller is [`SkipSignal`].
//!
//! The controller never spawns threads. Its caller runs each method on a worker
//! thread and threads the returned [`ExecutionContext`] through the hooks.

use crate::constants::COMPLETED_STATUS;
use crate::core::capabilities::{Capabilities, ConfigurationError};
use crate::core::collaborators::{
    DeviceAllocator, DriverSessionManager, ResultReporter, ScreenshotExtractor,
    ServerProcessManager, TestLogger,
};
use crate::core::execution_registry;
use crate::core::session::SessionRegistry;
use crate::models::{
    DeviceHandle, LogMap, MetadataRegistry, TestMetadata, TestMethod, TestReport, TestStatus,
};
use crate::state;
use anyhow::{Result, anyhow};
use scopeguard::defer;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;
use thiserror::Error;
use uuid::Uuid;

/// Aborts an invocation before the test body runs. Not a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Skipped because property was set to :::{platform}")]
pub struct SkipSignal {
    /// The platform named by the `skip_on_platform` directive.
    pub platform: String,
}

/// Progress of the suite as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteState {
    /// `on_suite_start` has not run yet.
    Idle,
    /// Between suite start and finish.
    Running,
    /// `on_suite_finish` has run.
    Finished,
}

/// Where a method is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPhase {
    /// Nothing acquired yet.
    Pending,
    /// A device is bound to the worker thread.
    DeviceAllocated,
    /// A driver session runs on the device.
    DriverStarted,
    /// Log capture is running (local devices only).
    LoggingStarted,
    /// The body is cleared to run.
    Invoking,
    /// The run was skipped.
    Skipped,
    /// The body finished, successfully or not.
    Completed,
    /// Every resource was released.
    TornDown,
}

/// Everything the hooks need to know about one invocation. Created by
/// [`LifecycleController::on_test_start`] and owned by the worker thread.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    method: TestMethod,
    metadata: TestMetadata,
    result_id: Uuid,
    thread: ThreadId,
    attempt: u32,
    device: Option<DeviceHandle>,
    phase: MethodPhase,
    skip_signalled: bool,
    logs: Option<LogMap>,
}

impl ExecutionContext {
    fn new(method: TestMethod, metadata: TestMetadata, attempt: u32) -> Self {
        Self {
            method,
            metadata,
            result_id: Uuid::new_v4(),
            thread: std::thread::current().id(),
            attempt,
            device: None,
            phase: MethodPhase::Pending,
            skip_signalled: false,
            logs: None,
        }
    }

    /// The method being run, with its current description.
    pub fn method(&self) -> &TestMethod {
        &self.method
    }

    /// Directives resolved for the method.
    pub fn metadata(&self) -> &TestMetadata {
        &self.metadata
    }

    /// Fresh for every invocation.
    pub fn result_id(&self) -> Uuid {
        self.result_id
    }

    /// The worker thread that started the invocation.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Zero for the first run of a method, incremented on each retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The allocated device; `None` when allocation failed.
    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// The description computed at start, or the one carried over.
    pub fn description(&self) -> Option<&str> {
        self.method.description.as_deref()
    }

    /// Furthest phase reached.
    pub fn phase(&self) -> MethodPhase {
        self.phase
    }

    /// The invocation was aborted by a [`SkipSignal`].
    pub fn skip_signalled(&self) -> bool {
        self.skip_signalled
    }

    /// Logs captured during teardown, if any.
    pub fn logs(&self) -> Option<&LogMap> {
        self.logs.as_ref()
    }

    /// Device, driver and logs are handled by a remote device farm.
    pub fn is_cloud(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_cloud)
    }
}

/// The services a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Device allocation.
    pub devices: Arc<dyn DeviceAllocator>,
    /// Appium server processes.
    pub server: Arc<dyn ServerProcessManager>,
    /// Driver sessions.
    pub driver: Arc<dyn DriverSessionManager>,
    /// Device log capture.
    pub logger: Arc<dyn TestLogger>,
    /// Screenshot collection.
    pub screenshots: Arc<dyn ScreenshotExtractor>,
    /// Result delivery.
    pub reporter: Arc<dyn ResultReporter>,
    /// Live session records.
    pub sessions: Arc<SessionRegistry>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Builds the human-readable description of a run on `device`.
///
/// When the prior description already mentions the device UDID, the new text is
/// appended to it; otherwise it replaces it.
pub fn describe(device: &DeviceHandle, author: Option<&str>, prior: Option<&str>) -> String {
    let mut description = format!(
        "Platform: {} UDID: {} Name: {} Host: {}",
        device.platform, device.udid, device.name, device.host_name
    );
    if let Some(author) = author {
        description.push_str("\nAuthor: ");
        description.push_str(author);
    }
    match prior {
        Some(prior) if prior.contains(&device.udid) => format!("{}\n{}", prior, description),
        _ => description,
    }
}

/// Runs the per-method hooks against a set of [`Collaborators`].
#[derive(Debug)]
pub struct LifecycleController {
    collaborators: Collaborators,
    metadata: MetadataRegistry,
    reporting_url: Option<String>,
    suite_state: Mutex<SuiteState>,
}

impl LifecycleController {
    /// Reads the reporting endpoint from `capabilities` once, at construction.
    pub fn new(
        capabilities: &Capabilities,
        collaborators: Collaborators,
        metadata: MetadataRegistry,
    ) -> Self {
        let reporting_url = capabilities.reporting_url();
        match &reporting_url {
            Some(url) => log::info!("Test results will be reported to {}", url),
            None => log::debug!("No results service configured; logs stay on the worker threads."),
        }
        Self {
            collaborators,
            metadata,
            reporting_url,
            suite_state: Mutex::new(SuiteState::Idle),
        }
    }

    /// Builds a controller on top of the process-wide capabilities.
    pub fn from_process_capabilities(
        collaborators: Collaborators,
        metadata: MetadataRegistry,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self::new(state::capabilities()?, collaborators, metadata))
    }

    /// The results endpoint, when one is configured.
    pub fn reporting_url(&self) -> Option<&str> {
        self.reporting_url.as_deref()
    }

    /// Where the suite stands.
    pub fn suite_state(&self) -> SuiteState {
        *self.suite_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directives registered for `method`.
    pub fn metadata_for(&self, method: &TestMethod) -> TestMetadata {
        self.metadata.get(method)
    }

    /// Registry the runner records driver sessions in.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.collaborators.sessions
    }

    // --- SUITE HOOKS ---

    /// Starts the Appium server. A failure is logged and the suite proceeds.
    pub fn on_suite_start(&self) {
        {
            let mut state = self.suite_state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SuiteState::Running {
                log::warn!("Suite start requested while a suite is already running.");
                return;
            }
            *state = SuiteState::Running;
        }
        log::info!("Suite started; launching Appium server.");
        if let Err(e) = self.collaborators.server.start() {
            log::error!("Failed to start the Appium server: {:#}", e);
        }
    }

    /// Marks the suite finished. Servers are left running.
    pub fn on_suite_finish(&self) {
        *self.suite_state.lock().unwrap_or_else(PoisonError::into_inner) = SuiteState::Finished;
        log::info!("Suite finished.");
    }

    // --- METHOD HOOKS ---

    /// Acquires the resources of one invocation of `method`.
    ///
    /// The context is returned even if setup failed part way; the invocation
    /// then runs with whatever was acquired.
    pub fn on_test_start(&self, method: TestMethod, attempt: u32) -> ExecutionContext {
        // Logs left behind by the previous method on this worker are stale now.
        execution_registry::take_captured_logs();

        let metadata = self.metadata.get(&method);
        let mut ctx = ExecutionContext::new(method, metadata, attempt);
        log::debug!(
            "Starting '{}' (attempt {}) on {:?}.",
            ctx.method.qualified_name(),
            attempt,
            ctx.thread
        );
        if let Err(e) = self.acquire(&mut ctx) {
            log::error!(
                "Setup of '{}' failed in phase {:?}: {:#}",
                ctx.method.qualified_name(),
                ctx.phase,
                e
            );
        }
        ctx
    }

    fn acquire(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let devices = &self.collaborators.devices;
        let device = devices.next_available()?;
        devices.allocate(&device)?;
        log::info!(
            "Allocated device {} ({}) to '{}'.",
            device.udid,
            device.name,
            ctx.method.qualified_name()
        );
        ctx.device = Some(device.clone());
        ctx.phase = MethodPhase::DeviceAllocated;

        self.collaborators.driver.start(&device)?;
        ctx.phase = MethodPhase::DriverStarted;

        if !device.is_cloud {
            self.collaborators
                .logger
                .start(&ctx.method.name, &ctx.method.class_name)?;
            ctx.method.description = Some(describe(
                &device,
                ctx.metadata.author.as_deref(),
                ctx.method.description.as_deref(),
            ));
            ctx.phase = MethodPhase::LoggingStarted;
        }
        Ok(())
    }

    /// Publishes the current method and applies the platform skip directive.
    ///
    /// Cloud runs bypass the skip check entirely.
    pub fn before_invocation(&self, ctx: &mut ExecutionContext) -> Result<(), SkipSignal> {
        execution_registry::set_current_method(ctx.method.clone());

        if !ctx.is_cloud() {
            if let Some(platform) = ctx.metadata.skip_on_platform.clone() {
                if self.active_platform_is(&platform) {
                    log::info!(
                        "Skipping '{}' on platform {}.",
                        ctx.method.qualified_name(),
                        platform
                    );
                    self.report(ctx, TestStatus::Skipped, LogMap::new());
                    ctx.phase = MethodPhase::Skipped;
                    ctx.skip_signalled = true;
                    return Err(SkipSignal { platform });
                }
            }
        }

        ctx.phase = MethodPhase::Invoking;
        Ok(())
    }

    fn active_platform_is(&self, platform: &str) -> bool {
        match self.collaborators.driver.current_platform() {
            Ok(active) => active.eq_ignore_ascii_case(platform),
            Err(e) => {
                log::warn!("Could not read the active driver platform: {:#}", e);
                false
            }
        }
    }

    /// Collects and reports results, then releases every resource of the invocation.
    /// Nothing here propagates; the session record is dropped on every path.
    pub fn after_invocation(&self, ctx: &mut ExecutionContext, status: TestStatus) {
        let sessions = Arc::clone(&self.collaborators.sessions);
        let (thread, result_id) = (ctx.thread, ctx.result_id);
        defer! {
            if sessions.remove(thread, result_id).is_none() {
                log::trace!("No session record for result {} on {:?}.", result_id, thread);
            }
        }

        if !ctx.skip_signalled {
            ctx.phase = match status {
                TestStatus::Skipped => MethodPhase::Skipped,
                _ => MethodPhase::Completed,
            };
        }

        if let Err(e) = self.collect_results(ctx, status) {
            log::error!(
                "Collecting results of '{}' failed: {:#}",
                ctx.method.qualified_name(),
                e
            );
        }
        self.release(ctx);
        ctx.phase = MethodPhase::TornDown;
    }

    /// A failed run that has attempts left will be run again.
    pub fn is_retry(&self, ctx: &ExecutionContext, status: TestStatus) -> bool {
        ctx.metadata
            .retry_count
            .is_some_and(|max| status == TestStatus::Failure && ctx.attempt < max)
    }

    fn collect_results(&self, ctx: &mut ExecutionContext, status: TestStatus) -> Result<()> {
        if ctx.is_cloud() || self.is_retry(ctx, status) {
            return Ok(());
        }
        let device = ctx.device.clone().ok_or_else(|| {
            anyhow!(
                "no device was allocated to '{}', so there are no logs to collect",
                ctx.method.qualified_name()
            )
        })?;

        let logs = self
            .collaborators
            .logger
            .end(&ctx.method, status, &device.model)?;
        if self.reporting_url.is_some() {
            // A signalled skip was already reported when the signal was raised.
            if !ctx.skip_signalled {
                self.report(ctx, status, logs.clone());
            }
        } else {
            let shots = self
                .collaborators
                .screenshots
                .extract(&device.udid, &ctx.method)?;
            log::debug!("Collected {} screenshot(s) for {}.", shots.len(), device.udid);
            execution_registry::store_captured_logs(logs.clone());
        }
        ctx.logs = Some(logs);
        Ok(())
    }

    fn release(&self, ctx: &ExecutionContext) {
        if let Err(e) = self.collaborators.driver.stop() {
            log::error!(
                "Failed to stop the driver of '{}': {:#}",
                ctx.method.qualified_name(),
                e
            );
        }
        if let Err(e) = self.collaborators.devices.free() {
            log::error!(
                "Failed to free the device of '{}': {:#}",
                ctx.method.qualified_name(),
                e
            );
        }
        if !ctx.is_cloud() {
            if let Err(e) = self.collaborators.driver.release() {
                log::warn!("Failed to release the driver manager: {:#}", e);
            }
        }
    }

    /// Reports a skip the runner decided on its own (not through a [`SkipSignal`]).
    pub fn on_test_skipped(&self, ctx: &ExecutionContext) {
        if ctx.skip_signalled || ctx.is_cloud() {
            return;
        }
        log::debug!("'{}' was skipped by the runner.", ctx.method.qualified_name());
        if ctx.metadata.retry_count.is_none() {
            self.report(ctx, TestStatus::Skipped, LogMap::new());
        }
    }

    /// Sends one `Completed` report when a results service is configured.
    /// A failed send is logged; there is no retry.
    fn report(&self, ctx: &ExecutionContext, status: TestStatus, logs: LogMap) {
        let Some(url) = &self.reporting_url else {
            return;
        };
        let report = TestReport {
            status: COMPLETED_STATUS.to_string(),
            test_name: ctx.method.name.clone(),
            class_name: ctx.method.class_name.clone(),
            test_status: Some(status.to_string()),
            device_udid: ctx.device.as_ref().map(|d| d.udid.clone()),
            logs,
        };
        if let Err(e) = self.collaborators.reporter.send(url, &report) {
            log::error!(
                "Failed to report '{}' to {}: {:#}",
                ctx.method.qualified_name(),
                url,
                e
            );
        }
    }
}
