// src/core/testing.rs

//! Recording fakes of every collaborator, shared by the lifecycle and runner tests.
//! Each fake appends a line to a common journal so tests can assert call order.

use crate::core::collaborators::{
    DeviceAllocator, DriverSessionManager, ResultReporter, ScreenshotExtractor,
    ServerProcessManager, TestLogger,
};
use crate::core::lifecycle::Collaborators;
use crate::core::session::SessionRegistry;
use crate::models::{DeviceHandle, LogMap, TestMethod, TestReport, TestStatus};
use anyhow::{Result, anyhow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct Journal {
    lines: Mutex<Vec<String>>,
}

impl Journal {
    pub(crate) fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push(line.into());
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    pub(crate) fn position(&self, line: &str) -> Option<usize> {
        self.lines().iter().position(|l| l == line)
    }
}

pub(crate) fn android_device(udid: &str) -> DeviceHandle {
    DeviceHandle {
        udid: udid.to_string(),
        name: "Pixel 7".to_string(),
        model: "pixel7".to_string(),
        platform: "ANDROID".to_string(),
        host_name: "127.0.0.1".to_string(),
        is_cloud: false,
    }
}

pub(crate) struct FakeDevices {
    pub(crate) journal: Arc<Journal>,
    pub(crate) device: DeviceHandle,
    pub(crate) fail_allocation: AtomicBool,
}

impl DeviceAllocator for FakeDevices {
    fn next_available(&self) -> Result<DeviceHandle> {
        if self.fail_allocation.load(Ordering::SeqCst) {
            self.journal.push("devices.next_available failed");
            return Err(anyhow!("no device left"));
        }
        self.journal.push("devices.next_available");
        Ok(self.device.clone())
    }

    fn allocate(&self, device: &DeviceHandle) -> Result<()> {
        self.journal.push(format!("devices.allocate {}", device.udid));
        Ok(())
    }

    fn free(&self) -> Result<()> {
        self.journal.push("devices.free");
        Ok(())
    }
}

pub(crate) struct FakeServer {
    pub(crate) journal: Arc<Journal>,
    pub(crate) fail: bool,
}

impl ServerProcessManager for FakeServer {
    fn start(&self) -> Result<()> {
        self.journal.push("server.start");
        if self.fail {
            return Err(anyhow!("appium binary not found"));
        }
        Ok(())
    }
}

pub(crate) struct FakeDriver {
    pub(crate) journal: Arc<Journal>,
    /// Read on `release` to record how many session records are still live.
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) platform: String,
    pub(crate) fail_start: AtomicBool,
    pub(crate) fail_stop: AtomicBool,
}

impl DriverSessionManager for FakeDriver {
    fn start(&self, device: &DeviceHandle) -> Result<()> {
        self.journal.push(format!("driver.start {}", device.udid));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(anyhow!("session not created"));
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.journal.push("driver.stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(anyhow!("session already gone"));
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.journal.push("driver.release");
        self.journal
            .push(format!("sessions.live {}", self.sessions.len()));
        Ok(())
    }

    fn current_platform(&self) -> Result<String> {
        Ok(self.platform.clone())
    }
}

pub(crate) struct FakeLogger {
    pub(crate) journal: Arc<Journal>,
}

impl TestLogger for FakeLogger {
    fn start(&self, method_name: &str, class_name: &str) -> Result<()> {
        self.journal
            .push(format!("logger.start {}.{}", class_name, method_name));
        Ok(())
    }

    fn end(&self, method: &TestMethod, status: TestStatus, device_model: &str) -> Result<LogMap> {
        self.journal
            .push(format!("logger.end {} {} {}", method.name, status, device_model));
        Ok(LogMap::from([(
            "deviceLogs".to_string(),
            format!("target/logs/{}.log", method.name),
        )]))
    }
}

pub(crate) struct FakeScreenshots {
    pub(crate) journal: Arc<Journal>,
}

impl ScreenshotExtractor for FakeScreenshots {
    fn extract(&self, udid: &str, method: &TestMethod) -> Result<Vec<String>> {
        self.journal
            .push(format!("screenshots.extract {} {}", udid, method.name));
        Ok(vec![format!("target/screenshots/{}/{}.png", udid, method.name)])
    }
}

#[derive(Default)]
pub(crate) struct FakeReporter {
    pub(crate) journal: Arc<Journal>,
    pub(crate) reports: Mutex<Vec<(String, TestReport)>>,
}

impl ResultReporter for FakeReporter {
    fn send(&self, url: &str, report: &TestReport) -> Result<()> {
        self.journal
            .push(format!("reporter.send {} {}", report.status, report.test_name));
        self.reports
            .lock()
            .unwrap()
            .push((url.to_string(), report.clone()));
        Ok(())
    }
}

/// A full set of fakes wired to one journal.
pub(crate) struct Fakes {
    pub(crate) journal: Arc<Journal>,
    pub(crate) devices: Arc<FakeDevices>,
    pub(crate) driver: Arc<FakeDriver>,
    pub(crate) reporter: Arc<FakeReporter>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) server_fails: bool,
}

impl Fakes {
    pub(crate) fn new(device: DeviceHandle, driver_platform: &str) -> Self {
        let journal = Arc::new(Journal::default());
        let sessions = Arc::new(SessionRegistry::new());
        Self {
            devices: Arc::new(FakeDevices {
                journal: journal.clone(),
                device,
                fail_allocation: AtomicBool::new(false),
            }),
            driver: Arc::new(FakeDriver {
                journal: journal.clone(),
                sessions: sessions.clone(),
                platform: driver_platform.to_string(),
                fail_start: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
            }),
            reporter: Arc::new(FakeReporter {
                journal: journal.clone(),
                reports: Mutex::new(Vec::new()),
            }),
            sessions,
            server_fails: false,
            journal,
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            devices: self.devices.clone(),
            server: Arc::new(FakeServer {
                journal: self.journal.clone(),
                fail: self.server_fails,
            }),
            driver: self.driver.clone(),
            logger: Arc::new(FakeLogger {
                journal: self.journal.clone(),
            }),
            screenshots: Arc::new(FakeScreenshots {
                journal: self.journal.clone(),
            }),
            reporter: self.reporter.clone(),
            sessions: self.sessions.clone(),
        }
    }

    pub(crate) fn reports(&self) -> Vec<(String, TestReport)> {
        self.reporter.reports.lock().unwrap().clone()
    }
}
