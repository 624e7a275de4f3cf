//! # Suite Runner
//!
//! Plays the outer test runner: it owns the worker threads and calls the
//! [`LifecycleController`] hooks around each test body in the order a test
//! framework would:
//!
//! `on_suite_start` → per method and attempt: `on_test_start` → `before_invocation`
//! → body → `after_invocation` → `on_test_skipped` (runner-decided skips only)
//! → `on_suite_finish`.
//!
//! Methods run in parallel on a `rayon` pool, one worker thread per running method.
//! A failing method with a `retry_count` directive is run again on the same worker.

use crate::core::lifecycle::{ExecutionContext, LifecycleController};
use crate::models::{SessionRecord, TestMethod, TestStatus};
use anyhow::Result;
use rayon::prelude::*;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Returned by a test body to have the runner report it as skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Skipped: {reason}")]
pub struct SkipTest {
    /// Shown in the case report.
    pub reason: String,
}

impl SkipTest {
    /// A skip explained by `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

type TestBody = Arc<dyn Fn(&ExecutionContext) -> Result<()> + Send + Sync>;

/// A test method and the code to run for it.
///
/// A body that returns a [`SkipTest`] error is reported as skipped by the runner;
/// any other error, or a panic, is a failure.
#[derive(Clone)]
pub struct TestCase {
    /// The method to run.
    pub method: TestMethod,
    body: TestBody,
}

impl TestCase {
    /// Pairs `method` with the code that tests it.
    pub fn new<F>(method: TestMethod, body: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            method,
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Final outcome of one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    /// The method as it stands after its last attempt, description included.
    pub method: TestMethod,
    /// Status of the last attempt.
    pub status: TestStatus,
    /// Attempts made, retries included.
    pub attempts: u32,
    /// Why the last attempt failed or was skipped.
    pub error: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteReport {
    /// One entry per case, in input order.
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    /// Number of cases that ended with `status`.
    pub fn count(&self, status: TestStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    /// The first case whose method is called `method_name`.
    pub fn find(&self, method_name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.method.name == method_name)
    }
}

/// Runs test cases through a [`LifecycleController`] on a pool of worker threads.
#[derive(Debug)]
pub struct SuiteRunner {
    controller: Arc<LifecycleController>,
    threads: usize,
}

impl SuiteRunner {
    /// A runner with `threads` workers; zero counts as one.
    pub fn new(controller: Arc<LifecycleController>, threads: usize) -> Self {
        Self {
            controller,
            threads: threads.max(1),
        }
    }

    /// Runs every case and returns their outcomes in input order.
    pub fn run(&self, cases: Vec<TestCase>) -> Result<SuiteReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("atd-worker-{}", i))
            .build()?;

        log::info!(
            "Running {} test case(s) on {} worker thread(s).",
            cases.len(),
            self.threads
        );
        self.controller.on_suite_start();
        let reports: Vec<CaseReport> =
            pool.install(|| cases.into_par_iter().map(|case| self.run_case(case)).collect());
        self.controller.on_suite_finish();

        Ok(SuiteReport { cases: reports })
    }

    fn run_case(&self, case: TestCase) -> CaseReport {
        let metadata = self.controller.metadata_for(&case.method);
        let max_attempts = metadata.retry_count.unwrap_or(0).saturating_add(1);
        let mut method = case.method;
        let mut attempt = 0;

        loop {
            let (ctx, status, error) = self.run_attempt(&case.body, method.clone(), attempt);
            if let Some(description) = ctx.description() {
                method.description = Some(description.to_string());
            }
            attempt += 1;

            if status == TestStatus::Failure && attempt < max_attempts {
                log::info!(
                    "'{}' failed; retrying ({}/{}).",
                    method.qualified_name(),
                    attempt,
                    max_attempts - 1
                );
                continue;
            }
            return CaseReport {
                method,
                status,
                attempts: attempt,
                error,
            };
        }
    }

    fn run_attempt(
        &self,
        body: &TestBody,
        method: TestMethod,
        attempt: u32,
    ) -> (ExecutionContext, TestStatus, Option<String>) {
        let controller = &self.controller;
        let mut ctx = controller.on_test_start(method, attempt);
        controller.sessions().register(
            ctx.thread(),
            SessionRecord {
                result_id: ctx.result_id(),
                method: ctx.method().qualified_name(),
                device_udid: ctx.device().map(|d| d.udid.clone()),
            },
        );

        let (status, error) = match controller.before_invocation(&mut ctx) {
            Err(signal) => (TestStatus::Skipped, Some(signal.to_string())),
            Ok(()) => invoke(body, &ctx),
        };

        controller.after_invocation(&mut ctx, status);
        if status == TestStatus::Skipped && !ctx.skip_signalled() {
            controller.on_test_skipped(&ctx);
        }
        (ctx, status, error)
    }
}

fn invoke(body: &TestBody, ctx: &ExecutionContext) -> (TestStatus, Option<String>) {
    match panic::catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(Ok(())) => (TestStatus::Success, None),
        Ok(Err(e)) if e.downcast_ref::<SkipTest>().is_some() => {
            (TestStatus::Skipped, Some(e.to_string()))
        }
        Ok(Err(e)) => (TestStatus::Failure, Some(format!("{:#}", e))),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "test body panicked".to_string());
            (TestStatus::Failure, Some(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capabilities::Capabilities;
    use crate::core::execution_registry;
    use crate::core::lifecycle::{Collaborators, SuiteState};
    use crate::core::override_resolver::EnvOverrides;
    use crate::core::testing::{Fakes, android_device};
    use crate::models::{MetadataRegistry, TestMetadata};
    use crate::system::device_pool::DevicePool;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    const WITH_SERVICE: &str = r#"{"ATDServiceHost": "reports.local", "ATDServicePort": "3000"}"#;

    fn controller(
        caps_json: &str,
        collaborators: Collaborators,
        metadata: MetadataRegistry,
    ) -> Arc<LifecycleController> {
        let caps = Capabilities::from_json_str(caps_json, &EnvOverrides::default()).unwrap();
        Arc::new(LifecycleController::new(&caps, collaborators, metadata))
    }

    fn directives(method: &TestMethod, metadata: TestMetadata) -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.insert(method, metadata);
        registry
    }

    #[test]
    fn test_cases_share_the_device_pool() {
        let fakes = Fakes::new(android_device("unused"), "ANDROID");
        let pool = Arc::new(DevicePool::new([
            android_device("emulator-5554"),
            android_device("emulator-5556"),
        ]));
        let collaborators = Collaborators {
            devices: pool.clone(),
            ..fakes.collaborators()
        };
        let controller = controller("{}", collaborators, MetadataRegistry::new());

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cases: Vec<TestCase> = (0..6)
            .map(|i| {
                let (controller, pool) = (controller.clone(), pool.clone());
                let (active, peak) = (active.clone(), peak.clone());
                TestCase::new(TestMethod::new("CheckoutTest", format!("case_{}", i)), move |ctx| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);

                    if execution_registry::current_method()? != *ctx.method() {
                        return Err(anyhow!("registry holds another method"));
                    }
                    if controller.sessions().get(ctx.thread(), ctx.result_id()).is_none() {
                        return Err(anyhow!("no session record during the body"));
                    }
                    if pool.held_by_current_thread().as_ref() != ctx.device() {
                        return Err(anyhow!("worker does not hold the context's device"));
                    }
                    Ok(())
                })
            })
            .collect();

        let report = SuiteRunner::new(controller.clone(), 3).run(cases).unwrap();

        assert_eq!(report.count(TestStatus::Success), 6, "{:?}", report);
        assert!(report.cases.iter().all(|c| c.attempts == 1));
        assert!(peak.load(Ordering::SeqCst) <= pool.size());
        assert_eq!(pool.idle_count(), 2);
        assert!(controller.sessions().is_empty());
        assert_eq!(fakes.journal.count("server.start"), 1);
        assert_eq!(controller.suite_state(), SuiteState::Finished);
    }

    #[test]
    fn test_failed_case_is_retried_until_it_passes() {
        let fakes = Fakes::new(android_device("emulator-5554"), "ANDROID");
        let method = TestMethod::new("LoginTest", "flaky_login");
        let metadata = directives(
            &method,
            TestMetadata {
                retry_count: Some(2),
                ..TestMetadata::default()
            },
        );
        let controller = controller(WITH_SERVICE, fakes.collaborators(), metadata);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let case = TestCase::new(method, move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow!("element not found"));
            }
            Ok(())
        });

        let report = SuiteRunner::new(controller, 1).run(vec![case]).unwrap();
        let outcome = report.find("flaky_login").unwrap();

        assert_eq!(outcome.status, TestStatus::Success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fakes.journal.count("driver.start"), 2);
        // The retried attempt produces no logs and no report.
        assert_eq!(fakes.journal.count("logger.end"), 1);
        let reports = fakes.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.test_status.as_deref(), Some("PASS"));
        // The second run finds the UDID in the carried description and appends.
        let description = outcome.method.description.as_deref().unwrap();
        assert_eq!(description.matches("UDID: emulator-5554").count(), 2);
    }

    #[test]
    fn test_retries_stop_when_attempts_are_exhausted() {
        let fakes = Fakes::new(android_device("emulator-5554"), "ANDROID");
        let method = TestMethod::new("LoginTest", "broken_login");
        let metadata = directives(
            &method,
            TestMetadata {
                retry_count: Some(1),
                ..TestMetadata::default()
            },
        );
        let controller = controller(WITH_SERVICE, fakes.collaborators(), metadata);
        let case = TestCase::new(method, |_| Err(anyhow!("login button missing")));

        let report = SuiteRunner::new(controller, 1).run(vec![case]).unwrap();
        let outcome = report.find("broken_login").unwrap();

        assert_eq!(outcome.status, TestStatus::Failure);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error.as_deref(), Some("login button missing"));
        let reports = fakes.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.test_status.as_deref(), Some("FAIL"));
    }

    #[test]
    fn test_platform_skip_reports_once_and_never_runs_the_body() {
        let fakes = Fakes::new(android_device("emulator-5554"), "ANDROID");
        let method = TestMethod::new("PaymentTest", "apple_pay");
        let metadata = directives(
            &method,
            TestMetadata {
                skip_on_platform: Some("android".to_string()),
                ..TestMetadata::default()
            },
        );
        let controller = controller(WITH_SERVICE, fakes.collaborators(), metadata);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let case = TestCase::new(method, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let report = SuiteRunner::new(controller.clone(), 1).run(vec![case]).unwrap();
        let outcome = report.find("apple_pay").unwrap();

        assert_eq!(outcome.status, TestStatus::Skipped);
        assert!(outcome.error.as_deref().unwrap().ends_with(":::android"));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(fakes.reports().len(), 1);
        assert_eq!(fakes.journal.count("driver.stop"), 1);
        assert_eq!(fakes.journal.count("devices.free"), 1);
        assert!(controller.sessions().is_empty());
    }

    #[test]
    fn test_body_skip_is_reported_after_teardown() {
        let fakes = Fakes::new(android_device("emulator-5554"), "ANDROID");
        let controller = controller(WITH_SERVICE, fakes.collaborators(), MetadataRegistry::new());
        let case = TestCase::new(TestMethod::new("SearchTest", "voice_search"), |_| {
            Err(SkipTest::new("microphone unavailable").into())
        });

        let report = SuiteRunner::new(controller, 1).run(vec![case]).unwrap();
        let outcome = report.find("voice_search").unwrap();

        assert_eq!(outcome.status, TestStatus::Skipped);
        assert_eq!(outcome.error.as_deref(), Some("Skipped: microphone unavailable"));

        // One report from teardown with the logs, one skip notification without.
        let reports = fakes.reports();
        assert_eq!(reports.len(), 2);
        assert!(
            reports
                .iter()
                .all(|(_, r)| r.test_status.as_deref() == Some("SKIP"))
        );
        assert!(!reports[0].1.logs.is_empty());
        assert!(reports[1].1.logs.is_empty());

        let lines = fakes.journal.lines();
        let free = fakes.journal.position("devices.free").unwrap();
        let last_send = lines
            .iter()
            .rposition(|l| l.starts_with("reporter.send"))
            .unwrap();
        assert!(free < last_send);
    }

    #[test]
    fn test_panicking_body_is_a_failure_and_still_tears_down() {
        let fakes = Fakes::new(android_device("emulator-5554"), "ANDROID");
        let controller = controller("{}", fakes.collaborators(), MetadataRegistry::new());
        let case = TestCase::new(TestMethod::new("CartTest", "add_item"), |_| -> Result<()> {
            panic!("stale element reference")
        });

        let report = SuiteRunner::new(controller.clone(), 2).run(vec![case]).unwrap();
        let outcome = report.find("add_item").unwrap();

        assert_eq!(outcome.status, TestStatus::Failure);
        assert_eq!(outcome.error.as_deref(), Some("stale element reference"));
        assert_eq!(fakes.journal.count("driver.stop"), 1);
        assert_eq!(fakes.journal.count("devices.free"), 1);
        assert!(controller.sessions().is_empty());
    }
}
