// src/system/reporter.rs

use crate::core::collaborators::ResultReporter;
use crate::models::TestReport;
use std::time::Duration;
use thiserror::Error;

/// A report could not be delivered.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The report could not be encoded.
    #[error("Failed to serialize the report: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The service did not answer in time.
    #[error("Request to '{url}' timed out.")]
    Timeout {
        /// The endpoint.
        url: String,
    },
    /// Connection, protocol or status failure.
    #[error("Request to '{url}' failed: {message}")]
    Network {
        /// The endpoint.
        url: String,
        /// What the transport reported.
        message: String,
    },
}

/// Posts reports as JSON to the results service. One blocking attempt per report.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    timeout: Duration,
}

impl HttpReporter {
    /// A reporter giving each request `timeout` in total.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Posts `report` to `url` as JSON.
    pub fn post(&self, url: &str, report: &TestReport) -> Result<(), ReportError> {
        let body = serde_json::to_vec(report)?;
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        log::debug!(
            "POST {} ({} for {}.{})",
            url,
            report.status,
            report.class_name,
            report.test_name
        );
        agent
            .post(url)
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|e| classify(url, e))?;
        Ok(())
    }
}

fn classify(url: &str, error: ureq::Error) -> ReportError {
    match error {
        ureq::Error::Timeout(_) => ReportError::Timeout {
            url: url.to_string(),
        },
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ReportError::Timeout {
            url: url.to_string(),
        },
        other => ReportError::Network {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

impl Default for HttpReporter {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ResultReporter for HttpReporter {
    fn send(&self, url: &str, report: &TestReport) -> anyhow::Result<()> {
        Ok(self.post(url, report)?)
    }
}
