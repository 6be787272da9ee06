//! Step-level progress reporting.
//!
//! A sink receives `(step, message, status)` triples. Delivery is best
//! effort: a sink never fails the provisioning run.

use std::fmt;
use std::future::Future;

use log::{info, warn};
use serde::Serialize;

use crate::error::ConfigurationError;

/// Marker attached to each report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Progress.
    Progress,
    /// The step failed.
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "-",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of step reports.
pub trait LogSink: Send + Sync {
    fn report(
        &self,
        step: &str,
        message: &str,
        status: Status,
    ) -> impl Future<Output = ()> + Send;
}

/// Writes reports to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    async fn report(&self, step: &str, message: &str, status: Status) {
        match status {
            Status::Progress => info!("[{}]({}) {}", step, status, message),
            Status::Failed => warn!("[{}]({}) {}", step, status, message),
        }
    }
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: i64,
    level: &'a str,
    step: &'a str,
    log: &'a str,
    status: &'a str,
    prefix: &'a str,
}

#[derive(Debug, Serialize)]
struct LogReport<'a> {
    task_id: &'a str,
    token: &'a str,
    logs: Vec<LogEntry<'a>>,
}

/// POSTs reports to `<callback_url>/report_log/`.
#[derive(Debug, Clone)]
pub struct CallbackSink {
    client: reqwest::Client,
    endpoint: String,
    task_id: String,
    token: String,
    prefix: String,
}

impl CallbackSink {
    /// Reports go to `callback_url`, optionally through an HTTP proxy.
    pub fn new(
        callback_url: &str,
        task_id: impl Into<String>,
        token: impl Into<String>,
        proxy: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let invalid = |address: &str, e: reqwest::Error| ConfigurationError::InvalidProxy {
            address: address.to_string(),
            reason: e.to_string(),
        };

        let mut builder = reqwest::Client::builder();
        if let Some(address) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(address).map_err(|e| invalid(address, e))?);
        }
        let client = builder
            .build()
            .map_err(|e| invalid(proxy.unwrap_or_default(), e))?;

        Ok(Self {
            client,
            endpoint: format!("{}/report_log/", callback_url.trim_end_matches('/')),
            task_id: task_id.into(),
            token: token.into(),
            prefix: "[proxy]".to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn payload<'a>(&'a self, step: &'a str, message: &'a str, status: Status) -> LogReport<'a> {
        LogReport {
            task_id: &self.task_id,
            token: &self.token,
            logs: vec![LogEntry {
                timestamp: chrono::Utc::now().timestamp(),
                level: match status {
                    Status::Progress => "INFO",
                    Status::Failed => "ERROR",
                },
                step,
                log: message,
                status: status.as_str(),
                prefix: &self.prefix,
            }],
        }
    }
}

impl LogSink for CallbackSink {
    async fn report(&self, step: &str, message: &str, status: Status) {
        ConsoleSink.report(step, message, status).await;

        let payload = self.payload(step, message, status);
        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("report_log answered {} for step {}", response.status(), step)
            }
            Ok(_) => {}
            Err(e) => warn!("failed to deliver log for step {}: {}", step, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let sink = CallbackSink::new("http://nodeman/api/", "42", "tok", None).unwrap();
        assert_eq!(sink.endpoint(), "http://nodeman/api/report_log/");

        let value = serde_json::to_value(sink.payload("send_cmd", "ls", Status::Failed)).unwrap();
        assert_eq!(value["task_id"], "42");
        assert_eq!(value["token"], "tok");
        let entry = &value["logs"][0];
        assert_eq!(entry["step"], "send_cmd");
        assert_eq!(entry["log"], "ls");
        assert_eq!(entry["status"], "FAILED");
        assert_eq!(entry["level"], "ERROR");
        assert_eq!(entry["prefix"], "[proxy]");
        assert!(entry["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_invalid_proxy() {
        assert!(matches!(
            CallbackSink::new("http://x", "1", "t", Some("::not a url::")),
            Err(ConfigurationError::InvalidProxy { .. })
        ));
    }

    #[tokio::test]
    async fn test_undeliverable_report_is_swallowed() {
        let sink = CallbackSink::new("http://127.0.0.1:9", "1", "t", None).unwrap();
        sink.report("proxy_fail", "boom", Status::Failed).await;
    }
}
