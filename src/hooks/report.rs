//! Best-effort error reporting

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use serde::Serialize;

/// One failed call, as sent to the error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub response_body: Option<String>,
    pub message: String,
    pub timestamp: String,
}

/// Sink for [`ErrorReport`]s. The client spawns the returned future and only
/// logs its failure; a reporter can never fail a request.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport) -> BoxFuture<'static, Result<()>>;
}

/// Writes reports to the tracing log.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: ErrorReport) -> BoxFuture<'static, Result<()>> {
        tracing::error!(
            request_id = %report.request_id,
            status = ?report.status,
            "{} {} failed: {}",
            report.method,
            report.url,
            report.message
        );
        Box::pin(async { Ok(()) })
    }
}

/// POSTs reports as JSON to a remote error-log endpoint.
pub struct HttpReporter {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpReporter {
    pub fn new(http: reqwest::Client, endpoint: String) -> Self {
        Self { http, endpoint }
    }
}

impl ErrorReporter for HttpReporter {
    fn report(&self, report: ErrorReport) -> BoxFuture<'static, Result<()>> {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let resp = http
                .post(&endpoint)
                .json(&report)
                .send()
                .await
                .with_context(|| format!("POST {} failed", endpoint))?;
            let status = resp.status();
            if !status.is_success() {
                bail!("error log rejected report (HTTP {})", status.as_u16());
            }
            Ok(())
        })
    }
}
