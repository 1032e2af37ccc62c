//! Authenticated HTTP client for the business API
//!
//! Every call goes through the same pipeline: resolve the URL, attach
//! identity headers (or refuse if a protected path has no token), send,
//! hand 401s to the refresh coordinator, unwrap the envelope, and on failure
//! report and notify before returning the error.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::{ApiError, AuthExpiredReason};
use super::transport::{HttpRequest, RawResponse, ReqwestTransport, Transport};
use crate::auth::refresh::{RefreshCoordinator, RefreshOutcome, Ticket};
use crate::auth::{Session, StoredToken, TokenStore};
use crate::config::Config;
use crate::hooks::{
    ErrorReport, ErrorReporter, HttpReporter, Navigator, NotifyLevel, Notifier, TerminalNavigator,
    TerminalNotifier, TracingReporter,
};
use crate::models::{RefreshRequest, RefreshResponse, REFRESH_PATH};

const TENANT_HEADER: &str = "x-tenant-id";
const USER_HEADER: &str = "x-user-id";
const REQUESTED_WITH_HEADER: &str = "x-requested-with";

/// A call as issued by a caller, before identity headers are attached.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Set once the request has been through the refresh path
    pub retry: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retry: false,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

}

/// An error together with what the server sent, for the error report.
struct Failure {
    error: ApiError,
    status: Option<u16>,
    body: Option<String>,
}

impl From<ApiError> for Failure {
    fn from(error: ApiError) -> Self {
        Self {
            status: error.status(),
            error,
            body: None,
        }
    }
}

/// Parse the API base, making sure relative paths resolve below it.
fn parse_base(api_base: &str) -> Result<Url, ApiError> {
    let mut base = Url::parse(api_base)
        .map_err(|e| ApiError::InvalidRequest(format!("bad API base {}: {}", api_base, e)))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn resolve(base: &Url, path: &str) -> Result<Url, ApiError> {
    let resolved = if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)
    } else {
        base.join(path.trim_start_matches('/'))
    };
    resolved.map_err(|e| ApiError::InvalidRequest(format!("bad path {}: {}", path, e)))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| {
        ApiError::InvalidRequest("stored credential is not a valid header value".to_string())
    })
}

pub struct ApiClient {
    base: Url,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    public_paths: Vec<String>,
    login_route: String,
    refresher: RefreshCoordinator,
    /// Error reports still being delivered
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

pub struct ApiClientBuilder {
    api_base: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    public_paths: Vec<String>,
    login_route: String,
}

impl ApiClientBuilder {
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn public_paths(mut self, paths: Vec<String>) -> Self {
        self.public_paths = paths;
        self
    }

    pub fn login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        Ok(ApiClient {
            base: parse_base(&self.api_base)?,
            transport: self.transport,
            store: self.store,
            navigator: self.navigator,
            notifier: self.notifier,
            reporter: self.reporter,
            public_paths: self.public_paths,
            login_route: self.login_route,
            refresher: RefreshCoordinator::new(),
            deliveries: Mutex::new(Vec::new()),
        })
    }
}

impl ApiClient {
    /// Builder with terminal collaborators and the default public paths.
    pub fn builder(
        api_base: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> ApiClientBuilder {
        let defaults = Config::default();
        ApiClientBuilder {
            api_base: api_base.into(),
            transport,
            store,
            navigator: Arc::new(TerminalNavigator),
            notifier: Arc::new(TerminalNotifier),
            reporter: Arc::new(TracingReporter),
            public_paths: defaults.public_paths,
            login_route: defaults.login_route,
        }
    }

    /// Production client: reqwest transport, terminal collaborators, and a
    /// remote error log when one is configured.
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))
            .context("Failed to build HTTP client")?;
        let mut builder = Self::builder(config.api_base.clone(), Arc::new(transport), store)
            .public_paths(config.public_paths.clone())
            .login_route(config.login_route.clone());

        if let Some(ref log_path) = config.error_log_path {
            let base = parse_base(&config.api_base).context("Invalid api_base in config")?;
            let endpoint = resolve(&base, log_path).context("Invalid error_log_path in config")?;
            builder = builder.reporter(Arc::new(HttpReporter::new(
                reqwest::Client::new(),
                endpoint.to_string(),
            )));
        }

        builder.build().context("Invalid api_base in config")
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Requests currently parked behind an in-flight refresh.
    #[cfg(test)]
    pub(crate) fn pending_refreshes(&self) -> usize {
        self.refresher.pending()
    }

    /// Whether a token refresh is currently in flight.
    #[cfg(test)]
    pub(crate) fn is_refreshing(&self) -> bool {
        self.refresher.is_refreshing()
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(RequestDescriptor::new(Method::GET, path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(RequestDescriptor::new(Method::POST, path).json(body))
            .await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(RequestDescriptor::new(Method::PUT, path).json(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.request(RequestDescriptor::new(Method::DELETE, path))
            .await
    }

    /// Send a request and return the unwrapped payload. Token refresh is
    /// invisible to the caller.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Value, ApiError> {
        let request_id = Uuid::new_v4();
        let method = descriptor.method.clone();
        let path = descriptor.path.clone();

        match self.dispatch(descriptor).await {
            Ok(payload) => Ok(payload),
            Err(failure) => {
                let url = resolve(&self.base, &path)
                    .map(|u| u.to_string())
                    .unwrap_or(path);
                self.surface(request_id, &method, &url, &failure);
                Err(failure.error)
            }
        }
    }

    /// Wait up to `limit` for error reports that are still in flight.
    /// Delivery failures were already logged; this only keeps a short-lived
    /// process from exiting before its reports are out.
    pub async fn flush(&self, limit: Duration) {
        let pending = std::mem::take(
            &mut *self
                .deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        if tokio::time::timeout(limit, futures::future::join_all(pending))
            .await
            .is_err()
        {
            tracing::debug!("Gave up on {} error report(s) after {:?}", count, limit);
        }
    }

    /// Run one refresh cycle now, sharing it with any cycle already running.
    pub async fn force_refresh(&self) -> Result<(), ApiError> {
        let current = self.store.get_access_token().map(|t| t.token);
        if self.refresher.is_refreshing() {
            tracing::debug!("Joining the token refresh already in flight");
        }
        self.refreshed_token(current.as_deref())
            .await
            .map(|_| ())
            .map_err(ApiError::AuthExpired)
    }

    async fn dispatch(&self, mut descriptor: RequestDescriptor) -> Result<Value, Failure> {
        let url = resolve(&self.base, &descriptor.path)?;
        let public = self.is_public(&url);
        let mut token_override: Option<String> = None;

        loop {
            let request = self.outbound(&descriptor, &url, public, token_override.as_deref())?;
            let sent_with = request.bearer().map(String::from);
            tracing::debug!(
                "{} {}{}",
                request.method,
                url,
                if descriptor.retry { " (replay)" } else { "" }
            );

            let response = self
                .transport
                .send(request)
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;

            if response.status != StatusCode::UNAUTHORIZED || public {
                return self.inbound(response);
            }

            if descriptor.retry {
                tracing::warn!("{} {} still unauthorized after refresh", descriptor.method, url);
                let reason = AuthExpiredReason::RetryRejected;
                self.clear_credentials();
                self.announce_expiry(&reason);
                return Err(Failure {
                    error: ApiError::AuthExpired(reason),
                    status: Some(401),
                    body: Some(response.body),
                });
            }

            descriptor.retry = true;
            match self.refreshed_token(sent_with.as_deref()).await {
                Ok(token) => token_override = Some(token),
                Err(reason) => {
                    return Err(Failure {
                        error: ApiError::AuthExpired(reason),
                        status: Some(401),
                        body: Some(response.body),
                    })
                }
            }
        }
    }

    fn is_public(&self, url: &Url) -> bool {
        let base_path = self.base.path().trim_end_matches('/');
        let path = url.path().strip_prefix(base_path).unwrap_or(url.path());
        self.public_paths.iter().any(|p| {
            let p = p.trim_end_matches('/');
            path == p || path.strip_prefix(p).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Build the wire request. A replay passes the token it was woken with.
    fn outbound(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        public: bool,
        token_override: Option<&str>,
    ) -> Result<HttpRequest, ApiError> {
        let session = self.store.session();
        let token = token_override
            .map(String::from)
            .or_else(|| session.access_token.as_ref().map(|t| t.token.clone()));

        if token.is_none() && !public {
            tracing::debug!("No access token for protected {}", url);
            self.navigator.redirect_to_login(&self.login_route);
            return Err(ApiError::LoginRequired {
                path: descriptor.path.clone(),
            });
        }

        let mut request = HttpRequest::new(descriptor.method.clone(), url.clone());
        request.headers = descriptor.headers.clone();
        request.body = descriptor.body.clone();
        self.attach_identity(&mut request.headers, token.as_deref(), &session)?;
        Ok(request)
    }

    fn attach_identity(
        &self,
        headers: &mut HeaderMap,
        token: Option<&str>,
        session: &Session,
    ) -> Result<(), ApiError> {
        headers.insert(
            HeaderName::from_static(REQUESTED_WITH_HEADER),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }
        if let Some(ref tenant_id) = session.tenant_id {
            headers.insert(HeaderName::from_static(TENANT_HEADER), header_value(tenant_id)?);
        }
        if let Some(ref user_id) = session.user_id {
            headers.insert(HeaderName::from_static(USER_HEADER), header_value(user_id)?);
        }
        Ok(())
    }

    fn inbound(&self, response: RawResponse) -> Result<Value, Failure> {
        let status = response.status.as_u16();
        if !response.status.is_success() {
            let message = match Envelope::parse(&response.body) {
                Envelope::Failure { message, .. } => message,
                _ => None,
            };
            return Err(Failure {
                error: ApiError::Http {
                    status,
                    body: response.body.clone(),
                    message,
                },
                status: Some(status),
                body: Some(response.body),
            });
        }

        Envelope::parse(&response.body)
            .into_result()
            .map_err(|error| Failure {
                error,
                status: Some(status),
                body: Some(response.body),
            })
    }

    /// Obtain a token to replay with after a 401, leading, joining or
    /// skipping a refresh cycle as the coordinator decides.
    async fn refreshed_token(&self, sent_with: Option<&str>) -> RefreshOutcome {
        let current = self.store.get_access_token().map(|t| t.token);

        match self.refresher.enter(sent_with, current.as_deref()) {
            Ticket::Replay(token) => Ok(token),
            Ticket::Wait(rx) => {
                tracing::debug!(
                    "Waiting for token refresh ({} request(s) queued)",
                    self.refresher.pending()
                );
                rx.await.unwrap_or_else(|_| {
                    Err(AuthExpiredReason::RefreshFailed(
                        "refresh was abandoned".to_string(),
                    ))
                })
            }
            Ticket::Lead(lease) => {
                let outcome = self.run_refresh().await;
                if outcome.is_err() {
                    self.clear_credentials();
                }
                lease.settle(&outcome);
                if let Err(ref reason) = outcome {
                    self.announce_expiry(reason);
                }
                outcome
            }
        }
    }

    /// The single network round-trip of a refresh cycle.
    async fn run_refresh(&self) -> RefreshOutcome {
        use AuthExpiredReason::RefreshFailed;

        let session = self.store.session();
        let Some(refresh_token) = session.refresh_token.clone() else {
            tracing::warn!("Access token rejected and no refresh token stored");
            return Err(AuthExpiredReason::NoRefreshToken);
        };

        let url = resolve(&self.base, REFRESH_PATH).map_err(|e| RefreshFailed(e.to_string()))?;
        let mut request = HttpRequest::new(Method::POST, url);
        self.attach_identity(&mut request.headers, None, &session)
            .map_err(|e| RefreshFailed(e.to_string()))?;
        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| RefreshFailed(e.to_string()))?;
        request.body = Some(body);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshFailed(e.to_string()))?;
        if !response.status.is_success() {
            return Err(RefreshFailed(format!("HTTP {}", response.status.as_u16())));
        }

        let payload = Envelope::parse(&response.body)
            .into_result()
            .map_err(|e| RefreshFailed(e.to_string()))?;
        let RefreshResponse {
            token,
            refresh_token,
        } = serde_json::from_value(payload)
            .map_err(|e| RefreshFailed(format!("unexpected refresh response: {}", e)))?;

        let stored = StoredToken::new(token.clone(), None);
        self.store
            .update_session(&mut |s| {
                s.access_token = Some(stored.clone());
                if let Some(ref rotated) = refresh_token {
                    s.refresh_token = Some(rotated.clone());
                }
            })
            .map_err(|e| RefreshFailed(format!("could not persist refreshed token: {:#}", e)))?;

        Ok(token)
    }

    fn clear_credentials(&self) {
        if let Err(e) = self.store.clear_tokens() {
            tracing::warn!("Failed to clear stored credentials: {:#}", e);
        }
    }

    fn announce_expiry(&self, reason: &AuthExpiredReason) {
        tracing::warn!("Session expired: {}", reason);
        let message = ApiError::AuthExpired(reason.clone()).user_message();
        self.notifier.notify(NotifyLevel::Error, &message);
        self.navigator.redirect_to_login(&self.login_route);
    }

    /// Report every failure, and notify for all but session expiry, which
    /// [`Self::announce_expiry`] has already shown once for the whole cycle.
    fn surface(&self, request_id: Uuid, method: &Method, url: &str, failure: &Failure) {
        let report = ErrorReport {
            request_id: request_id.to_string(),
            method: method.to_string(),
            url: url.to_string(),
            status: failure.status,
            response_body: failure.body.clone(),
            message: failure.error.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let delivery = self.reporter.report(report);
        let handle = tokio::spawn(async move {
            if let Err(e) = delivery.await {
                tracing::debug!("Error report not delivered: {:#}", e);
            }
        });
        let mut deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        deliveries.retain(|h| !h.is_finished());
        deliveries.push(handle);
        drop(deliveries);

        if failure.error.is_fatal() {
            return;
        }
        let level = match failure.error {
            ApiError::Business { .. } => NotifyLevel::Warning,
            _ => NotifyLevel::Error,
        };
        self.notifier.notify(level, &failure.error.user_message());
    }
}
