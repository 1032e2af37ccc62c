//! Fakes shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::api::client::ApiClient;
use crate::api::transport::{HttpRequest, RawResponse, Transport, TransportError};
use crate::auth::{MemoryTokenStore, Session, StoredToken};
use crate::hooks::{ErrorReport, ErrorReporter, Navigator, NotifyLevel, Notifier};
use crate::models::REFRESH_PATH;

pub const BASE: &str = "http://backend.test";

/// How the fake answers the next refresh call.
pub enum RefreshReply {
    /// Succeed and start accepting `token` on protected routes
    Issue {
        token: String,
        refresh_token: Option<String>,
    },
    Status(u16),
    Unreachable,
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: String,
    public: bool,
    unreachable: bool,
}

/// In-process backend. Protected routes accept only the currently valid
/// bearer token; unknown routes answer with an envelope echoing the path.
pub struct FakeBackend {
    valid_token: Mutex<Option<String>>,
    reject_all: AtomicBool,
    routes: Mutex<HashMap<String, Route>>,
    refresh_replies: Mutex<VecDeque<RefreshReply>>,
    refresh_gate: Semaphore,
    gated: AtomicBool,
    requests: Mutex<Vec<HttpRequest>>,
    refresh_bodies: Mutex<Vec<Value>>,
}

impl FakeBackend {
    pub fn new(valid_token: Option<&str>) -> Self {
        Self {
            valid_token: Mutex::new(valid_token.map(String::from)),
            reject_all: AtomicBool::new(false),
            routes: Mutex::new(HashMap::new()),
            refresh_replies: Mutex::new(VecDeque::new()),
            refresh_gate: Semaphore::new(0),
            gated: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            refresh_bodies: Mutex::new(Vec::new()),
        }
    }

    fn add_route(&self, path: &str, route: Route) {
        self.routes.lock().unwrap().insert(path.to_string(), route);
    }

    pub fn route(&self, path: &str, status: u16, body: Value) {
        self.add_route(
            path,
            Route {
                status,
                body: body.to_string(),
                public: false,
                unreachable: false,
            },
        );
    }

    pub fn route_public(&self, path: &str, status: u16, body: Value) {
        self.add_route(
            path,
            Route {
                status,
                body: body.to_string(),
                public: true,
                unreachable: false,
            },
        );
    }

    pub fn unreachable(&self, path: &str) {
        self.add_route(
            path,
            Route {
                status: 0,
                body: String::new(),
                public: true,
                unreachable: true,
            },
        );
    }

    /// The current access token stops working.
    pub fn revoke(&self) {
        *self.valid_token.lock().unwrap() = None;
    }

    /// Protected routes answer 401 whatever token is presented.
    pub fn reject_everything(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    pub fn queue_refresh(&self, reply: RefreshReply) {
        self.refresh_replies.lock().unwrap().push_back(reply);
    }

    /// Park refresh calls until [`Self::release_refresh`].
    pub fn hold_refresh(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.refresh_gate.add_permits(1);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_bodies.lock().unwrap().len()
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.refresh_bodies.lock().unwrap().clone()
    }

    /// Non-refresh requests, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn answer_refresh(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        self.refresh_bodies
            .lock()
            .unwrap()
            .push(request.body.unwrap_or(Value::Null));

        if self.gated.load(Ordering::SeqCst) {
            self.refresh_gate.acquire().await.unwrap().forget();
        }

        let reply = self
            .refresh_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RefreshReply::Status(500));

        match reply {
            RefreshReply::Issue {
                token,
                refresh_token,
            } => {
                *self.valid_token.lock().unwrap() = Some(token.clone());
                Ok(respond(
                    200,
                    json!({"success": true, "data": {"token": token, "refresh_token": refresh_token}}),
                ))
            }
            RefreshReply::Status(status) => Ok(respond(
                status,
                json!({"success": false, "message": "invalid refresh token"}),
            )),
            RefreshReply::Unreachable => Err(TransportError("connection refused".to_string())),
        }
    }

    fn answer(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(request.clone());

        let route = self.routes.lock().unwrap().get(&path).cloned();
        let route = route.unwrap_or_else(|| Route {
            status: 200,
            body: json!({"success": true, "data": {"path": path}}).to_string(),
            public: false,
            unreachable: false,
        });

        if route.unreachable {
            return Err(TransportError("operation timed out".to_string()));
        }

        if !route.public {
            let valid = self.valid_token.lock().unwrap().clone();
            let accepted = !self.reject_all.load(Ordering::SeqCst)
                && valid.is_some()
                && request.bearer() == valid.as_deref();
            if !accepted {
                return Ok(respond(
                    401,
                    json!({"success": false, "message": "token expired"}),
                ));
            }
        }

        Ok(RawResponse {
            status: StatusCode::from_u16(route.status).unwrap(),
            body: route.body,
        })
    }
}

fn respond(status: u16, body: Value) -> RawResponse {
    RawResponse {
        status: StatusCode::from_u16(status).unwrap(),
        body: body.to_string(),
    }
}

impl Transport for FakeBackend {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        Box::pin(async move {
            if request.url.path() == REFRESH_PATH {
                self.answer_refresh(request).await
            } else {
                self.answer(request)
            }
        })
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, route: &str) {
        self.redirects.lock().unwrap().push(route.to_string());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(NotifyLevel, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(NotifyLevel, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    delivered: Arc<AtomicUsize>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Make every delivery take `delay` before it completes.
    pub fn delay_deliveries(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Deliveries that ran to completion.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: ErrorReport) -> BoxFuture<'static, anyhow::Result<()>> {
        self.reports.lock().unwrap().push(report);
        let failing = self.failing.load(Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        let delivered = self.delivered.clone();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if failing {
                anyhow::bail!("error log unavailable");
            }
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// A client wired to a fake backend and recording collaborators.
pub struct Harness {
    pub client: Arc<ApiClient>,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<MemoryTokenStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    /// The backend initially accepts the session's access token.
    pub fn new(session: Session) -> Self {
        let valid = session.access_token.as_ref().map(|t| t.token.clone());
        let backend = Arc::new(FakeBackend::new(valid.as_deref()));
        let store = Arc::new(MemoryTokenStore::new(session));
        let navigator = Arc::new(RecordingNavigator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let reporter = Arc::new(RecordingReporter::default());

        let client = ApiClient::builder(BASE, backend.clone(), store.clone())
            .navigator(navigator.clone())
            .notifier(notifier.clone())
            .reporter(reporter.clone())
            .build()
            .unwrap();

        Self {
            client: Arc::new(client),
            backend,
            store,
            navigator,
            notifier,
            reporter,
        }
    }
}

/// A complete logged-in session for user 42 of tenant 7.
pub fn session(access_token: Option<&str>, refresh_token: Option<&str>) -> Session {
    Session {
        access_token: access_token.map(|t| StoredToken::new(t.to_string(), None)),
        refresh_token: refresh_token.map(String::from),
        tenant_id: Some("7".to_string()),
        user_id: Some("42".to_string()),
        user: Some(r#"{"id":42,"username":"amy"}"#.to_string()),
        tenant: Some(r#"{"id":7,"name":"Acme"}"#.to_string()),
    }
}

/// Yield to spawned tasks until `cond` holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
