//! Scripted in-memory API used by the session tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use vmrent_core::api::{Request, Response, Transport, TransportError};
use vmrent_core::auth::{
    MemoryTokenStore, SessionClient, SignInRedirect, SignOutReason, TokenStore,
};

/// How the fake API answers `POST /auth/refresh`
#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    /// Issue this access token (and optionally rotate the refresh token)
    Issue {
        access: String,
        refresh: Option<String>,
    },
    Status(StatusCode),
    Malformed,
    Offline,
    Hang,
}

/// A tiny stand-in for the backend.
///
/// - `/auth/login` issues `A1`/`R1`
/// - `/auth/refresh` follows `RefreshBehavior`
/// - `/always-401` rejects every token
/// - `/boom` answers 500, `/offline` fails at the transport
/// - `/slow` yields several times before checking the token
/// - any other path accepts only the currently valid access token
pub struct FakeApi {
    valid_token: Mutex<String>,
    refresh: Mutex<RefreshBehavior>,
    refresh_calls: AtomicUsize,
    log: Mutex<Vec<Request>>,
}

impl FakeApi {
    pub fn new(valid_token: &str, refresh: RefreshBehavior) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(valid_token.to_string()),
            refresh: Mutex::new(refresh),
            refresh_calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens seen on requests to `path`, in dispatch order
    pub fn tokens_for(&self, path: &str) -> Vec<Option<String>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.bearer_token().map(str::to_string))
            .collect()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.path == path).count()
    }

    pub fn last_refresh_body(&self) -> Option<serde_json::Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.path == "/auth/refresh")
            .and_then(|r| r.body.clone())
    }

    pub fn expire(&self, new_valid_token: &str) {
        *self.valid_token.lock().unwrap() = new_valid_token.to_string();
    }

    fn handle_refresh(&self) -> Option<Response> {
        let behavior = self.refresh.lock().unwrap().clone();
        match behavior {
            RefreshBehavior::Issue { access, refresh } => {
                self.expire(&access);
                let body = match refresh {
                    Some(r) => serde_json::json!({ "access_token": access, "refresh_token": r }),
                    None => serde_json::json!({ "access_token": access }),
                };
                Some(Response::new(StatusCode::OK, body.to_string()))
            }
            RefreshBehavior::Status(status) => Some(Response::new(
                status,
                r#"{"detail": "Invalid refresh token"}"#,
            )),
            RefreshBehavior::Malformed => Some(Response::new(StatusCode::OK, r#"{"token": 1}"#)),
            RefreshBehavior::Offline | RefreshBehavior::Hang => None,
        }
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn dispatch(&self, request: Request) -> Result<Response, TransportError> {
        self.log.lock().unwrap().push(request.clone());
        // Every dispatch is a suspension point, so concurrent sends interleave
        tokio::task::yield_now().await;

        match request.path.as_str() {
            "/auth/login" => {
                self.expire("A1");
                Ok(Response::new(
                    StatusCode::OK,
                    r#"{"access_token": "A1", "refresh_token": "R1", "token_type": "bearer"}"#,
                ))
            }
            "/auth/refresh" => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                // Stay in flight long enough for every concurrent caller to join
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                let behavior = self.refresh.lock().unwrap().clone();
                if let RefreshBehavior::Hang = behavior {
                    std::future::pending::<()>().await;
                }
                self.handle_refresh()
                    .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
            }
            "/always-401" => Ok(Response::new(StatusCode::UNAUTHORIZED, r#"{"detail": "nope"}"#)),
            "/boom" => Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
            "/offline" => Err(TransportError::Connect("connection refused".to_string())),
            "/slow" => {
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                Ok(self.authorize(&request))
            }
            _ => Ok(self.authorize(&request)),
        }
    }
}

impl FakeApi {
    fn authorize(&self, request: &Request) -> Response {
        let valid = self.valid_token.lock().unwrap().clone();
        if request.bearer_token() == Some(valid.as_str()) {
            Response::new(StatusCode::OK, r#"{"ok": true}"#)
        } else {
            Response::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail": "Invalid authentication credentials"}"#,
            )
        }
    }
}

/// Counts sign-in redirects
#[derive(Default)]
pub struct RecordingRedirect {
    reasons: Mutex<Vec<SignOutReason>>,
}

impl RecordingRedirect {
    pub fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }

    pub fn reasons(&self) -> Vec<SignOutReason> {
        self.reasons.lock().unwrap().clone()
    }
}

impl SignInRedirect for RecordingRedirect {
    fn redirect_to_sign_in(&self, reason: SignOutReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryTokenStore>,
    pub redirect: Arc<RecordingRedirect>,
    pub session: SessionClient,
}

impl Harness {
    pub fn new(refresh: RefreshBehavior) -> Self {
        Self::with_store(refresh, Arc::new(MemoryTokenStore::new()))
    }

    pub fn with_store(refresh: RefreshBehavior, store: Arc<MemoryTokenStore>) -> Self {
        let api = FakeApi::new("A1", refresh);
        let redirect = Arc::new(RecordingRedirect::default());
        let session = SessionClient::new(api.clone(), store.clone(), redirect.clone());
        Self {
            api,
            store,
            redirect,
            session,
        }
    }

    /// Harness whose store already holds `access`/`refresh` from an earlier run
    pub fn restored(access: &str, refresh: Option<&str>, behavior: RefreshBehavior) -> Self {
        let store = Arc::new(MemoryTokenStore::new());
        store.set("token", access).unwrap();
        if let Some(refresh) = refresh {
            store.set("refreshToken", refresh).unwrap();
        }
        Self::with_store(behavior, store)
    }

    pub fn issue(access: &str) -> RefreshBehavior {
        RefreshBehavior::Issue {
            access: access.to_string(),
            refresh: None,
        }
    }
}
