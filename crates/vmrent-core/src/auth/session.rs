//! Authenticated session: credential lifecycle and transparent token refresh.
//!
//! Every authenticated API call goes through [`SessionClient::send`]. When the
//! API answers 401 the session exchanges its refresh token for a new access
//! token and retries the call once. Concurrent calls that hit the same expired
//! token share a single refresh. If the refresh fails the credential is
//! cleared, the user is redirected to sign in, and the session stays
//! invalidated until the next successful login.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::redirect::{SignInRedirect, SignOutReason};
use super::store::{TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::api::error::error_detail;
use crate::api::transport::{Request, Response, Transport, TransportError};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Upper bound on a single refresh exchange.
/// A refresh that never resolves would otherwise park every waiting request.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Types
// ============================================================================

/// The access/refresh token pair identifying an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// The login endpoint may not issue one; without it the session cannot be repaired.
    pub refresh_token: Option<String>,
}

/// Why a credential could not be repaired. Shared by every request that
/// waited on the same refresh, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Malformed refresh response: {0}")]
    Malformed(String),

    #[error("Refresh request timed out")]
    TimedOut,

    #[error("Refresh request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Session was invalidated - sign in again")]
    SessionInvalidated,
}

/// Failure of [`SessionClient::send`].
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The credential was rejected and could not be repaired. `response` is
    /// the original 401, or `None` when the call failed fast without dispatch.
    #[error("Session expired: {reason}")]
    RefreshFailed {
        reason: RefreshError,
        response: Option<Response>,
    },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Login failed with status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Invalid login response: {0}")]
    InvalidResponse(String),

    #[error("Login request failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No credential; nothing has gone wrong
    Anonymous,
    Active,
    /// A refresh failed. Requests fail fast until the next login.
    Invalidated,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub refresh_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Retry bookkeeping for one `send` call. Lives on the stack, never on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attempt {
    retried: bool,
}

impl Attempt {
    fn first() -> Self {
        Self { retried: false }
    }

    fn retry(self) -> Self {
        Self { retried: true }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

struct SessionState {
    credential: Option<Credential>,
    invalidated: bool,
    // Bumped on login/logout; refresh outcomes from an older generation are discarded
    generation: u64,
    in_flight: Option<RefreshFuture>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    redirect: Arc<dyn SignInRedirect>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    // Taken before `state` is released, so storage writes land in transition order
    storage: Mutex<()>,
}

// ============================================================================
// Session Client
// ============================================================================

/// Owner of the active credential and gateway for authenticated requests.
/// Clone is cheap - all clones share the same session.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    /// Create a session, restoring any credential left in `store`.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        redirect: Arc<dyn SignInRedirect>,
    ) -> Self {
        Self::with_options(transport, store, redirect, SessionOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        redirect: Arc<dyn SignInRedirect>,
        options: SessionOptions,
    ) -> Self {
        let credential = restore_credential(store.as_ref());
        debug!(restored = credential.is_some(), "Session created");

        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                redirect,
                options,
                state: Mutex::new(SessionState {
                    credential,
                    invalidated: false,
                    generation: 0,
                    in_flight: None,
                }),
                storage: Mutex::new(()),
            }),
        }
    }

    /// The current access token, if a session is active
    pub fn get_access_token(&self) -> Option<String> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().credential.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.inner.lock();
        if state.invalidated {
            SessionStatus::Invalidated
        } else if state.credential.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::Anonymous
        }
    }

    /// Send `request` with the current bearer token, repairing an expired
    /// token at most once.
    ///
    /// Non-401 responses are returned as-is, error statuses included. A 401
    /// on the retried call is returned as-is too.
    pub async fn send(&self, request: &Request) -> Result<Response, SendError> {
        let mut attempt = Attempt::first();

        loop {
            let token = {
                let state = self.inner.lock();
                if state.invalidated {
                    return Err(SendError::RefreshFailed {
                        reason: RefreshError::SessionInvalidated,
                        response: None,
                    });
                }
                state.credential.as_ref().map(|c| c.access_token.clone())
            };

            let outgoing = request.with_bearer(token.as_deref())?;
            let response = self.inner.transport.dispatch(outgoing).await?;

            if !response.is_authorization_failure() {
                return Ok(response);
            }

            if attempt.retried {
                warn!(path = %request.path, "Request still unauthorized after token refresh");
                return Ok(response);
            }

            debug!(path = %request.path, "Access token rejected, repairing session");
            match self.repair(token.as_deref()).await {
                Ok(_) => attempt = attempt.retry(),
                Err(reason) => {
                    return Err(SendError::RefreshFailed {
                        reason,
                        response: Some(response),
                    })
                }
            }
        }
    }

    /// Send `request` without a credential and without repair (public endpoints)
    pub async fn send_anonymous(&self, request: &Request) -> Result<Response, TransportError> {
        let outgoing = request.with_bearer(None)?;
        self.inner.transport.dispatch(outgoing).await
    }

    /// Exchange an email and password for a credential and make it active.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Credential, AuthError> {
        let request = Request::post(LOGIN_PATH).json(&LoginRequest {
            email: identifier,
            password: secret,
        })?;
        let response = self.inner.transport.dispatch(request).await?;

        if !response.is_success() {
            let status = response.status.as_u16();
            let detail = error_detail(&response.body).unwrap_or_else(|| "Login failed".to_string());
            warn!(status = status, "Login rejected");
            return Err(match status {
                400 | 401 | 403 | 422 => AuthError::InvalidCredentials(detail),
                _ => AuthError::Rejected { status, detail },
            });
        }

        let tokens: TokenResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if tokens.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access token".to_string()));
        }

        let credential = Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        };
        if credential.refresh_token.is_none() {
            debug!("Login response carried no refresh token");
        }

        let writes = {
            let mut state = self.inner.lock();
            state.credential = Some(credential.clone());
            state.invalidated = false;
            state.generation += 1;
            state.in_flight = None;
            self.inner.storage_lock()
        };
        self.inner.persist(writes, &credential);

        info!("Logged in");
        Ok(credential)
    }

    /// Drop the credential everywhere and send the user to sign in.
    /// Safe to call without an active session.
    pub fn logout(&self) {
        let writes = {
            let mut state = self.inner.lock();
            state.credential = None;
            state.invalidated = false;
            state.generation += 1;
            state.in_flight = None;
            self.inner.storage_lock()
        };
        self.inner.clear_storage(writes);

        self.inner
            .redirect
            .redirect_to_sign_in(SignOutReason::LoggedOut);
    }

    /// Obtain a credential newer than `stale_token`, joining an in-flight
    /// refresh if there is one.
    async fn repair(&self, stale_token: Option<&str>) -> Result<Credential, RefreshError> {
        let refresh = {
            let mut state = self.inner.lock();
            if state.invalidated {
                return Err(RefreshError::SessionInvalidated);
            }

            let active = state.credential.as_ref().map(|c| c.access_token.as_str());
            if active != stale_token {
                return match state.credential {
                    Some(ref credential) => {
                        debug!("Credential already replaced, retrying with the active token");
                        Ok(credential.clone())
                    }
                    None => {
                        // Signed out while the request was in flight
                        debug!("Credential dropped since dispatch, not refreshing");
                        Err(RefreshError::SessionInvalidated)
                    }
                };
            }

            match state.in_flight.clone() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight
                }
                None => {
                    let refresh_token = state
                        .credential
                        .as_ref()
                        .and_then(|c| c.refresh_token.clone());
                    let refresh = run_refresh(self.inner.clone(), refresh_token, state.generation)
                        .boxed()
                        .shared();
                    state.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }
}

// ============================================================================
// Refresh Protocol
// ============================================================================

/// Body of the single shared refresh. Runs once no matter how many callers
/// await it, so the outcome is applied to the session exactly once.
async fn run_refresh(
    inner: Arc<Inner>,
    refresh_token: Option<String>,
    generation: u64,
) -> Result<Credential, RefreshError> {
    let outcome = match refresh_token {
        None => Err(RefreshError::MissingRefreshToken),
        Some(refresh_token) => {
            debug!("Refreshing access token");
            let exchange = request_refresh(inner.transport.as_ref(), &refresh_token);
            match tokio::time::timeout(inner.options.refresh_timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(RefreshError::TimedOut),
            }
        }
    };

    inner.finish_refresh(generation, outcome)
}

async fn request_refresh(
    transport: &dyn Transport,
    refresh_token: &str,
) -> Result<Credential, RefreshError> {
    let request = Request::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
    let response = transport.dispatch(request).await?;

    if !response.is_success() {
        return Err(RefreshError::Rejected {
            status: response.status.as_u16(),
            detail: error_detail(&response.body).unwrap_or_default(),
        });
    }

    let tokens: TokenResponse = response
        .json()
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;
    if tokens.access_token.is_empty() {
        return Err(RefreshError::Malformed("empty access token".to_string()));
    }

    Ok(Credential {
        access_token: tokens.access_token,
        // Not rotated: keep using the one we have
        refresh_token: tokens.refresh_token.or_else(|| Some(refresh_token.to_string())),
    })
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_refresh(
        &self,
        generation: u64,
        outcome: Result<Credential, RefreshError>,
    ) -> Result<Credential, RefreshError> {
        let mut state = self.lock();

        if state.generation != generation {
            debug!("Discarding refresh outcome for a replaced session");
            return state
                .credential
                .clone()
                .ok_or(RefreshError::SessionInvalidated);
        }
        state.in_flight = None;

        match outcome {
            Ok(credential) => {
                state.credential = Some(credential.clone());
                let writes = self.storage_lock();
                drop(state);

                self.persist(writes, &credential);
                info!("Access token refreshed");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                state.credential = None;
                state.invalidated = true;
                let writes = self.storage_lock();
                drop(state);

                self.clear_storage(writes);

                self.redirect
                    .redirect_to_sign_in(SignOutReason::SessionExpired(e.clone()));
                Err(e)
            }
        }
    }

    fn storage_lock(&self) -> MutexGuard<'_, ()> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `credential` to the store. `_writes` is held until the writes finish.
    fn persist(&self, _writes: MutexGuard<'_, ()>, credential: &Credential) {
        if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, &credential.access_token) {
            warn!(error = %e, "Failed to persist access token");
        }
        let refresh = match credential.refresh_token {
            Some(ref token) => self.store.set(REFRESH_TOKEN_KEY, token),
            None => self.store.remove(REFRESH_TOKEN_KEY),
        };
        if let Err(e) = refresh {
            warn!(error = %e, "Failed to persist refresh token");
        }
    }

    fn clear_storage(&self, _writes: MutexGuard<'_, ()>) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to clear stored token");
            }
        }
    }
}

fn restore_credential(store: &dyn TokenStore) -> Option<Credential> {
    let access_token = match store.get(ACCESS_TOKEN_KEY) {
        Ok(token) => token?,
        Err(e) => {
            warn!(error = %e, "Failed to load stored access token");
            return None;
        }
    };
    let refresh_token = store.get(REFRESH_TOKEN_KEY).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load stored refresh token");
        None
    });

    Some(Credential {
        access_token,
        refresh_token,
    })
}

// ============================================================================
// Tests
// ============================================================================
