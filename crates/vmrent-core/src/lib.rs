//! Core library for vmrent: the authenticated session, typed API wrappers,
//! token storage and configuration shared by every vmrent front-end.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

use std::sync::Arc;

use anyhow::Result;

use api::{ApiClient, HttpTransport};
use auth::{SessionClient, SessionOptions, SignInRedirect};
use config::Config;

/// Build an `ApiClient` for `config`, restoring any persisted session.
pub fn connect(config: &Config, redirect: Arc<dyn SignInRedirect>) -> Result<ApiClient> {
    let transport = HttpTransport::new(config.api_base_url.clone(), config.request_timeout())?;
    let options = SessionOptions {
        refresh_timeout: config.refresh_timeout(),
    };
    let session =
        SessionClient::with_options(Arc::new(transport), config.token_store()?, redirect, options);
    Ok(ApiClient::new(session))
}
