//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `SessionClient`: credential owner with transparent, single-flight token refresh
//! - `TokenStore`: persistent token storage (session file, OS keychain, memory)
//! - `SignInRedirect`: the sign-in boundary invoked when the session is lost

pub mod credentials;
pub mod redirect;
pub mod session;
pub mod store;

pub use credentials::KeyringTokenStore;
pub use redirect::{ChannelRedirect, LogRedirect, SignInRedirect, SignOutReason};
pub use session::{
    AuthError, Credential, RefreshError, SendError, SessionClient, SessionOptions, SessionStatus,
    DEFAULT_REFRESH_TIMEOUT_SECS,
};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
