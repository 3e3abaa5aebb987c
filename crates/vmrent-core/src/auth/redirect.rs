//! The sign-in boundary: what happens when the session is gone.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::session::RefreshError;

/// Why the user is being sent back to sign in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit logout
    LoggedOut,
    /// The credential could not be refreshed
    SessionExpired(RefreshError),
}

/// Navigation collaborator invoked by the session on logout and on
/// unrecoverable session loss.
pub trait SignInRedirect: Send + Sync {
    fn redirect_to_sign_in(&self, reason: SignOutReason);
}

/// Logs the redirect and does nothing else. Useful for headless callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

impl SignInRedirect for LogRedirect {
    fn redirect_to_sign_in(&self, reason: SignOutReason) {
        match reason {
            SignOutReason::LoggedOut => info!("Signed out"),
            SignOutReason::SessionExpired(e) => warn!(error = %e, "Session expired, sign in again"),
        }
    }
}

/// Forwards redirects to whoever owns the receiving end (e.g. a UI loop).
#[derive(Debug, Clone)]
pub struct ChannelRedirect {
    tx: mpsc::UnboundedSender<SignOutReason>,
}

impl ChannelRedirect {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignOutReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignInRedirect for ChannelRedirect {
    fn redirect_to_sign_in(&self, reason: SignOutReason) {
        if let Err(e) = self.tx.send(reason) {
            error!(error = %e, "Failed to send sign-in redirect - receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_redirect_forwards_reason() {
        let (redirect, mut rx) = ChannelRedirect::new();

        redirect.redirect_to_sign_in(SignOutReason::LoggedOut);
        redirect.redirect_to_sign_in(SignOutReason::SessionExpired(RefreshError::TimedOut));

        assert_eq!(rx.try_recv().unwrap(), SignOutReason::LoggedOut);
        assert_eq!(
            rx.try_recv().unwrap(),
            SignOutReason::SessionExpired(RefreshError::TimedOut)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_redirect_with_closed_receiver() {
        let (redirect, rx) = ChannelRedirect::new();
        drop(rx);

        // Logged, not propagated
        redirect.redirect_to_sign_in(SignOutReason::LoggedOut);
    }
}
