mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use vmrent_core::api::{Request, TransportError};
use vmrent_core::auth::{
    RefreshError, SendError, SessionClient, SessionOptions, SessionStatus, SignOutReason,
    TokenStore,
};

use common::{Harness, RecordingRedirect, RefreshBehavior};

#[tokio::test]
async fn test_login_refresh_and_retry_scenario() {
    let h = Harness::new(Harness::issue("A2"));

    let credential = h.session.login("user@example.com", "secret").await.unwrap();
    assert_eq!(credential.access_token, "A1");
    assert_eq!(credential.refresh_token.as_deref(), Some("R1"));
    assert_eq!(h.session.get_access_token().as_deref(), Some("A1"));

    // Server rotates its accepted token; the session only learns via 401
    h.api.expire("A-other");
    let response = h.session.send(&Request::get("/billing/user/plan")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(
        h.api.tokens_for("/billing/user/plan"),
        vec![Some("A1".to_string()), Some("A2".to_string())]
    );
    assert_eq!(h.api.refresh_calls(), 1);
    assert_eq!(
        h.api.last_refresh_body(),
        Some(serde_json::json!({ "refresh_token": "R1" }))
    );
    assert_eq!(h.session.get_access_token().as_deref(), Some("A2"));

    // Refresh token was not rotated, so the old one is kept
    assert_eq!(h.store.get("token").unwrap().as_deref(), Some("A2"));
    assert_eq!(h.store.get("refreshToken").unwrap().as_deref(), Some("R1"));
    assert_eq!(h.redirect.count(), 0);
}

#[tokio::test]
async fn test_refresh_rotates_refresh_token() {
    let h = Harness::restored(
        "OLD",
        Some("R1"),
        RefreshBehavior::Issue {
            access: "A2".to_string(),
            refresh: Some("R2".to_string()),
        },
    );

    h.session.send(&Request::get("/vm/list")).await.unwrap();
    assert_eq!(h.store.get("refreshToken").unwrap().as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_valid_token_needs_no_refresh() {
    let h = Harness::restored("A1", Some("R1"), Harness::issue("A2"));

    let response = h.session.send(&Request::get("/vm/list")).await.unwrap();
    assert!(response.is_success());
    assert_eq!(h.api.refresh_calls(), 0);
    assert_eq!(h.api.tokens_for("/vm/list"), vec![Some("A1".to_string())]);
}

#[tokio::test]
async fn test_concurrent_failures_share_one_refresh() {
    let h = Harness::restored("OLD", Some("R1"), Harness::issue("A2"));

    let plan = Request::get("/billing/user/plan");
    let credits = Request::get("/billing/user/credits");
    let vms = Request::get("/vm/list");
    let stats = Request::get("/vm/stats/runtime");

    let (a, b, c, d) = tokio::join!(
        h.session.send(&plan),
        h.session.send(&credits),
        h.session.send(&vms),
        h.session.send(&stats),
    );
    for result in [a, b, c, d] {
        assert_eq!(result.unwrap().status, StatusCode::OK);
    }

    assert_eq!(h.api.refresh_calls(), 1);
    for path in ["/billing/user/plan", "/billing/user/credits", "/vm/list", "/vm/stats/runtime"] {
        assert_eq!(
            h.api.tokens_for(path),
            vec![Some("OLD".to_string()), Some("A2".to_string())],
            "unexpected tokens for {}",
            path
        );
    }
}

#[tokio::test]
async fn test_concurrent_failures_share_one_refresh_failure() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Status(StatusCode::UNAUTHORIZED));

    let first = Request::get("/billing/user/plan");
    let second = Request::get("/vm/list");
    let third = Request::get("/billing/user/credits");

    let (a, b, c) = tokio::join!(
        h.session.send(&first),
        h.session.send(&second),
        h.session.send(&third),
    );
    for result in [a, b, c] {
        assert!(matches!(
            result,
            Err(SendError::RefreshFailed {
                reason: RefreshError::Rejected { status: 401, .. },
                response: Some(_),
            })
        ));
    }

    assert_eq!(h.api.refresh_calls(), 1);
    assert_eq!(h.redirect.count(), 1);
    assert_eq!(h.session.status(), SessionStatus::Invalidated);
}

#[tokio::test]
async fn test_second_401_after_retry_is_returned_without_refresh() {
    let h = Harness::restored("A1", Some("R1"), Harness::issue("A2"));

    let response = h.session.send(&Request::get("/always-401")).await.unwrap();
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    assert_eq!(h.api.requests_to("/always-401"), 2);
    assert_eq!(h.api.refresh_calls(), 1);
    // The refresh itself succeeded, so the session survives
    assert_eq!(h.session.get_access_token().as_deref(), Some("A2"));
    assert_eq!(h.redirect.count(), 0);
}

#[tokio::test]
async fn test_missing_refresh_token_fails_without_network_refresh() {
    let h = Harness::restored("OLD", None, Harness::issue("A2"));

    let err = h.session.send(&Request::get("/vm/list")).await.unwrap_err();
    match err {
        SendError::RefreshFailed { reason, response } => {
            assert_eq!(reason, RefreshError::MissingRefreshToken);
            assert_eq!(response.map(|r| r.status), Some(StatusCode::UNAUTHORIZED));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(h.api.refresh_calls(), 0);
    assert_eq!(h.session.get_access_token(), None);
    assert_eq!(
        h.redirect.reasons(),
        vec![SignOutReason::SessionExpired(RefreshError::MissingRefreshToken)]
    );
}

#[tokio::test]
async fn test_refresh_rejected_clears_credential_and_redirects_once() {
    let h = Harness::new(RefreshBehavior::Status(StatusCode::BAD_REQUEST));
    h.session.login("user@example.com", "secret").await.unwrap();
    h.api.expire("A-other");

    let err = h.session.send(&Request::get("/billing/user/plan")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::RefreshFailed {
            reason: RefreshError::Rejected { status: 400, .. },
            ..
        }
    ));

    assert_eq!(h.session.get_access_token(), None);
    assert_eq!(h.store.get("token").unwrap(), None);
    assert_eq!(h.store.get("refreshToken").unwrap(), None);
    assert_eq!(h.redirect.count(), 1);
}

#[tokio::test]
async fn test_refresh_transport_failure_is_repair_failure() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Offline);

    let err = h.session.send(&Request::get("/vm/list")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::RefreshFailed {
            reason: RefreshError::Transport(TransportError::Connect(_)),
            ..
        }
    ));
    assert_eq!(h.redirect.count(), 1);
}

#[tokio::test]
async fn test_malformed_refresh_body_is_repair_failure() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Malformed);

    let err = h.session.send(&Request::get("/vm/list")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::RefreshFailed {
            reason: RefreshError::Malformed(_),
            ..
        }
    ));
    assert!(!h.session.is_authenticated());
}

#[tokio::test]
async fn test_hung_refresh_times_out() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Hang);
    let redirect = Arc::new(RecordingRedirect::default());
    let session = SessionClient::with_options(
        h.api.clone(),
        h.store.clone(),
        redirect.clone(),
        SessionOptions {
            refresh_timeout: Duration::from_millis(50),
        },
    );

    let err = session.send(&Request::get("/vm/list")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::RefreshFailed {
            reason: RefreshError::TimedOut,
            ..
        }
    ));
    assert_eq!(redirect.count(), 1);
}

#[tokio::test]
async fn test_invalidated_session_fails_fast_until_login() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Status(StatusCode::BAD_REQUEST));
    h.session.send(&Request::get("/vm/list")).await.unwrap_err();
    assert_eq!(h.session.status(), SessionStatus::Invalidated);
    let dispatched = h.api.requests_to("/billing/plans");

    let err = h.session.send(&Request::get("/billing/plans")).await.unwrap_err();
    assert!(matches!(
        err,
        SendError::RefreshFailed {
            reason: RefreshError::SessionInvalidated,
            response: None,
        }
    ));
    assert_eq!(h.api.requests_to("/billing/plans"), dispatched);
    // Failing fast is not a new failure event
    assert_eq!(h.redirect.count(), 1);

    h.session.login("user@example.com", "secret").await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Active);
    let response = h.session.send(&Request::get("/billing/plans")).await.unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn test_non_auth_failures_pass_through() {
    let h = Harness::restored("A1", Some("R1"), Harness::issue("A2"));

    let response = h.session.send(&Request::get("/boom")).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.api.requests_to("/boom"), 1);

    let err = h.session.send(&Request::get("/offline")).await.unwrap_err();
    assert!(matches!(err, SendError::Transport(TransportError::Connect(_))));
    assert_eq!(h.api.requests_to("/offline"), 1);

    assert_eq!(h.api.refresh_calls(), 0);
    assert_eq!(h.redirect.count(), 0);
}

#[tokio::test]
async fn test_late_401_for_replaced_token_retries_without_refresh() {
    let h = Harness::restored("OLD", Some("R1"), Harness::issue("A2"));

    let fast = Request::get("/vm/list");
    let slow = Request::get("/slow");

    // `/slow` is answered after the refresh triggered by `/vm/list` has
    // finished, so its 401 is for a token the session already replaced.
    let (a, b) = tokio::join!(h.session.send(&fast), h.session.send(&slow));
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());

    assert_eq!(h.api.refresh_calls(), 1);
    assert_eq!(
        h.api.tokens_for("/slow"),
        vec![Some("OLD".to_string()), Some("A2".to_string())]
    );
}

#[tokio::test]
async fn test_logout_clears_storage_and_redirects() {
    let h = Harness::new(Harness::issue("A2"));
    h.session.login("user@example.com", "secret").await.unwrap();

    h.session.logout();
    assert_eq!(h.session.get_access_token(), None);
    assert_eq!(h.session.status(), SessionStatus::Anonymous);
    assert_eq!(h.store.get("token").unwrap(), None);
    assert_eq!(h.store.get("refreshToken").unwrap(), None);
    assert_eq!(h.redirect.reasons(), vec![SignOutReason::LoggedOut]);

    // Idempotent, still redirects
    h.session.logout();
    assert_eq!(h.redirect.count(), 2);
}

#[tokio::test]
async fn test_late_401_after_logout_does_not_refresh() {
    let h = Harness::restored("OLD", Some("R1"), Harness::issue("A2"));

    let slow = Request::get("/slow");
    let (result, _) = tokio::join!(h.session.send(&slow), async {
        tokio::task::yield_now().await;
        h.session.logout();
    });

    assert!(matches!(
        result,
        Err(SendError::RefreshFailed {
            reason: RefreshError::SessionInvalidated,
            response: Some(_),
        })
    ));
    assert_eq!(h.api.refresh_calls(), 0);
    assert_eq!(h.session.status(), SessionStatus::Anonymous);
    assert_eq!(h.redirect.reasons(), vec![SignOutReason::LoggedOut]);

    // Signing out is not an expired session: the next call is dispatched
    let response = h.session.send(&Request::get("/boom")).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_logout_during_refresh_discards_outcome() {
    let h = Harness::restored("OLD", Some("R1"), Harness::issue("A2"));

    let request = Request::get("/vm/list");
    let (result, _) = tokio::join!(h.session.send(&request), async {
        while h.api.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.session.logout();
    });

    assert!(matches!(
        result,
        Err(SendError::RefreshFailed {
            reason: RefreshError::SessionInvalidated,
            ..
        })
    ));
    assert_eq!(h.api.refresh_calls(), 1);
    assert_eq!(h.session.status(), SessionStatus::Anonymous);
    assert_eq!(h.session.get_access_token(), None);
    // The refreshed token was never written back
    assert_eq!(h.store.get("token").unwrap(), None);
    assert_eq!(h.redirect.reasons(), vec![SignOutReason::LoggedOut]);
}

#[tokio::test]
async fn test_login_during_refresh_discards_failed_outcome() {
    let h = Harness::restored("OLD", Some("R1"), RefreshBehavior::Status(StatusCode::BAD_REQUEST));

    let request = Request::get("/vm/list");
    let (result, login) = tokio::join!(h.session.send(&request), async {
        while h.api.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.session.login("user@example.com", "secret").await
    });

    assert_eq!(login.unwrap().access_token, "A1");
    // The waiter retries with the credential from the new login
    assert_eq!(result.unwrap().status, StatusCode::OK);
    assert_eq!(
        h.api.tokens_for("/vm/list"),
        vec![Some("OLD".to_string()), Some("A1".to_string())]
    );
    assert_eq!(h.api.refresh_calls(), 1);
    assert_eq!(h.session.status(), SessionStatus::Active);
    assert_eq!(h.store.get("token").unwrap().as_deref(), Some("A1"));
    assert_eq!(h.redirect.count(), 0);
}

#[tokio::test]
async fn test_logout_without_session_clears_leftover_keys() {
    let h = Harness::new(Harness::issue("A2"));
    h.store.set("refreshToken", "stray").unwrap();

    h.session.logout();
    assert_eq!(h.store.get("refreshToken").unwrap(), None);
    assert_eq!(h.redirect.count(), 1);
}

#[tokio::test]
async fn test_caller_request_is_not_mutated() {
    let h = Harness::restored("OLD", Some("R1"), Harness::issue("A2"));

    let request = Request::get("/vm/list");
    h.session.send(&request).await.unwrap();
    assert_eq!(request.bearer_token(), None);

    // Reusing the same request value later uses the current token
    h.session.send(&request).await.unwrap();
    assert_eq!(
        h.api.tokens_for("/vm/list").last().cloned().flatten().as_deref(),
        Some("A2")
    );
}
