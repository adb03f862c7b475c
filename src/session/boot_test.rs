use super::*;
use crate::testing::{Gateway, booted_session, test_config};

use std::time::Duration;

#[test]
fn phases_run_in_order() {
    let mut phase = BootPhase::Idle;
    let mut seen = vec![phase];
    while let Some(next) = phase.next() {
        seen.push(next);
        phase = next;
    }
    assert_eq!(seen.len(), 9);
    assert_eq!(seen.last(), Some(&BootPhase::Ready));
    assert_eq!(BootPhase::Authenticating.to_string(), "authenticating");
}

#[test]
fn failure_policy_per_phase() {
    assert_eq!(BootPhase::NegotiatingVersion.policy(), FailurePolicy::Fatal);
    assert_eq!(BootPhase::Authenticating.policy(), FailurePolicy::Fatal);
    assert_eq!(BootPhase::FetchingIdentity.policy(), FailurePolicy::Fatal);
    assert_eq!(BootPhase::Subscribing.policy(), FailurePolicy::PerResource);
    assert_eq!(BootPhase::TakingControl.policy(), FailurePolicy::Ignorable);
    assert_eq!(BootPhase::Waking.policy(), FailurePolicy::Ignorable);
}

#[tokio::test]
async fn full_boot_reaches_ready() {
    let (session, _gateway) = booted_session(&test_config()).await;

    assert!(session.is_ready());
    let identity = session.identity().expect("identity set");
    assert_eq!(identity.rid, "core.bot.b1");
    assert_eq!(identity.id, "bot1");
    assert_eq!(identity.full_name(), "Bot Tender");
    assert_eq!(identity.description, "Pours drinks.");
    assert_eq!(session.self_id().unwrap(), "bot1");
}

#[tokio::test]
async fn boot_sends_token_and_protocol() {
    let config = test_config();
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client, config);
    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });

    let version = gateway.expect("version").await;
    assert_eq!(version.params["protocol"], "1.2.1");
    gateway.reply(&version, json!({ "protocol": "1.2.1" }));
    let auth = gateway.expect("auth.auth.authenticateBot").await;
    assert_eq!(auth.params["token"], "test-token-123");
    gateway.close();

    assert!(boot.await.unwrap().is_err());
}

#[tokio::test]
async fn invalid_token_aborts_before_subscribing() {
    let config = test_config();
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client.clone(), config);
    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });

    let version = gateway.expect("version").await;
    gateway.reply(&version, json!({ "protocol": "1.2.1" }));
    let auth = gateway.expect("auth.auth.authenticateBot").await;
    gateway.reply_error(&auth, "auth.invalidToken", "Invalid token");

    let err = boot.await.unwrap().unwrap_err();
    let BootError::Protocol { phase, error } = &err else {
        panic!("expected protocol error, got {err:?}");
    };
    assert_eq!(*phase, BootPhase::Authenticating);
    assert_eq!(error.code, "auth.invalidToken");
    assert_eq!(err.error_code(), "E_PROTOCOL");

    assert!(!session.is_ready());
    assert_eq!(session.phase(), BootPhase::Authenticating);
    assert!(session.identity().is_none());
    assert!(!client.is_running());
    assert!(gateway.try_next_request().is_none(), "nothing sent after auth failure");
}

#[tokio::test]
async fn control_and_wakeup_failures_are_ignored() {
    let config = test_config();
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client, config);
    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });

    let version = gateway.expect("version").await;
    gateway.reply(&version, json!({ "protocol": "1.2.1" }));
    let auth = gateway.expect("auth.auth.authenticateBot").await;
    gateway.reply(&auth, Value::Null);
    let bot = gateway.expect("call.core.getBot").await;
    gateway.reply(&bot, crate::testing::bot_result());
    for rid in BOOT_SUBSCRIPTIONS {
        let frame = gateway.expect(&format!("subscribe.{rid}")).await;
        gateway.reply_error(&frame, "system.accessDenied", "Access denied");
    }
    let control = gateway.expect("call.core.bot.b1.controlChar").await;
    gateway.reply_error(&control, "core.charAlreadyControlled", "Already controlled");
    let wakeup = gateway.expect("call.core.char.bot1.ctrl.wakeup").await;
    gateway.reply_error(&wakeup, "core.charAlreadyAwake", "Already awake");

    let identity = boot.await.unwrap().expect("boot continues past ignorable failures");
    assert_eq!(identity.id, "bot1");
    assert!(session.is_ready());
}

#[tokio::test]
async fn missing_character_fails_identity() {
    let config = test_config();
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client, config);
    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });

    let version = gateway.expect("version").await;
    gateway.reply(&version, json!({ "protocol": "1.2.1" }));
    let auth = gateway.expect("auth.auth.authenticateBot").await;
    gateway.reply(&auth, Value::Null);
    let bot = gateway.expect("call.core.getBot").await;
    gateway.reply(&bot, json!({ "rid": "core.bot.b1", "models": { "core.bot.b1": { "char": null } } }));

    let err = boot.await.unwrap().unwrap_err();
    assert!(matches!(err, BootError::Identity(_)), "got {err:?}");
    assert_eq!(session.phase(), BootPhase::FetchingIdentity);
}

#[tokio::test]
async fn version_timeout_is_fatal() {
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(50);
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client, config);

    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    gateway.expect("version").await;

    let err = tokio::time::timeout(Duration::from_secs(2), boot).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, BootError::Timeout { phase: BootPhase::NegotiatingVersion }));
    assert!(err.retryable());
}

#[tokio::test]
async fn boot_twice_is_rejected() {
    let (session, _gateway) = booted_session(&test_config()).await;
    let err = session.boot().await.unwrap_err();
    assert!(matches!(err, BootError::InvalidPhase(BootPhase::Ready)));
    assert!(session.is_ready(), "rejected boot leaves the session alone");
}

#[tokio::test]
async fn boot_on_closed_client_fails() {
    let config = test_config();
    let (client, _gateway) = Gateway::start(&config).await;
    client.close();
    let session = Session::new(client, config);

    let err = session.boot().await.unwrap_err();
    assert!(matches!(err, BootError::NotConnected));
}
