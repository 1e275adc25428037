//! Throttling replies to a send: flood warning opens a restriction
//! window, rate limiting opens the rate-limit window.

use std::time::Duration;

use rusty_chatango::{BackoffConfig, ClientError, Group, SessionOptions};
use ch_test_utils::{ScriptServer, Step, event_channel, group_auth_prelude};

fn opts(url: &str) -> SessionOptions {
    SessionOptions {
        username: "loginName".to_owned(),
        password: "pw".to_owned(),
        reconnect: BackoffConfig {
            initial: Duration::from_millis(5),
            cap: Duration::from_millis(20),
            max_retries: 10,
        },
        server_url: Some(url.to_owned()),
        ..SessionOptions::default()
    }
}

/// `show_fw:60` fails the send with FloodWarning and restricts sends for
/// the next 60 minutes.
#[tokio::test]
async fn flood_warning_opens_restriction_window() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("bm"));
    script.push(Step::send("show_fw:60\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    let err = group.send_message("spam").await.unwrap_err();
    assert!(matches!(err, ClientError::FloodWarning));

    let until = group.restricted_until().expect("restriction window open");
    let left = until - tokio::time::Instant::now();
    assert!(left > Duration::from_secs(59 * 60));
    assert!(left <= Duration::from_secs(60 * 60));
}

/// `ratelimited:<secs>` fails the send with the server's interval and
/// opens the rate-limit window.
#[tokio::test]
async fn rate_limited_send() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("bm"));
    script.push(Step::send("ratelimited:8\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    let err = group.send_message("too fast").await.unwrap_err();
    assert!(matches!(err, ClientError::RateLimited(8)));
    let until = group.rate_limited_until().expect("rate limit window open");
    assert!(until - tokio::time::Instant::now() <= Duration::from_secs(8));
}

/// `msglexceeded` updates the maximum message length.
#[tokio::test]
async fn message_length_exceeded_updates_limit() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("bm"));
    script.push(Step::send("msglexceeded:850\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    let err = group.send_message("way too long").await.unwrap_err();
    assert!(matches!(err, ClientError::MessageLengthExceeded(850)));
    assert_eq!(group.max_message_length(), 850);
}
