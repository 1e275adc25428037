//! Join flow: the `v`/`bauth`/`ok` handshake populates session identity
//! and the accepted frames reach the dispatch path.

use std::time::Duration;

use rusty_chatango::{BackoffConfig, Group, SessionOptions, event_type};
use ch_test_utils::{ScriptServer, event_channel, group_auth_prelude, wait_for_kind};

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

#[tokio::test]
async fn join_populates_identity() {
    let server = ScriptServer::start(vec![group_auth_prelude("12345678ABCD", "loginName")])
        .await
        .unwrap();
    let (sink, mut rx) = event_channel();

    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    wait_for_kind(&mut rx, event_type::GROUP_JOINED, Duration::from_secs(5)).await;
    assert_eq!(group.owner(), "roomowner");
    assert_eq!(group.session_id(), "12345678ABCD");
    assert_eq!(group.user_id(), 12_345_678);
    assert_eq!(group.login_name(), "loginName");
    assert!(group.logged_in());
    // Clock skew is now minus the scripted login time; the script uses a
    // fixed past timestamp so the skew is large and positive.
    assert!(group.clock_skew_secs() > 0.0);
    // The v frame runs through the pump on its own task; poll briefly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while group.version() != (15, 15) {
        assert!(tokio::time::Instant::now() < deadline, "version never parsed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn rejected_auth_is_login_failed() {
    use ch_test_utils::Step;
    let script = vec![
        Step::Expect("v"),
        Step::send("v:15:15\x00"),
        Step::Expect("bauth"),
        Step::send("badlogin\x00"),
    ];
    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();

    let err = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap_err();
    assert!(matches!(err, rusty_chatango::ClientError::LoginFailed));
}
