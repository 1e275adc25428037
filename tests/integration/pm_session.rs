//! PM endpoint: tlogin handshake, message delivery, the quiet send
//! window, and kick-off without reconnect.

use std::sync::Arc;
use std::time::Duration;

use rusty_chatango::{
    BackoffConfig, ClientError, Event, Private, SessionOptions, TokenSource, event_type,
};
use ch_test_utils::{ScriptServer, Step, event_channel, wait_for_kind};

struct FakeTokens;

#[async_trait::async_trait]
impl TokenSource for FakeTokens {
    async fn token(&self) -> Result<String, ClientError> {
        Ok("test-token".to_owned())
    }
}

fn opts(url: &str) -> SessionOptions {
    SessionOptions {
        username: "mybot".to_owned(),
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

fn pm_prelude() -> Vec<Step> {
    vec![
        Step::ExpectWhere("tlogin", |args| {
            args.first().map(String::as_str) == Some("test-token")
                && args.get(1).map(String::as_str) == Some("2")
        }),
        // Frames before OK are re-injected and handled by the pump.
        Step::send("seller_name:mybot:77\x00"),
        Step::send("OK\x00"),
        Step::send("time:1700000000.5\x00"),
    ]
}

#[tokio::test]
async fn connect_receives_messages_and_kickoff_does_not_reconnect() {
    let mut script = pm_prelude();
    script.push(Step::send(
        "msg:peer:peer:unknown:1700000010.25:0:<g x11s000=\"1\">hey there</g>\x00",
    ));
    script.push(Step::Idle(Duration::from_millis(50)));
    script.push(Step::send("kickingoff\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let private = Private::connect(opts(&server.url()), Arc::new(FakeTokens), sink, None)
        .await
        .unwrap();

    wait_for_kind(&mut rx, event_type::PRIVATE_CONNECTED, Duration::from_secs(5)).await;
    // seller_name runs on its own pump task; poll until it lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while private.login_name() != "mybot" || private.session_id() != "77" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "seller_name never processed"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let event = wait_for_kind(&mut rx, event_type::PRIVATE_MESSAGE, Duration::from_secs(5)).await;
    match event {
        Event::PrivateMessage { message, .. } => {
            assert!(message.is_private);
            assert_eq!(message.id, "1700000010");
            assert_eq!(message.user.name, "peer");
            assert_eq!(message.text, "hey there");
        }
        _ => unreachable!(),
    }

    wait_for_kind(&mut rx, event_type::PRIVATE_KICKED_OFF, Duration::from_secs(5)).await;
    // A kicked session must not reconnect.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 1);
}

/// The server never acks a PM send; a quiet error window is success.
#[tokio::test]
async fn quiet_send_window_is_success() {
    let mut script = pm_prelude();
    script.push(Step::ExpectWhere("msg", |args| {
        args.first().map(String::as_str) == Some("friend")
    }));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let private = Private::connect(opts(&server.url()), Arc::new(FakeTokens), sink, None)
        .await
        .unwrap();
    wait_for_kind(&mut rx, event_type::PRIVATE_CONNECTED, Duration::from_secs(5)).await;

    private.send_message("Friend", "hello").await.unwrap();
}

#[tokio::test]
async fn flood_warning_fails_the_send() {
    let mut script = pm_prelude();
    script.push(Step::Expect("msg"));
    script.push(Step::send("show_fw\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let private = Private::connect(opts(&server.url()), Arc::new(FakeTokens), sink, None)
        .await
        .unwrap();
    wait_for_kind(&mut rx, event_type::PRIVATE_CONNECTED, Duration::from_secs(5)).await;

    let err = private.send_message("friend", "hello").await.unwrap_err();
    assert!(matches!(err, ClientError::FloodWarning));
}

#[tokio::test]
async fn friend_presence_updates() {
    let mut script = pm_prelude();
    script.push(Step::send("wlonline:buddy:1700000050\x00"));
    script.push(Step::send("wloffline:buddy:1700000060\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let private = Private::connect(opts(&server.url()), Arc::new(FakeTokens), sink, None)
        .await
        .unwrap();

    wait_for_kind(&mut rx, event_type::FRIEND_ONLINE, Duration::from_secs(5)).await;
    wait_for_kind(&mut rx, event_type::FRIEND_OFFLINE, Duration::from_secs(5)).await;
    let friends = private.friends();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].name, "buddy");
}
