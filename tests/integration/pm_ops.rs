//! Solicited PM operations against scripted replies.

use std::sync::Arc;
use std::time::Duration;

use rusty_chatango::{
    BackoffConfig, ClientError, Private, SessionOptions, TokenSource, event_type,
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
        Step::Expect("tlogin"),
        Step::send("seller_name:mybot:77\x00"),
        Step::send("OK\x00"),
    ]
}

async fn connect(server: &ScriptServer) -> Private {
    let (sink, mut rx) = event_channel();
    let private = Private::connect(opts(&server.url()), Arc::new(FakeTokens), sink, None)
        .await
        .unwrap();
    wait_for_kind(&mut rx, event_type::PRIVATE_CONNECTED, Duration::from_secs(5)).await;
    private
}

#[tokio::test]
async fn friend_list_round_trip() {
    let mut script = pm_prelude();
    script.push(Step::Expect("wl"));
    script.push(Step::send(
        "wl:alice:1700000000:on:0:bob:1690000000:off:0\x00",
    ));
    script.push(Step::ExpectWhere("wladd", |args| {
        args.first().map(String::as_str) == Some("carol")
    }));
    script.push(Step::send("wladd:carol:on:1700000500\x00"));
    script.push(Step::Expect("wldelete"));
    script.push(Step::send("wldelete:bob\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let private = connect(&server).await;

    let friends = private.get_friend_list().await.unwrap();
    assert_eq!(friends.len(), 2);

    let carol = private.add_friend("Carol").await.unwrap();
    assert_eq!(carol.name, "carol");
    assert_eq!(private.friends().len(), 3);

    private.remove_friend("bob").await.unwrap();
    assert_eq!(private.friends().len(), 2);
}

#[tokio::test]
async fn block_list_round_trip() {
    let mut script = pm_prelude();
    script.push(Step::Expect("getblock"));
    script.push(Step::send("block_list:spammer:pest\x00"));
    script.push(Step::Expect("block"));
    script.push(Step::send("blocked:another\x00"));
    script.push(Step::Expect("unblock"));
    script.push(Step::send("unblocked:spammer\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let private = connect(&server).await;

    let mut blocked = private.get_blocked().await.unwrap();
    blocked.sort();
    assert_eq!(blocked, vec!["pest", "spammer"]);

    private.block("another").await.unwrap();
    assert_eq!(private.blocked_users().len(), 3);
    private.unblock("spammer").await.unwrap();
    assert_eq!(private.blocked_users().len(), 2);
}

#[tokio::test]
async fn settings_round_trip() {
    let mut script = pm_prelude();
    script.push(Step::Expect("getsettings"));
    script.push(Step::send("settings:anon:on:email:off:idle:on\x00"));
    script.push(Step::ExpectWhere("setsettings", |args| {
        args.first().map(String::as_str) == Some("anon")
    }));
    script.push(Step::ExpectWhere("setsettings", |args| {
        args.first().map(String::as_str) == Some("email")
    }));
    script.push(Step::ExpectWhere("setsettings", |args| {
        args.first().map(String::as_str) == Some("idle")
    }));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let private = connect(&server).await;

    let settings = private.get_settings().await.unwrap();
    assert_eq!(settings.get("anon"), Some(&true));
    assert_eq!(settings.get("email"), Some(&false));
    assert_eq!(settings.get("idle"), Some(&true));

    private.set_settings(false, true, false).await.unwrap();
}

#[tokio::test]
async fn connect_user_reports_presence() {
    let mut script = pm_prelude();
    script.push(Step::Expect("connect"));
    script.push(Step::send("connect:alice:on:1700000000\x00"));
    script.push(Step::Expect("getpresence"));
    script.push(Step::send("presence:alice:1:bob:0\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let private = connect(&server).await;

    let status = private.connect_user("Alice").await.unwrap();
    assert_eq!(status, rusty_chatango::FriendStatus::Online);

    let presence = private.get_presence(&["alice", "bob"]).await.unwrap();
    assert_eq!(
        presence,
        vec![("alice".to_owned(), true), ("bob".to_owned(), false)]
    );
}
