//! History backfill: after `inited`, the client pages history with
//! `get_more` until the bounded history is full or the server says
//! `nomore`.

use std::time::Duration;

use rusty_chatango::{BackoffConfig, Group, SessionOptions};
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

fn history_frame(id: usize) -> String {
    format!("i:1699{id:06}:alice::7:m:h{id}::0:0:message {id}\x00")
}

async fn wait_for_count(group: &Group, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while group.message_count() < want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "history stuck at {} of {want}",
            group.message_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 95 prelude messages, then one `get_more:20:0` page tops the history up
/// to the 100 cap; no further pages are requested.
#[tokio::test]
async fn backfill_stops_at_cap() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    for id in (0..95).rev() {
        script.push(Step::send(history_frame(id)));
    }
    script.push(Step::send("inited\x00"));
    script.push(Step::ExpectWhere("get_more", |args| {
        args.first().map(String::as_str) == Some("20")
            && args.get(1).map(String::as_str) == Some("0")
    }));
    for id in 100..120 {
        script.push(Step::send(history_frame(id)));
    }
    script.push(Step::send("gotmore\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    wait_for_count(&group, 100).await;
    // The cap refuses the backfill overflow.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(group.message_count(), 100);
    assert_eq!(server.connection_count(), 1);
}

/// The server running dry (`nomore`) ends the paging early.
#[tokio::test]
async fn backfill_stops_on_nomore() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::send("inited\x00"));
    script.push(Step::Expect("get_more"));
    for id in 0..7 {
        script.push(Step::send(history_frame(id)));
    }
    script.push(Step::send("nomore\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, _rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    wait_for_count(&group, 7).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(group.message_count(), 7);
}
