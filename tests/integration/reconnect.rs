//! Reconnect policy: bounded backoff retries, state rebuilt from the new
//! session, departure after exhaustion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusty_chatango::{BackoffConfig, Group, SessionOptions, event_type};
use ch_test_utils::{ScriptServer, Step, event_channel, group_auth_prelude, wait_for_kind};

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

/// Mid-session transport loss; the first two reconnect attempts are
/// refused and the third succeeds. Identity survives, the participant
/// map is rebuilt from the fresh session with no stale entries.
#[tokio::test]
async fn reconnect_succeeds_on_third_attempt_with_clean_state() {
    let mut first = group_auth_prelude("12345678ABCD", "loginName");
    first.push(Step::send("participant:1:p1:42:ghost:None::1700000001\x00"));
    first.push(Step::Idle(Duration::from_millis(50)));
    first.push(Step::Close);

    let server = ScriptServer::start(vec![
        first,
        vec![Step::Close],
        vec![Step::Close],
        group_auth_prelude("12345678ABCD", "loginName"),
    ])
    .await
    .unwrap();
    let (sink, mut rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    wait_for_kind(&mut rx, event_type::JOIN, Duration::from_secs(5)).await;
    assert_eq!(group.participants().len(), 1);

    wait_for_kind(&mut rx, event_type::GROUP_RECONNECTED, Duration::from_secs(5)).await;
    // Original connection plus three reconnect attempts.
    assert_eq!(server.connection_count(), 4);
    assert_eq!(group.owner(), "roomowner");
    assert_eq!(group.login_name(), "loginName");
    // No stale participants from the old session.
    assert!(group.participants().is_empty());
    assert_eq!(group.message_count(), 0);
}

/// Every reconnect attempt fails: exactly ten attempts, then the group
/// announces departure and fires the closed callback.
#[tokio::test]
async fn reconnect_exhaustion_leaves_the_group() {
    let mut first = group_auth_prelude("12345678ABCD", "loginName");
    first.push(Step::Close);
    let mut scripts = vec![first];
    for _ in 0..10 {
        scripts.push(vec![Step::Close]);
    }

    let server = ScriptServer::start(scripts).await.unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let closed_flag = closed.clone();
    let (sink, mut rx) = event_channel();
    let _group = Group::join(
        "testroom",
        opts(&server.url()),
        sink,
        Some(Box::new(move || closed_flag.store(true, Ordering::SeqCst))),
    )
    .await
    .unwrap();

    wait_for_kind(&mut rx, event_type::GROUP_LEFT, Duration::from_secs(10)).await;
    assert!(closed.load(Ordering::SeqCst));
    // Original connection + ten failed attempts, none beyond.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 11);
}
