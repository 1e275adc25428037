//! Moderation round trips: ban, unban, delete.

use std::time::Duration;

use rusty_chatango::{BackoffConfig, Event, Group, SessionOptions, event_type};
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

/// Ban confirms against the matching moderation id, then the later
/// unban surfaces as an event.
#[tokio::test]
async fn ban_then_unban() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::ExpectWhere("block", |args| {
        args.first().map(String::as_str) == Some("md1")
    }));
    script.push(Step::send(
        "blocked:md1:10.1.2.3:troll:loginName:1700000100\x00",
    ));
    script.push(Step::Idle(Duration::from_millis(50)));
    script.push(Step::send(
        "unblocked:md1:10.1.2.3:troll:loginName:1700000200\x00",
    ));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    let banned = group.ban("md1", "10.1.2.3", "troll").await.unwrap();
    assert_eq!(banned.target, "troll");
    assert_eq!(banned.ip, "10.1.2.3");
    assert_eq!(banned.actor, "loginName");

    // The accepted `blocked` frame was re-injected for the pump.
    wait_for_kind(&mut rx, event_type::USER_BANNED, Duration::from_secs(5)).await;

    let unbanned = wait_for_kind(&mut rx, event_type::USER_UNBANNED, Duration::from_secs(5)).await;
    match unbanned {
        Event::UserUnbanned { record, .. } => {
            assert_eq!(record.mod_id, "md1");
            assert_eq!(record.target, "troll");
        }
        _ => unreachable!(),
    }
}

/// Deleting a message correlates on the echoed id and drops it from
/// history.
#[tokio::test]
async fn delete_one_message() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    // Seed one committed message.
    script.push(Step::send("u:t1:m1\x00"));
    script.push(Step::send("b:1700000001:alice::7:md:t1::0:0:bye\x00"));
    script.push(Step::Expect("delmsg"));
    script.push(Step::send("delete:m1\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();

    wait_for_kind(&mut rx, event_type::MESSAGE, Duration::from_secs(5)).await;
    assert_eq!(group.message_count(), 1);

    group.delete_message("m1").await.unwrap();
    wait_for_kind(&mut rx, event_type::MESSAGE_DELETE, Duration::from_secs(5)).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while group.message_count() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "message never deleted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
