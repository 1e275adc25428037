//! Send-message multiplexing: unrelated frames interleaved with the
//! `b`/`u` reply pair are re-injected and dispatched normally, and the
//! returned message carries the rewritten id.

use std::time::Duration;

use rusty_chatango::{BackoffConfig, Event, Group, SessionOptions};
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

/// The server replies to `bm` with an unrelated `n:` frame first, then the
/// self-authored `b`, then the `u` id rewrite. The call returns the final
/// id; the `n:` frame surfaces as a participant-count event.
#[tokio::test]
async fn interleaved_frames_are_redispatched() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("bm"));
    script.push(Step::send("n:5\x00"));
    script.push(Step::send(
        "b:1700000001:loginName::12345678:md1:tmp1:1.2.3.4:0:0:hello world\x00",
    ));
    script.push(Step::send("u:tmp1:real9\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();
    // Self-detection needs the identity from the ok frame; wait for the
    // pump to process it.
    ch_test_utils::wait_for_kind(
        &mut rx,
        rusty_chatango::event_type::GROUP_JOINED,
        Duration::from_secs(5),
    )
    .await;

    let sent = group.send_message("hello world").await.unwrap();
    assert_eq!(sent.id, "real9");
    assert!(sent.user.is_self);
    assert_eq!(sent.text, "hello world");

    // Both the re-injected n: and the committed message come through the
    // dispatch path, in whichever order the pump drains them.
    let mut count = None;
    let mut committed_id = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while count.is_none() || committed_id.is_none() {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for redispatched events")
            .expect("event channel closed");
        match event {
            Event::ParticipantCountChange { count: c, .. } => count = Some(c),
            Event::Message { message, .. } => committed_id = Some(message.id.clone()),
            _ => {}
        }
    }
    assert_eq!(count, Some(5));
    assert_eq!(committed_id.as_deref(), Some("real9"));
    assert_eq!(group.participant_count(), 5);
    // The committed message is in history under its final id.
    assert!(group.messages().iter().any(|m| m.id == "real9"));
}

/// A second sender's `b` in the window does not satisfy the call; only
/// the self-authored message does.
#[tokio::test]
async fn foreign_messages_do_not_complete_the_send() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("bm"));
    script.push(Step::send("b:1700000001:stranger::999:mdx:tmpx::0:0:noise\x00"));
    script.push(Step::send("u:tmpx:realx\x00"));
    script.push(Step::send(
        "b:1700000002:loginName::12345678:md1:tmp1:1.2.3.4:0:0:mine\x00",
    ));
    script.push(Step::send("u:tmp1:real1\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let (sink, mut rx) = event_channel();
    let group = Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap();
    ch_test_utils::wait_for_kind(
        &mut rx,
        rusty_chatango::event_type::GROUP_JOINED,
        Duration::from_secs(5),
    )
    .await;

    let sent = group.send_message("mine").await.unwrap();
    assert_eq!(sent.id, "real1");
    // The stranger's message went through the normal commit path too.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(tokio::time::Instant::now() < deadline, "foreign message never committed");
        if group.messages().iter().any(|m| m.id == "realx") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
