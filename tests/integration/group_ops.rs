//! Solicited group operations against scripted replies.

use std::time::Duration;

use rusty_chatango::wire::flags::group as group_flags;
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

async fn join(server: &ScriptServer) -> Group {
    let (sink, _rx) = event_channel();
    Group::join("testroom", opts(&server.url()), sink, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn rate_limit_round_trip() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("getratelimit"));
    script.push(Step::send("getratelimit:12\x00"));
    script.push(Step::ExpectWhere("setratelimit", |args| {
        args.first().map(String::as_str) == Some("5")
    }));
    script.push(Step::send("ratelimitset:5\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    assert_eq!(group.get_rate_limit().await.unwrap(), 12);
    group.set_rate_limit(5).await.unwrap();
    assert_eq!(group.rate_limit_secs(), 5);
}

#[tokio::test]
async fn announcement_round_trip() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("getannouncement"));
    script.push(Step::send("getannc:1:300:welcome <b>all</b>\x00"));
    script.push(Step::Expect("updateannouncement"));
    script.push(Step::send("getannc:0:0:\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let (enabled, interval, text) = group.get_announcement().await.unwrap();
    assert!(enabled);
    assert_eq!(interval, 300);
    assert_eq!(text, "welcome all");
    group.set_announcement(false, 0, "").await.unwrap();
}

#[tokio::test]
async fn banned_words_and_flags() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("getbannedwords"));
    script.push(Step::send("bw:spam%2Cscam:badword\x00"));
    script.push(Step::Expect("setbannedwords"));
    script.push(Step::send("ubw\x00"));
    script.push(Step::Expect("updategroupflags"));
    script.push(Step::send("groupflagstoggled\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let (partial, whole) = group.get_banned_words().await.unwrap();
    assert_eq!(partial, "spam%2Cscam");
    assert_eq!(whole, "badword");
    group.set_banned_words("x", "y").await.unwrap();
    group
        .update_flags(group_flags::NO_ANONS, group_flags::NO_IMAGES)
        .await
        .unwrap();
}

#[tokio::test]
async fn mod_actions_page_renders() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("getmodactions"));
    script.push(Step::send(
        "modactions:6401361,anon,perorist,127.0.0.1,None,1688925129,true;\
         6397575,enlp,perorist,127.0.0.1,None,1688488620,[2113536,0]\x00",
    ));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let page = group.get_mod_actions(true, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(
        page[0].describe(),
        "perorist (127.0.0.1) allowed anons in the group"
    );
    assert!(page[1].describe().contains("nonsense messages (advanced)"));
}

#[tokio::test]
async fn banlist_page_parses() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("blocklist"));
    script.push(Step::send(
        "blocklist:m1:1.1.1.1:bob:loginName:1700000000;m2:2.2.2.2::loginName:1700000100\x00",
    ));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let page = group.get_banlist(0, 25).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].target, "bob");
    assert_eq!(page[1].target, "anon");
}

#[tokio::test]
async fn mid_session_login_and_logout() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("blogout"));
    script.push(Step::send("logoutok\x00"));
    script.push(Step::ExpectWhere("blogin", |args| {
        args.first().map(String::as_str) == Some("otheruser")
    }));
    script.push(Step::send("pwdok\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    group.logout().await.unwrap();
    assert!(!group.logged_in());
    group.login("otheruser", "secret").await.unwrap();
    assert!(group.logged_in());
    assert_eq!(group.login_name(), "otheruser");
}

#[tokio::test]
async fn bad_alias_login_fails() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("blogin"));
    script.push(Step::send("badalias\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let err = group.login("taken", "").await.unwrap_err();
    assert!(matches!(err, ClientError::BadAlias));
}

#[tokio::test]
async fn premium_gates_background() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("getpremium"));
    script.push(Step::send("premium:2:1900000000\x00"));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    // No premium info yet: refused locally.
    let err = group.set_background(true).await.unwrap_err();
    assert!(matches!(err, ClientError::PremiumExpired));

    let (flag, expiry) = group.get_premium().await.unwrap();
    assert_eq!(flag, 2);
    assert_eq!(expiry, 1_900_000_000);
    group.set_background(true).await.unwrap();
}

#[tokio::test]
async fn participants_snapshot() {
    let mut script = group_auth_prelude("12345678ABCD", "loginName");
    script.push(Step::Expect("gparticipants"));
    script.push(Step::send(
        "gparticipants:p1,1700000000,7,alice,None,_;p2,1700000001,8,None,None,_\x00",
    ));

    let server = ScriptServer::start(vec![script]).await.unwrap();
    let group = join(&server).await;

    let participants = group.get_participants().await.unwrap();
    assert_eq!(participants.len(), 2);
    assert_eq!(group.user_count(), 1);
    assert_eq!(group.anon_count(), 1);
}
