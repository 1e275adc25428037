//! Private-message session.
//!
//! # Protocol
//! 1. Fetch the `auth.chatango.com` token through the REST collaborator
//! 2. Connect to `c1.chatango.com` and send `tlogin:<token>:2:<sid>\x00`
//! 3. Within the first five frames the server answers `OK:…` or
//!    `DENIED:…`; unmatched frames are re-injected for the pump
//! 4. Steady state: presence, messages, and the 60-second idle protocol
//!
//! The server sends no positive acknowledgement for outgoing messages, so
//! `send_message` watches a short window for error heads only; a quiet
//! window is success. A `kickingoff` frame (another login took the seat)
//! disconnects cleanly with no reconnect attempt.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ch_wire::message::{SelfIdentity, parse_private_message};
use ch_wire::style::format_private_body;
use ch_wire::time::ServerTime;
use ch_wire::{Frame, User, server};

use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::events::{Event, EventSink};
use crate::options::SessionOptions;
use crate::rest::TokenSource;
use crate::session::{FrameHandler, SessionCore, Step, run_listener};
use crate::transport::Transport;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_FRAME_WINDOW: usize = 5;
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);
/// Error-observation window after an outgoing message.
const SEND_ERROR_WINDOW: Duration = Duration::from_millis(500);
/// Outbound silence before we report ourselves idle.
const IDLE_AFTER: Duration = Duration::from_secs(60);

/// A friend's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendStatus {
    Online,
    OnApp,
    Offline,
}

#[derive(Debug, Clone)]
pub struct Friend {
    pub name: String,
    pub status: FriendStatus,
    pub last_seen: ServerTime,
    pub is_idle: bool,
}

#[derive(Default)]
struct PrivateMeta {
    login_name: String,
    session_id: String,
    clock_skew_secs: f64,
    is_idle: bool,
}

/// Handle to the private-message session.
#[derive(Clone)]
pub struct Private {
    inner: Arc<PrivateInner>,
}

pub(crate) struct PrivateInner {
    opts: SessionOptions,
    core: Arc<SessionCore>,
    sink: Arc<dyn EventSink>,
    tokens: Arc<dyn TokenSource>,
    weak_self: Weak<PrivateInner>,
    meta: StdRwLock<PrivateMeta>,
    friends: StdRwLock<HashMap<String, Friend>>,
    blocked: StdRwLock<HashSet<String>>,
    last_outbound: StdMutex<Instant>,
    outbound_notify: Notify,
    kicked: AtomicBool,
    on_closed: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Private {
    /// Connect and authenticate the PM endpoint.
    pub async fn connect(
        opts: SessionOptions,
        tokens: Arc<dyn TokenSource>,
        sink: Arc<dyn EventSink>,
        on_closed: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Private, ClientError> {
        let session_id = if opts.session_id.is_empty() {
            uuid::Uuid::new_v4().simple().to_string()[..16].to_owned()
        } else {
            opts.session_id.clone()
        };
        let core = Arc::new(SessionCore::new("private".to_owned()));
        let inner = Arc::new_cyclic(|weak| PrivateInner {
            opts,
            core,
            sink,
            tokens,
            weak_self: weak.clone(),
            meta: StdRwLock::new(PrivateMeta {
                session_id,
                ..PrivateMeta::default()
            }),
            friends: StdRwLock::new(HashMap::new()),
            blocked: StdRwLock::new(HashSet::new()),
            last_outbound: StdMutex::new(Instant::now()),
            outbound_notify: Notify::new(),
            kicked: AtomicBool::new(false),
            on_closed: StdMutex::new(None),
        });
        *inner.on_closed.lock().unwrap() = on_closed;
        inner.connect_and_auth().await?;
        tokio::spawn(run_listener(inner.core.clone(), inner.clone()));
        tokio::spawn(idle_task(inner.clone()));
        Ok(Private { inner })
    }

    pub fn login_name(&self) -> String {
        self.inner.meta.read().unwrap().login_name.clone()
    }

    pub fn session_id(&self) -> String {
        self.inner.meta.read().unwrap().session_id.clone()
    }

    pub fn clock_skew_secs(&self) -> f64 {
        self.inner.meta.read().unwrap().clock_skew_secs
    }

    pub fn is_idle(&self) -> bool {
        self.inner.meta.read().unwrap().is_idle
    }

    pub fn friends(&self) -> Vec<Friend> {
        self.inner.friends.read().unwrap().values().cloned().collect()
    }

    pub fn blocked_users(&self) -> Vec<String> {
        self.inner.blocked.read().unwrap().iter().cloned().collect()
    }

    /// Cleanly end the session.
    pub async fn disconnect(&self) {
        self.inner.emit(Event::PrivateDisconnected {
            private: self.clone(),
        });
        self.inner.closed();
        self.inner.core.cancel.cancel();
        self.inner.core.drop_transport();
    }

    // -----------------------------------------------------------------------
    // Solicited operations
    // -----------------------------------------------------------------------

    /// Send a private message. Success is a quiet error window: the server
    /// only ever replies with `show_fw`, `toofast`, or
    /// `show_offline_limit`.
    pub async fn send_message(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        inner.mark_outbound().await;
        let body = format_private_body(
            text,
            &inner.opts.name_color,
            inner.opts.text_size,
            &inner.opts.text_color,
            &inner.opts.text_font,
        );
        let req = Frame::new("msg", &[&to.to_lowercase(), &body]);
        let result = inner
            .core
            .sync_send(req, SEND_ERROR_WINDOW, |frame, core| {
                match frame.head.as_str() {
                    "show_fw" => Err(ClientError::FloodWarning),
                    "toofast" => Err(ClientError::FloodBanned),
                    "show_offline_limit" => Err(ClientError::OfflineMessageLimit),
                    _ => {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                }
            })
            .await;
        match result {
            Err(ClientError::Timeout) => Ok(()),
            other => other,
        }
    }

    /// Current tracking status, as reported by the server.
    pub async fn track(&self) -> Result<Vec<String>, ClientError> {
        let mut status = Vec::new();
        self.accept_one(Frame::new("track", &[]), "track", |frame| {
            status = frame.args.clone();
        })
        .await?;
        Ok(status)
    }

    /// PM settings as `key -> enabled` pairs.
    pub async fn get_settings(&self) -> Result<HashMap<String, bool>, ClientError> {
        let mut settings = HashMap::new();
        self.accept_one(Frame::new("getsettings", &[]), "settings", |frame| {
            for pair in frame.args.chunks(2) {
                if let [key, value] = pair {
                    settings.insert(key.clone(), value == "on");
                }
            }
        })
        .await?;
        Ok(settings)
    }

    /// One stateless settings write; the server sends no reply.
    pub async fn set_setting(&self, key: &str, on: bool) -> Result<(), ClientError> {
        self.inner.mark_outbound().await;
        self.inner
            .core
            .send(&Frame::new(
                "setsettings",
                &[key, if on { "on" } else { "off" }],
            ))
            .await
    }

    /// The three PM toggles, written as three stateless updates.
    pub async fn set_settings(
        &self,
        allow_anon: bool,
        email_offline: bool,
        show_idle: bool,
    ) -> Result<(), ClientError> {
        self.set_setting("anon", allow_anon).await?;
        self.set_setting("email", email_offline).await?;
        self.set_setting("idle", show_idle).await
    }

    /// Fetch the friend list and replace the local copy.
    pub async fn get_friend_list(&self) -> Result<Vec<Friend>, ClientError> {
        let inner = &self.inner;
        self.accept_one(Frame::new("wl", &[]), "wl", |frame| {
            inner.replace_friends(frame);
        })
        .await?;
        Ok(self.friends())
    }

    pub async fn add_friend(&self, name: &str) -> Result<Friend, ClientError> {
        let name = name.to_lowercase();
        let mut friend = None;
        self.accept_one(Frame::new("wladd", &[&name]), "wladd", |frame| {
            let f = Friend {
                name: frame.arg(0).to_owned(),
                status: parse_status(frame.arg(1)),
                last_seen: ServerTime::parse(frame.arg(2)).unwrap_or_default(),
                is_idle: false,
            };
            self.inner
                .friends
                .write()
                .unwrap()
                .insert(f.name.clone(), f.clone());
            friend = Some(f);
        })
        .await?;
        friend.ok_or_else(|| ClientError::RequestFailed("friend not added".to_owned()))
    }

    pub async fn remove_friend(&self, name: &str) -> Result<(), ClientError> {
        let name = name.to_lowercase();
        self.accept_one(Frame::new("wldelete", &[&name]), "wldelete", |_frame| {
            self.inner.friends.write().unwrap().remove(&name);
        })
        .await
    }

    /// Names on the PM block list.
    pub async fn get_blocked(&self) -> Result<Vec<String>, ClientError> {
        self.accept_one(Frame::new("getblock", &[]), "block_list", |frame| {
            let set: HashSet<String> =
                frame.args.iter().filter(|a| !a.is_empty()).cloned().collect();
            *self.inner.blocked.write().unwrap() = set;
        })
        .await?;
        Ok(self.blocked_users())
    }

    pub async fn block(&self, name: &str) -> Result<(), ClientError> {
        let name = name.to_lowercase();
        self.accept_one(Frame::new("block", &[&name]), "blocked", |_frame| {
            self.inner.blocked.write().unwrap().insert(name.clone());
        })
        .await
    }

    pub async fn unblock(&self, name: &str) -> Result<(), ClientError> {
        let name = name.to_lowercase();
        self.accept_one(Frame::new("unblock", &[&name]), "unblocked", |_frame| {
            self.inner.blocked.write().unwrap().remove(&name);
        })
        .await
    }

    /// Open a tracked conversation; returns the peer's presence.
    pub async fn connect_user(&self, name: &str) -> Result<FriendStatus, ClientError> {
        let name = name.to_lowercase();
        let mut status = FriendStatus::Offline;
        self.accept_one(Frame::new("connect", &[&name]), "connect", |frame| {
            status = parse_status(frame.arg(1));
        })
        .await?;
        Ok(status)
    }

    /// Close a tracked conversation; the server sends no reply.
    pub async fn disconnect_user(&self, name: &str) -> Result<(), ClientError> {
        self.inner.mark_outbound().await;
        self.inner
            .core
            .send(&Frame::new("disconnect", &[&name.to_lowercase()]))
            .await
    }

    /// Presence for an arbitrary set of names.
    pub async fn get_presence(&self, names: &[&str]) -> Result<Vec<(String, bool)>, ClientError> {
        let joined = names.join(";").to_lowercase();
        let mut presence = Vec::new();
        self.accept_one(Frame::new("getpresence", &[&joined]), "presence", |frame| {
            for pair in frame.args.chunks(2) {
                if let [name, state] = pair {
                    presence.push((name.clone(), state == "1" || state == "on"));
                }
            }
        })
        .await?;
        Ok(presence)
    }

    pub async fn profile_refresh(&self) -> Result<(), ClientError> {
        self.accept_one(Frame::new("miu", &[]), "miu", |_frame| {}).await
    }

    /// One-accept-head solicited call: run `req`, capture the single reply
    /// with `on_accept`, re-inject everything else.
    async fn accept_one<F>(&self, req: Frame, accept: &str, mut on_accept: F) -> Result<(), ClientError>
    where
        F: FnMut(&Frame) + Send,
    {
        self.inner.mark_outbound().await;
        self.inner
            .core
            .sync_send(req, SYNC_TIMEOUT, |frame, core| {
                if frame.head == accept {
                    on_accept(&frame);
                    Ok(Step::Done)
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Session plumbing
// ---------------------------------------------------------------------------

impl PrivateInner {
    fn handle(&self) -> Private {
        Private {
            inner: self
                .weak_self
                .upgrade()
                .expect("session outlives its handlers"),
        }
    }

    fn emit(&self, event: Event) {
        self.sink.dispatch(event);
    }

    fn closed(&self) {
        if let Some(cb) = self.on_closed.lock().unwrap().take() {
            cb();
        }
    }

    async fn connect_and_auth(&self) -> Result<(), ClientError> {
        let token = self.tokens.token().await?;
        let url = self
            .opts
            .server_url
            .clone()
            .unwrap_or_else(server::private_url);
        let mut transport = Transport::connect(&url).await?;
        let label = self.core.label.clone();
        let inbound = transport.sustain(
            &self.core.cancel,
            Box::new(move |error| warn!(session = %label, %error, "transport error")),
        )?;
        self.core.install_transport(transport, inbound).await;

        let session_id = self.meta.read().unwrap().session_id.clone();
        self.core
            .send(&Frame::session("tlogin", &[&token, "2", &session_id]))
            .await?;
        for _ in 0..AUTH_FRAME_WINDOW {
            let frame = self.core.await_frame(AUTH_TIMEOUT).await?;
            match frame.head.as_str() {
                "OK" => {
                    self.core.push(frame);
                    return Ok(());
                }
                "DENIED" => {
                    self.core.drop_transport();
                    return Err(ClientError::BadLogin);
                }
                _ => self.core.push(frame),
            }
        }
        self.core.drop_transport();
        Err(ClientError::BadLogin)
    }

    /// Record outbound activity; if we had reported idle, report active
    /// first.
    async fn mark_outbound(&self) {
        let was_idle = {
            let mut meta = self.meta.write().unwrap();
            std::mem::replace(&mut meta.is_idle, false)
        };
        *self.last_outbound.lock().unwrap() = Instant::now();
        self.outbound_notify.notify_waiters();
        if was_idle {
            if let Err(error) = self.core.send(&Frame::new("idle", &["1"])).await {
                debug!(%error, "idle:1 not sent");
            }
        }
    }

    fn replace_friends(&self, frame: &Frame) {
        let mut map = HashMap::new();
        for chunk in frame.args.chunks(4) {
            if let [name, time, state, idle] = chunk {
                if name.is_empty() {
                    continue;
                }
                map.insert(
                    name.to_lowercase(),
                    Friend {
                        name: name.clone(),
                        status: parse_status(state),
                        last_seen: ServerTime::parse(time).unwrap_or_default(),
                        is_idle: idle == "1",
                    },
                );
            }
        }
        *self.friends.write().unwrap() = map;
    }

    fn update_friend(&self, name: &str, status: FriendStatus, time: &str) -> User {
        let mut friends = self.friends.write().unwrap();
        let entry = friends
            .entry(name.to_lowercase())
            .or_insert_with(|| Friend {
                name: name.to_owned(),
                status,
                last_seen: ServerTime::default(),
                is_idle: false,
            });
        entry.status = status;
        if let Ok(t) = ServerTime::parse(time) {
            entry.last_seen = t;
        }
        User::registered(name)
    }
}

#[async_trait]
impl FrameHandler for PrivateInner {
    async fn handle_frame(self: Arc<Self>, frame: Frame) {
        if let Err(error) = self.route_frame(&frame) {
            warn!(head = %frame.head, %error, "pm frame handling failed");
            self.emit(Event::Error {
                original: None,
                message: format!("{}: {error}", frame.head),
            });
        }
    }

    async fn recover(self: Arc<Self>) -> bool {
        self.core.drop_transport();
        if self.core.cancel.is_cancelled() || self.kicked.load(Ordering::Acquire) {
            return false;
        }
        let mut backoff = Backoff::new(self.opts.reconnect);
        for attempt in 1..=backoff.max_retries() {
            if backoff.sleep(&self.core.cancel).await {
                return false;
            }
            // The auth path refreshes the REST cookie through the token
            // source on every attempt.
            match self.connect_and_auth().await {
                Ok(()) => {
                    info!(attempt, "pm reconnected");
                    self.emit(Event::PrivateReconnected {
                        private: self.handle(),
                    });
                    return true;
                }
                Err(error) => warn!(attempt, %error, "pm reconnect attempt failed"),
            }
        }
        info!("pm reconnect retries exhausted");
        self.emit(Event::PrivateDisconnected {
            private: self.handle(),
        });
        self.closed();
        false
    }
}

impl PrivateInner {
    fn route_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        match frame.head.as_str() {
            "OK" => {
                let mut meta = self.meta.write().unwrap();
                meta.is_idle = false;
                drop(meta);
                *self.last_outbound.lock().unwrap() = Instant::now();
                self.emit(Event::PrivateConnected {
                    private: self.handle(),
                });
            }
            "time" => {
                let server_now = ServerTime::parse(frame.arg(0)).unwrap_or_default();
                let local_now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map_or(0.0, |d| d.as_secs_f64());
                self.meta.write().unwrap().clock_skew_secs =
                    local_now - server_now.as_secs_f64();
            }
            "seller_name" => {
                let mut meta = self.meta.write().unwrap();
                meta.login_name = frame.arg(0).to_owned();
                if !frame.arg(1).is_empty() {
                    meta.session_id = frame.arg(1).to_owned();
                }
            }
            "kickingoff" => {
                info!("pm session kicked off by another login");
                self.kicked.store(true, Ordering::Release);
                self.emit(Event::PrivateKickedOff {
                    private: self.handle(),
                });
                self.closed();
                self.core.cancel.cancel();
                self.core.drop_transport();
            }
            "msg" => {
                let me = SelfIdentity {
                    name: self.meta.read().unwrap().login_name.clone(),
                    user_id: 0,
                };
                let message = Arc::new(parse_private_message(frame, &me)?);
                self.emit(Event::PrivateMessage {
                    private: self.handle(),
                    message,
                });
            }
            "msgoff" => {
                let me = SelfIdentity {
                    name: self.meta.read().unwrap().login_name.clone(),
                    user_id: 0,
                };
                let message = Arc::new(parse_private_message(frame, &me)?);
                self.emit(Event::PrivateOfflineMessage {
                    private: self.handle(),
                    message,
                });
            }
            "wlonline" => {
                let user = self.update_friend(frame.arg(0), FriendStatus::Online, frame.arg(1));
                self.emit(Event::FriendOnline {
                    private: self.handle(),
                    user,
                });
            }
            "wlapp" => {
                let user = self.update_friend(frame.arg(0), FriendStatus::OnApp, frame.arg(1));
                self.emit(Event::FriendOnlineApp {
                    private: self.handle(),
                    user,
                });
            }
            "wloffline" => {
                let user = self.update_friend(frame.arg(0), FriendStatus::Offline, frame.arg(1));
                self.emit(Event::FriendOffline {
                    private: self.handle(),
                    user,
                });
            }
            "wl" => self.replace_friends(frame),
            "idleupdate" => {
                let name = frame.arg(0).to_owned();
                let is_idle = frame.arg(1) != "1";
                if let Some(f) = self.friends.write().unwrap().get_mut(&name.to_lowercase()) {
                    f.is_idle = is_idle;
                }
                self.emit(Event::FriendIdleChange {
                    private: self.handle(),
                    user: User::registered(&name),
                    is_idle,
                });
            }
            "miu" => {
                let name = frame.arg(0);
                if !name.is_empty() {
                    self.emit(Event::ProfileRefresh {
                        group: None,
                        private: Some(self.handle()),
                        user: User::registered(name),
                    });
                }
            }
            "block_list" => {
                let set: HashSet<String> =
                    frame.args.iter().filter(|a| !a.is_empty()).cloned().collect();
                *self.blocked.write().unwrap() = set;
            }
            head => debug!(head, "unhandled pm frame"),
        }
        Ok(())
    }
}

fn parse_status(s: &str) -> FriendStatus {
    match s {
        "on" | "online" | "1" => FriendStatus::Online,
        "app" => FriendStatus::OnApp,
        _ => FriendStatus::Offline,
    }
}

/// After 60 seconds without outbound activity, tell the server we are
/// idle; `mark_outbound` reports activity again and resets the timer.
async fn idle_task(inner: Arc<PrivateInner>) {
    loop {
        if inner.core.cancel.is_cancelled() {
            break;
        }
        let is_idle = inner.meta.read().unwrap().is_idle;
        if is_idle {
            tokio::select! {
                biased;
                () = inner.core.cancel.cancelled() => break,
                () = inner.outbound_notify.notified() => {}
            }
            continue;
        }
        let deadline = *inner.last_outbound.lock().unwrap() + IDLE_AFTER;
        tokio::select! {
            biased;
            () = inner.core.cancel.cancelled() => break,
            () = inner.outbound_notify.notified() => {}
            () = tokio::time::sleep_until(deadline) => {
                let still_quiet =
                    inner.last_outbound.lock().unwrap().elapsed() >= IDLE_AFTER;
                if still_quiet {
                    inner.meta.write().unwrap().is_idle = true;
                    if let Err(error) = inner.core.send(&Frame::new("idle", &["0"])).await {
                        debug!(%error, "idle:0 not sent");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(parse_status("on"), FriendStatus::Online);
        assert_eq!(parse_status("app"), FriendStatus::OnApp);
        assert_eq!(parse_status("off"), FriendStatus::Offline);
        assert_eq!(parse_status(""), FriendStatus::Offline);
    }
}
