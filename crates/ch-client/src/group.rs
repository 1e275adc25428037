//! Group room session.
//!
//! # Protocol
//! 1. Connect to the group's content-addressed `s{N}` server
//! 2. Send `v\x00`; expect `v:<min>:<current>`
//! 3. Send `bauth:<room>:<session>:<user>:<pass>\x00`; expect `ok:…`
//!    (anything else is `LoginFailed`); both accepted frames are
//!    re-injected so the dispatch pump observes them
//! 4. The server streams `i` history then `inited`; additional history is
//!    backfilled in pages of up to 20 until 100 messages or `nomore`
//! 5. Steady state: unsolicited frames drive typed events; solicited
//!    requests correlate replies through the take-over discipline
//!
//! On transport loss the reconnect loop runs up to 10 backoff attempts;
//! live state is cleared before each attempt and rebuilt from the fresh
//! `ok`/`participant` stream.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ch_wire::anon::create_anon_seed;
use ch_wire::flags::flag_changes;
use ch_wire::message::{
    ParticipantOp, SelfIdentity, parse_ban_page, parse_ban_record, parse_group_info,
    parse_group_message, parse_moderator_list, parse_participant_frame, parse_participant_record,
};
use ch_wire::style::{format_anon_body, format_group_body};
use ch_wire::text::{render_plain, split_into_chunks};
use ch_wire::time::ServerTime;
use ch_wire::{Blocked, Frame, Message, ModAction, Participant, User, server};

use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::events::{Event, EventSink};
use crate::options::SessionOptions;
use crate::session::{FrameHandler, SessionCore, Step, run_listener};
use crate::transport::Transport;

/// Bounded history size.
pub const MAX_HISTORY: usize = 100;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const HISTORY_PAGE: usize = 20;
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2900;

/// Handle to a joined group room. Cheap to clone; the session lives until
/// [`Group::leave`], session cancellation, or reconnect exhaustion.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("name", &self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// State containers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GroupMeta {
    owner: String,
    session_id: String,
    user_id: u64,
    login_name: String,
    logged_in: bool,
    login_time: ServerTime,
    clock_skew_secs: f64,
    flags: u64,
    channel: u64,
    version_min: u32,
    version_current: u32,
    max_message_length: usize,
    premium_flag: u64,
    premium_expire_at: i64,
    rate_limit_secs: u64,
    participant_count: u64,
    user_count: u64,
    anon_count: u64,
}

/// Insertion-ordered bounded message history: ordered keys plus a map,
/// under one mutex.
struct History {
    order: VecDeque<String>,
    by_id: HashMap<String, Arc<Message>>,
}

impl History {
    fn new() -> Self {
        History {
            order: VecDeque::with_capacity(MAX_HISTORY),
            by_id: HashMap::with_capacity(MAX_HISTORY),
        }
    }

    /// Append a fresh message, trimming the oldest entries past the cap.
    fn push_recent(&mut self, msg: Arc<Message>) {
        if self.by_id.insert(msg.id.clone(), msg.clone()).is_none() {
            self.order.push_back(msg.id.clone());
        }
        while self.order.len() > MAX_HISTORY {
            if let Some(old) = self.order.pop_front() {
                self.by_id.remove(&old);
            }
        }
    }

    /// Prepend a backfilled message; refused once the cap is reached.
    fn push_history(&mut self, msg: Arc<Message>) -> bool {
        if self.order.len() >= MAX_HISTORY || self.by_id.contains_key(&msg.id) {
            return false;
        }
        self.order.push_front(msg.id.clone());
        self.by_id.insert(msg.id.clone(), msg);
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        if self.by_id.remove(id).is_some() {
            self.order.retain(|k| k != id);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.by_id.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn snapshot(&self) -> Vec<Arc<Message>> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }
}

/// Messages waiting for their final id, and id rewrites that arrived
/// before their message.
#[derive(Default)]
struct TempMessages {
    by_id: HashMap<String, Message>,
    id_rewrites: HashMap<String, String>,
}

#[derive(Default)]
struct Windows {
    restrict_until: Option<Instant>,
    rate_limited_until: Option<Instant>,
}

pub(crate) struct GroupInner {
    name: String,
    opts: SessionOptions,
    core: Arc<SessionCore>,
    sink: Arc<dyn EventSink>,
    weak_self: Weak<GroupInner>,
    meta: StdRwLock<GroupMeta>,
    history: StdMutex<History>,
    temp: StdMutex<TempMessages>,
    participants: StdRwLock<HashMap<String, Participant>>,
    moderators: StdRwLock<HashMap<String, u64>>,
    windows: StdRwLock<Windows>,
    on_closed: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl Group {
    /// Join a room: connect, authenticate, and start the listener.
    ///
    /// `on_closed` fires once when the session ends for good (leave,
    /// cancellation, or reconnect exhaustion); the application uses it to
    /// drop the session from its registry.
    pub async fn join(
        name: &str,
        opts: SessionOptions,
        sink: Arc<dyn EventSink>,
        on_closed: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Group, ClientError> {
        let name = name.to_lowercase();
        let core = Arc::new(SessionCore::new(format!("group:{name}")));
        let inner = Arc::new_cyclic(|weak| GroupInner {
            name,
            opts,
            core,
            sink,
            weak_self: weak.clone(),
            meta: StdRwLock::new(GroupMeta {
                max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
                ..GroupMeta::default()
            }),
            history: StdMutex::new(History::new()),
            temp: StdMutex::new(TempMessages::default()),
            participants: StdRwLock::new(HashMap::new()),
            moderators: StdRwLock::new(HashMap::new()),
            windows: StdRwLock::new(Windows::default()),
            on_closed: StdMutex::new(on_closed),
        });
        inner.connect_and_auth().await?;
        tokio::spawn(run_listener(inner.core.clone(), inner.clone()));
        Ok(Group { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> String {
        self.inner.meta.read().unwrap().owner.clone()
    }

    pub fn session_id(&self) -> String {
        self.inner.meta.read().unwrap().session_id.clone()
    }

    pub fn user_id(&self) -> u64 {
        self.inner.meta.read().unwrap().user_id
    }

    pub fn login_name(&self) -> String {
        self.inner.meta.read().unwrap().login_name.clone()
    }

    pub fn logged_in(&self) -> bool {
        self.inner.meta.read().unwrap().logged_in
    }

    pub fn flags(&self) -> u64 {
        self.inner.meta.read().unwrap().flags
    }

    /// Server clock minus local clock at login, in seconds.
    pub fn clock_skew_secs(&self) -> f64 {
        self.inner.meta.read().unwrap().clock_skew_secs
    }

    pub fn version(&self) -> (u32, u32) {
        let meta = self.inner.meta.read().unwrap();
        (meta.version_min, meta.version_current)
    }

    pub fn max_message_length(&self) -> usize {
        self.inner.meta.read().unwrap().max_message_length
    }

    pub fn premium_expire_at(&self) -> i64 {
        self.inner.meta.read().unwrap().premium_expire_at
    }

    pub fn rate_limit_secs(&self) -> u64 {
        self.inner.meta.read().unwrap().rate_limit_secs
    }

    pub fn participant_count(&self) -> u64 {
        self.inner.meta.read().unwrap().participant_count
    }

    pub fn user_count(&self) -> u64 {
        self.inner.meta.read().unwrap().user_count
    }

    pub fn anon_count(&self) -> u64 {
        self.inner.meta.read().unwrap().anon_count
    }

    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.inner.history.lock().unwrap().snapshot()
    }

    pub fn message_count(&self) -> usize {
        self.inner.history.lock().unwrap().len()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.inner
            .participants
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    pub fn moderators(&self) -> HashMap<String, u64> {
        self.inner.moderators.read().unwrap().clone()
    }

    /// End of the current send restriction window, if one is active.
    pub fn restricted_until(&self) -> Option<Instant> {
        let w = self.inner.windows.read().unwrap();
        w.restrict_until.filter(|t| *t > Instant::now())
    }

    pub fn rate_limited_until(&self) -> Option<Instant> {
        let w = self.inner.windows.read().unwrap();
        w.rate_limited_until.filter(|t| *t > Instant::now())
    }

    /// Leave the room and end the session.
    pub async fn leave(&self) {
        self.inner.emit(Event::GroupLeft {
            group: self.clone(),
        });
        self.inner.closed();
        self.inner.core.cancel.cancel();
        self.inner.core.drop_transport();
    }

    // -----------------------------------------------------------------------
    // Solicited operations
    // -----------------------------------------------------------------------

    /// Send a message and wait for the server to commit it: the first
    /// self-authored `b` followed by the `u` rewriting its id. Unrelated
    /// frames observed in the window are re-injected for the pump.
    pub async fn send_message(&self, text: &str) -> Result<Arc<Message>, ClientError> {
        let inner = &self.inner;
        let (body, channel) = {
            let meta = inner.meta.read().unwrap();
            let body = if meta.logged_in {
                format_group_body(
                    text,
                    &inner.opts.name_color,
                    inner.opts.text_size,
                    &inner.opts.text_color,
                    &inner.opts.text_font,
                )
            } else {
                let seed = create_anon_seed(&meta.login_name, meta.user_id);
                format_anon_body(text, seed)
            };
            (body, meta.channel.to_string())
        };
        let nonce = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
        let req = Frame::new("bm", &[&nonce, &channel, &body]);

        let me = inner.self_identity();
        let mut pending: Option<Message> = None;
        let mut committed: Option<Message> = None;
        inner
            .core
            .sync_send(req, SYNC_TIMEOUT, |frame, core| {
                match frame.head.as_str() {
                    "b" => {
                        let msg = parse_group_message(&frame, &me)?;
                        if msg.user.is_self && pending.is_none() {
                            pending = Some(msg);
                        }
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                    "u" => {
                        if let Some(mut msg) = pending.take_if(|m| m.id == frame.arg(0)) {
                            msg.id = frame.arg(1).to_owned();
                            committed = Some(msg);
                            core.push(frame);
                            Ok(Step::Done)
                        } else {
                            core.push(frame);
                            Ok(Step::Continue)
                        }
                    }
                    "show_fw" => {
                        inner.start_restriction_minutes(frame.arg(0));
                        Err(ClientError::FloodWarning)
                    }
                    "show_tb" | "tb" | "show_nlp_tb" | "nlptb" => {
                        inner.start_restriction_minutes(frame.arg(0));
                        Err(ClientError::Restricted)
                    }
                    "show_nlp" => Err(match frame.arg(0) {
                        "sn" => ClientError::ShortWarning,
                        "nlp" => ClientError::NonSenseWarning,
                        _ => ClientError::SpamWarning,
                    }),
                    "msglexceeded" => {
                        let max: usize = frame.arg(0).parse().unwrap_or(0);
                        if max > 0 {
                            inner.meta.write().unwrap().max_message_length = max;
                        }
                        Err(ClientError::MessageLengthExceeded(max))
                    }
                    "ratelimited" => {
                        let secs: u64 = frame.arg(0).parse().unwrap_or(0);
                        inner.start_rate_limit_secs(secs);
                        Err(ClientError::RateLimited(secs))
                    }
                    "mustlogin" => Err(ClientError::MustLogin),
                    "proxybanned" => Err(ClientError::ProxyBanned),
                    "verificationrequired" => Err(ClientError::VerificationRequired),
                    "climited" => Err(ClientError::CLimited),
                    _ => {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                }
            })
            .await?;
        committed.map(Arc::new).ok_or_else(|| {
            ClientError::RequestFailed("message id rewrite never arrived".to_owned())
        })
    }

    /// Send text that may exceed the room's length limit, split into
    /// word-preserving chunks. Returns each committed message in order.
    pub async fn send_long_message(&self, text: &str) -> Result<Vec<Arc<Message>>, ClientError> {
        let max = self.max_message_length();
        let mut sent = Vec::new();
        for chunk in split_into_chunks(text, max) {
            sent.push(self.send_message(&chunk).await?);
        }
        Ok(sent)
    }

    /// Fetch the current participant list (also restarts the feed).
    pub async fn get_participants(&self) -> Result<Vec<Participant>, ClientError> {
        let inner = &self.inner;
        inner
            .core
            .sync_send(
                Frame::new("gparticipants", &[]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "gparticipants" {
                        inner.on_gparticipants(&frame);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(self.participants())
    }

    /// Stop the live participants feed. No reply.
    pub async fn stop_participants_feed(&self) -> Result<(), ClientError> {
        self.inner
            .core
            .send(&Frame::new("gparticipants", &["stop"]))
            .await
    }

    pub async fn get_rate_limit(&self) -> Result<u64, ClientError> {
        let inner = &self.inner;
        let mut secs = 0;
        inner
            .core
            .sync_send(
                Frame::new("getratelimit", &[]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "getratelimit" {
                        secs = frame.arg(0).parse().unwrap_or(0);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        self.inner.meta.write().unwrap().rate_limit_secs = secs;
        Ok(secs)
    }

    pub async fn set_rate_limit(&self, secs: u64) -> Result<(), ClientError> {
        let inner = &self.inner;
        inner
            .core
            .sync_send(
                Frame::new("setratelimit", &[&secs.to_string()]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "ratelimitset" {
                        inner.meta.write().unwrap().rate_limit_secs =
                            frame.arg(0).parse().unwrap_or(secs);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    /// Current announcement: `(enabled, interval_secs, text)`.
    pub async fn get_announcement(&self) -> Result<(bool, u64, String), ClientError> {
        let mut result = (false, 0, String::new());
        self.inner
            .core
            .sync_send(
                Frame::new("getannouncement", &[]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "getannc" {
                        result = (
                            frame.arg(0) == "1",
                            frame.arg(1).parse().unwrap_or(0),
                            render_plain(&frame.tail(2)),
                        );
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(result)
    }

    pub async fn set_announcement(
        &self,
        enabled: bool,
        interval_secs: u64,
        text: &str,
    ) -> Result<(), ClientError> {
        let enabled = if enabled { "1" } else { "0" };
        let interval = interval_secs.to_string();
        self.inner
            .core
            .sync_send(
                Frame::new("updateannouncement", &[enabled, &interval, text]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "getannc" {
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    /// Toggle group flags: set the bits in `add`, clear the bits in
    /// `remove`.
    pub async fn update_flags(&self, add: u64, remove: u64) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(
                Frame::new("updategroupflags", &[&add.to_string(), &remove.to_string()]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "groupflagstoggled" {
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    /// Premium status: `(flag, expires_at_unix)`.
    pub async fn get_premium(&self) -> Result<(u64, i64), ClientError> {
        let inner = &self.inner;
        inner
            .core
            .sync_send(Frame::new("getpremium", &[]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "premium" {
                    inner.on_premium(&frame);
                    Ok(Step::Done)
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await?;
        let meta = inner.meta.read().unwrap();
        Ok((meta.premium_flag, meta.premium_expire_at))
    }

    /// Toggle the message background. Requires live premium.
    pub async fn set_background(&self, on: bool) -> Result<(), ClientError> {
        if self.inner.meta.read().unwrap().premium_expire_at == 0 {
            return Err(ClientError::PremiumExpired);
        }
        self.inner
            .core
            .send(&Frame::new("msgbg", &[if on { "1" } else { "0" }]))
            .await
    }

    /// Toggle message media. Requires live premium.
    pub async fn set_media(&self, on: bool) -> Result<(), ClientError> {
        if self.inner.meta.read().unwrap().premium_expire_at == 0 {
            return Err(ClientError::PremiumExpired);
        }
        self.inner
            .core
            .send(&Frame::new("msgmedia", &[if on { "1" } else { "0" }]))
            .await
    }

    /// One page of the ban list, oldest entries after `offset_unix`.
    pub async fn get_banlist(
        &self,
        offset_unix: i64,
        count: usize,
    ) -> Result<Vec<Blocked>, ClientError> {
        self.banlist_page("block", "blocklist", offset_unix, count).await
    }

    /// One page of the unban list.
    pub async fn get_unbanlist(
        &self,
        offset_unix: i64,
        count: usize,
    ) -> Result<Vec<Blocked>, ClientError> {
        self.banlist_page("unblock", "unblocklist", offset_unix, count)
            .await
    }

    async fn banlist_page(
        &self,
        which: &str,
        accept: &str,
        offset_unix: i64,
        count: usize,
    ) -> Result<Vec<Blocked>, ClientError> {
        let offset = offset_unix.to_string();
        let count = count.to_string();
        let mut page = Vec::new();
        self.inner
            .core
            .sync_send(
                Frame::new("blocklist", &[which, &offset, "next", &count, "anons", "1"]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == accept {
                        page = parse_ban_page(&frame.tail(0));
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(page)
    }

    /// Ban by moderation id / ip / name (all taken from a message).
    pub async fn ban(&self, mod_id: &str, ip: &str, name: &str) -> Result<Blocked, ClientError> {
        let mut record = None;
        self.inner
            .core
            .sync_send(
                Frame::new("block", &[mod_id, ip, name]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "blocked" && frame.arg(0) == mod_id {
                        let fields: Vec<&str> = frame.args.iter().map(String::as_str).collect();
                        record = Some(parse_ban_record(&fields)?);
                        core.push(frame);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        record.ok_or_else(|| ClientError::RequestFailed("ban not confirmed".to_owned()))
    }

    /// Convenience: ban the sender of a message.
    pub async fn ban_message(&self, msg: &Message) -> Result<Blocked, ClientError> {
        let ip = msg.ip.as_deref().unwrap_or("");
        let name = if msg.user.is_anon { "" } else { &msg.user.name };
        self.ban(&msg.mod_id, ip, name).await
    }

    pub async fn search_bans(&self, query: &str) -> Result<Vec<Blocked>, ClientError> {
        let mut page = Vec::new();
        self.inner
            .core
            .sync_send(
                Frame::new("searchban", &[query]),
                SYNC_TIMEOUT,
                |frame, core| match frame.head.as_str() {
                    "bansearchresult" => {
                        page = parse_ban_page(&frame.tail(0));
                        Ok(Step::Done)
                    }
                    "badbansearchstring" => {
                        Err(ClientError::RequestFailed("bad ban search string".to_owned()))
                    }
                    _ => {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(page)
    }

    pub async fn unban(&self, mod_id: &str, ip: &str) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(
                Frame::new("removeblock", &[mod_id, ip]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "unblocked" && frame.arg(0) == mod_id {
                        core.push(frame);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    pub async fn unban_all(&self) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(Frame::new("unbanall", &[]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "allunblocked" {
                    core.push(frame);
                    Ok(Step::Done)
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    /// Log in mid-session, with a password or as a temporary alias.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        let req = if password.is_empty() {
            Frame::new("blogin", &[username])
        } else {
            Frame::new("blogin", &[username, password])
        };
        inner
            .core
            .sync_send(req, SYNC_TIMEOUT, |frame, core| match frame.head.as_str() {
                "pwdok" | "aliasok" => {
                    let mut meta = inner.meta.write().unwrap();
                    meta.logged_in = frame.head == "pwdok";
                    meta.login_name = username.to_owned();
                    Ok(Step::Done)
                }
                "badalias" => Err(ClientError::BadAlias),
                "badlogin" => Err(ClientError::BadLogin),
                _ => {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        inner
            .core
            .sync_send(Frame::new("blogout", &[]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "logoutok" {
                    let mut meta = inner.meta.write().unwrap();
                    meta.logged_in = false;
                    meta.login_name = inner.opts.anon_name.clone();
                    Ok(Step::Done)
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    /// Banned words: `(partial match words, whole words)`.
    pub async fn get_banned_words(&self) -> Result<(String, String), ClientError> {
        let mut words = (String::new(), String::new());
        self.inner
            .core
            .sync_send(
                Frame::new("getbannedwords", &[]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "bw" {
                        words = (frame.arg(0).to_owned(), frame.arg(1).to_owned());
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(words)
    }

    pub async fn set_banned_words(&self, partial: &str, whole: &str) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(
                Frame::session("setbannedwords", &[partial, whole]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "ubw" {
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    /// Delete one message by id.
    pub async fn delete_message(&self, id: &str) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(Frame::new("delmsg", &[id]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "delete" && frame.arg(0) == id {
                    core.push(frame);
                    Ok(Step::Done)
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    /// Delete every message from one sender.
    pub async fn delete_all_from(
        &self,
        mod_id: &str,
        ip: &str,
        name: &str,
    ) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(
                Frame::new("delallmsg", &[mod_id, ip, name]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "deleteall" {
                        core.push(frame);
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await
    }

    /// Clear the whole room history.
    pub async fn clear_all(&self) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(Frame::new("clearall", &[]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "clearall" {
                    let ok = frame.arg(0) == "ok";
                    core.push(frame);
                    if ok {
                        Ok(Step::Done)
                    } else {
                        Err(ClientError::RequestFailed("clearall refused".to_owned()))
                    }
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    pub async fn add_moderator(&self, name: &str, access: u64) -> Result<(), ClientError> {
        self.mod_change(
            Frame::new("addmod", &[&name.to_lowercase(), &access.to_string()]),
            "addmoderr",
            name,
        )
        .await
    }

    pub async fn update_moderator(&self, name: &str, access: u64) -> Result<(), ClientError> {
        self.mod_change(
            Frame::new("updmod", &[&name.to_lowercase(), &access.to_string()]),
            "updatemoderr",
            name,
        )
        .await
    }

    pub async fn remove_moderator(&self, name: &str) -> Result<(), ClientError> {
        self.mod_change(
            Frame::new("removemod", &[&name.to_lowercase()]),
            "removemoderr",
            name,
        )
        .await
    }

    async fn mod_change(
        &self,
        req: Frame,
        error_head: &str,
        _name: &str,
    ) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(req, SYNC_TIMEOUT, |frame, core| {
                if frame.head == "mods" {
                    core.push(frame);
                    Ok(Step::Done)
                } else if frame.head == error_head {
                    Err(ClientError::RequestFailed(format!(
                        "moderator change refused: {}",
                        frame.head
                    )))
                } else {
                    core.push(frame);
                    Ok(Step::Continue)
                }
            })
            .await
    }

    /// One page of the moderation log.
    pub async fn get_mod_actions(
        &self,
        forward: bool,
        offset: u64,
    ) -> Result<Vec<ModAction>, ClientError> {
        let dir = if forward { "next" } else { "prev" };
        let offset = offset.to_string();
        let mut page = Vec::new();
        self.inner
            .core
            .sync_send(
                Frame::new("getmodactions", &[dir, &offset, "50"]),
                SYNC_TIMEOUT,
                |frame, core| {
                    if frame.head == "modactions" {
                        page = ModAction::parse_page(&frame.tail(0));
                        Ok(Step::Done)
                    } else {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(page)
    }

    /// Pull one more page of history. Returns `true` while the server has
    /// more (`gotmore`), `false` on `nomore`.
    pub async fn get_more_history(&self, amount: usize, page: u64) -> Result<bool, ClientError> {
        self.inner.get_more(amount, page).await
    }

    /// Ask the server to re-send our profile metadata to the room.
    pub async fn profile_refresh(&self) -> Result<(), ClientError> {
        self.inner
            .core
            .sync_send(Frame::new("miu", &[]), SYNC_TIMEOUT, |frame, core| {
                if frame.head == "miu" {
                    core.push(frame);
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

impl GroupInner {
    fn handle(&self) -> Group {
        Group {
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

    fn self_identity(&self) -> SelfIdentity {
        let meta = self.meta.read().unwrap();
        SelfIdentity {
            name: meta.login_name.clone(),
            user_id: meta.user_id,
        }
    }

    async fn connect_and_auth(&self) -> Result<(), ClientError> {
        let url = self
            .opts
            .server_url
            .clone()
            .unwrap_or_else(|| server::group_url(&self.name));
        let mut transport = Transport::connect(&url).await?;
        let label = self.core.label.clone();
        let inbound = transport.sustain(
            &self.core.cancel,
            Box::new(move |error| warn!(session = %label, %error, "transport error")),
        )?;
        self.core.install_transport(transport, inbound).await;

        self.core.send(&Frame::session("v", &[])).await?;
        let version = self.core.await_frame(AUTH_TIMEOUT).await?;
        if version.head != "v" {
            self.core.drop_transport();
            return Err(ClientError::LoginFailed);
        }
        self.core.push(version);

        let auth = Frame::session(
            "bauth",
            &[
                &self.name,
                &self.opts.session_id,
                &self.opts.username,
                &self.opts.password,
            ],
        );
        self.core.send(&auth).await?;
        let ok = self.core.await_frame(AUTH_TIMEOUT).await?;
        if ok.head != "ok" {
            self.core.drop_transport();
            return Err(ClientError::LoginFailed);
        }
        self.core.push(ok);
        Ok(())
    }

    /// Drop everything rebuilt by a fresh `ok`/`participant` stream.
    fn clear_live_state(&self) {
        self.history.lock().unwrap().clear();
        {
            let mut temp = self.temp.lock().unwrap();
            temp.by_id.clear();
            temp.id_rewrites.clear();
        }
        self.participants.write().unwrap().clear();
        self.moderators.write().unwrap().clear();
        let mut meta = self.meta.write().unwrap();
        meta.participant_count = 0;
        meta.user_count = 0;
        meta.anon_count = 0;
    }
}

#[async_trait]
impl FrameHandler for GroupInner {
    async fn handle_frame(self: Arc<Self>, frame: Frame) {
        if let Err(error) = self.route_frame(&frame).await {
            warn!(group = %self.name, head = %frame.head, %error, "frame handling failed");
            self.emit(Event::Error {
                original: None,
                message: format!("{}: {error}", frame.head),
            });
        }
    }

    async fn recover(self: Arc<Self>) -> bool {
        self.core.drop_transport();
        if self.core.cancel.is_cancelled() {
            return false;
        }
        let mut backoff = Backoff::new(self.opts.reconnect);
        for attempt in 1..=backoff.max_retries() {
            if backoff.sleep(&self.core.cancel).await {
                return false;
            }
            self.clear_live_state();
            match self.connect_and_auth().await {
                Ok(()) => {
                    info!(group = %self.name, attempt, "reconnected");
                    self.emit(Event::GroupReconnected {
                        group: self.handle(),
                    });
                    return true;
                }
                Err(error) => {
                    warn!(group = %self.name, attempt, %error, "reconnect attempt failed");
                }
            }
        }
        info!(group = %self.name, "reconnect retries exhausted, leaving");
        self.emit(Event::GroupLeft {
            group: self.handle(),
        });
        self.closed();
        false
    }
}

// ---------------------------------------------------------------------------
// Per-head handlers
// ---------------------------------------------------------------------------

impl GroupInner {
    async fn route_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        match frame.head.as_str() {
            "v" => self.on_version(frame),
            "ok" => self.on_ok(frame)?,
            "i" => self.on_history_message(frame)?,
            "inited" => self.on_inited().await,
            "n" => self.on_participant_count(frame),
            "b" => self.on_message(frame)?,
            "u" => self.on_message_update(frame),
            "delete" => self.on_delete(frame),
            "deleteall" => self.on_delete_all(frame),
            "clearall" => self.on_clear_all(frame),
            "participant" => self.on_participant(frame)?,
            "groupflagsupdate" => self.on_flags_update(frame),
            "annc" => self.on_announcement(frame),
            "mods" => self.on_mods(frame).await,
            "blocked" => self.on_blocked(frame)?,
            "unblocked" => self.on_unblocked(frame)?,
            "allunblocked" => self.emit(Event::AllUnbanned {
                group: self.handle(),
            }),
            "updgroupinfo" => self.emit(Event::GroupInfoUpdate {
                group: self.handle(),
                info: parse_group_info(frame),
            }),
            "miu" | "updateprofile" => self.on_profile_refresh(frame),
            "show_fw" | "show_tb" | "tb" | "show_nlp" | "show_nlp_tb" | "nlptb" => {
                self.start_restriction_minutes(frame.arg(0));
            }
            "end_fw" | "end_nlp" => {
                self.windows.write().unwrap().restrict_until = None;
            }
            "ratelimited" => {
                self.start_rate_limit_secs(frame.arg(0).parse().unwrap_or(0));
            }
            "getratelimit" | "ratelimitset" => {
                self.meta.write().unwrap().rate_limit_secs = frame.arg(0).parse().unwrap_or(0);
            }
            "premium" => self.on_premium(frame),
            "gparticipants" => self.on_gparticipants(frame),
            head => debug!(group = %self.name, head, "unhandled frame"),
        }
        Ok(())
    }

    fn on_version(&self, frame: &Frame) {
        let mut meta = self.meta.write().unwrap();
        meta.version_min = frame.arg(0).parse().unwrap_or(0);
        meta.version_current = frame.arg(1).parse().unwrap_or(0);
    }

    fn on_ok(&self, frame: &Frame) -> Result<(), ClientError> {
        let login_time = ServerTime::parse(frame.arg(4)).unwrap_or_default();
        let now_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());
        {
            let mut meta = self.meta.write().unwrap();
            meta.owner = frame.arg(0).to_owned();
            meta.session_id = frame.arg(1).to_owned();
            meta.user_id = frame.arg(1).get(..8).and_then(|s| s.parse().ok()).unwrap_or(0);
            meta.login_time = login_time;
            meta.clock_skew_secs = now_unix - login_time.as_secs_f64();
            meta.flags = frame.arg(7).parse().unwrap_or(0);
            match frame.arg(2) {
                "M" => {
                    meta.logged_in = true;
                    meta.login_name = frame.arg(3).to_owned();
                }
                _ => {
                    // Logged out: the displayed name derives from the
                    // login time and our connection id.
                    meta.logged_in = false;
                    meta.login_name = ch_wire::anon::anon_name(
                        (login_time.secs % 10_000).unsigned_abs() as u32,
                        meta.user_id,
                    );
                }
            }
        }
        {
            let mut mods = self.moderators.write().unwrap();
            mods.clear();
            for (name, access) in parse_moderator_list(frame.arg(6)) {
                mods.insert(name, access);
            }
        }
        self.emit(Event::GroupJoined {
            group: self.handle(),
        });
        Ok(())
    }

    fn on_history_message(&self, frame: &Frame) -> Result<(), ClientError> {
        let msg = Arc::new(parse_group_message(frame, &self.self_identity())?);
        let inserted = self.history.lock().unwrap().push_history(msg.clone());
        if inserted {
            self.emit(Event::MessageHistory {
                group: self.handle(),
                message: msg,
            });
        }
        Ok(())
    }

    /// History prelude is done; backfill in pages until full or `nomore`.
    async fn on_inited(&self) {
        let mut page = 0u64;
        while self.history.lock().unwrap().len() < MAX_HISTORY && page < 5 {
            match self.get_more(HISTORY_PAGE, page).await {
                Ok(true) => page += 1,
                Ok(false) => break,
                Err(error) => {
                    debug!(group = %self.name, %error, "history backfill stopped");
                    break;
                }
            }
        }
    }

    async fn get_more(&self, amount: usize, page: u64) -> Result<bool, ClientError> {
        let amount = amount.to_string();
        let offset = page.to_string();
        let mut more = false;
        self.core
            .sync_send(
                Frame::new("get_more", &[&amount, &offset]),
                SYNC_TIMEOUT,
                |frame, core| match frame.head.as_str() {
                    "i" => {
                        self.on_history_message(&frame)?;
                        Ok(Step::Continue)
                    }
                    "gotmore" => {
                        more = true;
                        Ok(Step::Done)
                    }
                    "nomore" => {
                        more = false;
                        Ok(Step::Done)
                    }
                    _ => {
                        core.push(frame);
                        Ok(Step::Continue)
                    }
                },
            )
            .await?;
        Ok(more)
    }

    fn on_participant_count(&self, frame: &Frame) {
        let count = u64::from_str_radix(frame.arg(0), 16).unwrap_or(0);
        self.meta.write().unwrap().participant_count = count;
        self.emit(Event::ParticipantCountChange {
            group: self.handle(),
            count,
        });
    }

    fn on_message(&self, frame: &Frame) -> Result<(), ClientError> {
        let mut msg = parse_group_message(frame, &self.self_identity())?;
        let rewrite = {
            let mut temp = self.temp.lock().unwrap();
            match temp.id_rewrites.remove(&msg.id) {
                Some(new_id) => Some(new_id),
                None => {
                    temp.by_id.insert(msg.id.clone(), msg);
                    return Ok(());
                }
            }
        };
        if let Some(new_id) = rewrite {
            msg.id = new_id;
        }
        self.commit_message(msg);
        Ok(())
    }

    fn on_message_update(&self, frame: &Frame) {
        let old_id = frame.arg(0).to_owned();
        let new_id = frame.arg(1).to_owned();
        let pending = {
            let mut temp = self.temp.lock().unwrap();
            match temp.by_id.remove(&old_id) {
                Some(msg) => Some(msg),
                None => {
                    temp.id_rewrites.insert(old_id, new_id.clone());
                    None
                }
            }
        };
        if let Some(mut msg) = pending {
            msg.id = new_id;
            self.commit_message(msg);
        }
    }

    fn commit_message(&self, msg: Message) {
        let msg = Arc::new(msg);
        self.history.lock().unwrap().push_recent(msg.clone());
        self.emit(Event::Message {
            group: self.handle(),
            message: msg,
        });
    }

    fn on_delete(&self, frame: &Frame) {
        let id = frame.arg(0).to_owned();
        self.history.lock().unwrap().remove(&id);
        self.emit(Event::MessageDelete {
            group: self.handle(),
            ids: vec![id],
        });
    }

    fn on_delete_all(&self, frame: &Frame) {
        let ids: Vec<String> = frame.args.iter().filter(|a| !a.is_empty()).cloned().collect();
        {
            let mut history = self.history.lock().unwrap();
            for id in &ids {
                history.remove(id);
            }
        }
        self.emit(Event::MessageDelete {
            group: self.handle(),
            ids,
        });
    }

    fn on_clear_all(&self, frame: &Frame) {
        if frame.arg(0) != "ok" {
            return;
        }
        self.history.lock().unwrap().clear();
        let mut temp = self.temp.lock().unwrap();
        temp.by_id.clear();
        temp.id_rewrites.clear();
        drop(temp);
        self.emit(Event::ClearAll {
            group: self.handle(),
        });
    }

    fn on_participant(&self, frame: &Frame) -> Result<(), ClientError> {
        let (op, participant) = parse_participant_frame(frame)?;
        let previous = {
            let mut map = self.participants.write().unwrap();
            match op {
                ParticipantOp::Leave => map.remove(&participant.participant_id),
                ParticipantOp::Join | ParticipantOp::Transition => map
                    .insert(participant.participant_id.clone(), participant.clone()),
            }
        };
        {
            let mut meta = self.meta.write().unwrap();
            let count = |is_anon: bool, meta: &mut GroupMeta, delta: i64| {
                let field = if is_anon {
                    &mut meta.anon_count
                } else {
                    &mut meta.user_count
                };
                *field = field.saturating_add_signed(delta);
            };
            match op {
                ParticipantOp::Join => count(participant.user.is_anon, &mut meta, 1),
                ParticipantOp::Leave => {
                    if let Some(prev) = &previous {
                        count(prev.user.is_anon, &mut meta, -1);
                    }
                }
                ParticipantOp::Transition => {
                    if let Some(prev) = &previous {
                        count(prev.user.is_anon, &mut meta, -1);
                    }
                    count(participant.user.is_anon, &mut meta, 1);
                }
            }
        }
        let group = self.handle();
        match op {
            ParticipantOp::Join => self.emit(Event::Join { group, participant }),
            ParticipantOp::Leave => self.emit(Event::Leave { group, participant }),
            ParticipantOp::Transition => {
                let was_anon = previous.as_ref().is_none_or(|p| p.user.is_anon);
                if was_anon && !participant.user.is_anon {
                    self.emit(Event::Login { group, participant });
                } else if !was_anon && participant.user.is_anon {
                    self.emit(Event::Logout { group, participant });
                }
            }
        }
        Ok(())
    }

    fn on_gparticipants(&self, frame: &Frame) {
        let mut map = HashMap::new();
        let (mut users, mut anons) = (0u64, 0u64);
        for record in frame.tail(0).split(';').filter(|r| !r.is_empty()) {
            if let Ok(p) = parse_participant_record(record) {
                if p.user.is_anon {
                    anons += 1;
                } else {
                    users += 1;
                }
                map.insert(p.participant_id.clone(), p);
            }
        }
        *self.participants.write().unwrap() = map;
        let mut meta = self.meta.write().unwrap();
        meta.user_count = users;
        meta.anon_count = anons;
    }

    fn on_flags_update(&self, frame: &Frame) {
        let new: u64 = frame.arg(0).parse().unwrap_or(0);
        let diff = {
            let mut meta = self.meta.write().unwrap();
            let diff = flag_changes(meta.flags, new);
            meta.flags = new;
            diff
        };
        self.emit(Event::FlagUpdate {
            group: self.handle(),
            diff,
        });
    }

    fn on_announcement(&self, frame: &Frame) {
        self.emit(Event::Announcement {
            group: self.handle(),
            text: render_plain(&frame.tail(2)),
        });
    }

    /// Diff the incoming moderator list against the current one. If we
    /// were added or removed ourselves, local history is stale: clear it
    /// and ask for a fresh init batch.
    async fn on_mods(&self, frame: &Frame) {
        let new: HashMap<String, u64> = parse_moderator_list(&frame.tail(0)).into_iter().collect();
        let old = {
            let mut mods = self.moderators.write().unwrap();
            std::mem::replace(&mut *mods, new.clone())
        };
        let group = self.handle();
        let mut self_changed = false;
        let me = self.meta.read().unwrap().login_name.to_lowercase();

        for (name, access) in &new {
            match old.get(name) {
                None => {
                    if *name == me {
                        self_changed = true;
                    }
                    self.emit(Event::ModeratorAdded {
                        group: group.clone(),
                        user: User::registered(name),
                        access: *access,
                    });
                }
                Some(prev) if prev != access => {
                    self.emit(Event::ModeratorUpdated {
                        group: group.clone(),
                        user: User::registered(name),
                        diff: flag_changes(*prev, *access),
                    });
                }
                Some(_) => {}
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                if *name == me {
                    self_changed = true;
                }
                self.emit(Event::ModeratorRemoved {
                    group: group.clone(),
                    user: User::registered(name),
                });
            }
        }

        if self_changed {
            self.history.lock().unwrap().clear();
            {
                let mut temp = self.temp.lock().unwrap();
                temp.by_id.clear();
                temp.id_rewrites.clear();
            }
            if let Err(error) = self.core.send(&Frame::new("reload_init_batch", &[])).await {
                debug!(group = %self.name, %error, "reload_init_batch not sent");
            }
        }
    }

    fn on_blocked(&self, frame: &Frame) -> Result<(), ClientError> {
        let fields: Vec<&str> = frame.args.iter().map(String::as_str).collect();
        let record = parse_ban_record(&fields)?;
        self.emit(Event::UserBanned {
            group: self.handle(),
            record,
        });
        Ok(())
    }

    fn on_unblocked(&self, frame: &Frame) -> Result<(), ClientError> {
        let fields: Vec<&str> = frame.args.iter().map(String::as_str).collect();
        let record = parse_ban_record(&fields)?;
        self.emit(Event::UserUnbanned {
            group: self.handle(),
            record,
        });
        Ok(())
    }

    fn on_profile_refresh(&self, frame: &Frame) {
        let name = frame.arg(0);
        if name.is_empty() {
            return;
        }
        self.emit(Event::ProfileRefresh {
            group: Some(self.handle()),
            private: None,
            user: User::registered(name),
        });
    }

    fn on_premium(&self, frame: &Frame) {
        let flag: u64 = frame.arg(0).parse().unwrap_or(0);
        let expire: i64 = frame.arg(1).parse().unwrap_or(0);
        {
            let mut meta = self.meta.write().unwrap();
            meta.premium_flag = flag;
            meta.premium_expire_at = expire;
        }
        if self.opts.enable_bg
            && expire > 0
            && let Some(this) = self.weak_self.upgrade()
        {
            tokio::spawn(async move {
                if let Err(error) = this.core.send(&Frame::new("msgbg", &["1"])).await {
                    debug!(group = %this.name, %error, "msgbg not sent");
                }
            });
        }
    }

    fn start_restriction_minutes(&self, arg: &str) {
        let minutes: u64 = arg.parse().unwrap_or(0);
        if minutes > 0 {
            self.windows.write().unwrap().restrict_until =
                Some(Instant::now() + Duration::from_secs(minutes * 60));
        }
    }

    fn start_rate_limit_secs(&self, secs: u64) {
        if secs > 0 {
            self.windows.write().unwrap().rate_limited_until =
                Some(Instant::now() + Duration::from_secs(secs));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<Event>>);

    impl EventSink for RecordingSink {
        fn dispatch(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn test_group() -> (Arc<GroupInner>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let core = Arc::new(SessionCore::new("group:test".to_owned()));
        let inner = Arc::new_cyclic(|weak| GroupInner {
            name: "test".to_owned(),
            opts: SessionOptions::default(),
            core,
            sink: sink.clone(),
            weak_self: weak.clone(),
            meta: StdRwLock::new(GroupMeta {
                max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
                ..GroupMeta::default()
            }),
            history: StdMutex::new(History::new()),
            temp: StdMutex::new(TempMessages::default()),
            participants: StdRwLock::new(HashMap::new()),
            moderators: StdRwLock::new(HashMap::new()),
            windows: StdRwLock::new(Windows::default()),
            on_closed: StdMutex::new(None),
        });
        (inner, sink)
    }

    fn kinds(sink: &RecordingSink) -> Vec<u64> {
        sink.0.lock().unwrap().iter().map(Event::kind).collect()
    }

    #[tokio::test]
    async fn ok_frame_populates_identity() {
        let (g, sink) = test_group();
        let ok = Frame::decode(
            "ok:roomowner:12345678ABCD:M:loginName:1700000000:1.2.3.4:alice,82240;bob,144:0\x00",
        );
        g.clone().handle_frame(ok).await;
        let meta = g.meta.read().unwrap();
        assert_eq!(meta.owner, "roomowner");
        assert_eq!(meta.session_id, "12345678ABCD");
        assert_eq!(meta.user_id, 12_345_678);
        assert!(meta.logged_in);
        assert_eq!(meta.login_name, "loginName");
        drop(meta);
        assert_eq!(g.moderators.read().unwrap().len(), 2);
        assert_eq!(kinds(&sink), vec![crate::event_type::GROUP_JOINED]);
    }

    #[tokio::test]
    async fn anon_ok_derives_display_name() {
        let (g, _) = test_group();
        let ok = Frame::decode("ok:owner:12345678XXXX:N::1700001234:1.2.3.4::0\x00");
        g.clone().handle_frame(ok).await;
        let meta = g.meta.read().unwrap();
        assert!(!meta.logged_in);
        assert_eq!(
            meta.login_name,
            ch_wire::anon::anon_name(1234, 12_345_678)
        );
    }

    #[tokio::test]
    async fn message_waits_for_id_rewrite() {
        let (g, sink) = test_group();
        g.clone()
            .handle_frame(Frame::decode("b:1:alice::7:m1:t1::0:0:hi\r\n"))
            .await;
        // Stashed, not yet committed.
        assert_eq!(g.history.lock().unwrap().len(), 0);
        g.clone()
            .handle_frame(Frame::decode("u:t1:real1\r\n"))
            .await;
        assert_eq!(g.history.lock().unwrap().len(), 1);
        let messages = g.history.lock().unwrap().snapshot();
        assert_eq!(messages[0].id, "real1");
        assert_eq!(kinds(&sink), vec![crate::event_type::MESSAGE]);
    }

    #[tokio::test]
    async fn id_rewrite_may_arrive_first() {
        let (g, _) = test_group();
        g.clone()
            .handle_frame(Frame::decode("u:t9:real9\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("b:1:alice::7:m1:t9::0:0:hi\r\n"))
            .await;
        let messages = g.history.lock().unwrap().snapshot();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "real9");
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let mut history = History::new();
        for i in 0..150 {
            let f = Frame::decode(&format!("b:{i}:alice::7:m:m{i}::0:0:x\r\n"));
            let msg = parse_group_message(&f, &SelfIdentity::default()).unwrap();
            history.push_recent(Arc::new(msg));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        let ids: Vec<String> = history.snapshot().iter().map(|m| m.id.clone()).collect();
        let expected: Vec<String> = (50..150).map(|i| format!("m{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn history_prepend_stops_at_cap() {
        let mut history = History::new();
        for i in 0..MAX_HISTORY {
            let f = Frame::decode(&format!("i:{i}:a::1:m:h{i}::0:0:x\r\n"));
            let msg = parse_group_message(&f, &SelfIdentity::default()).unwrap();
            assert!(history.push_history(Arc::new(msg)));
        }
        let f = Frame::decode("i:0:a::1:m:extra::0:0:x\r\n");
        let msg = parse_group_message(&f, &SelfIdentity::default()).unwrap();
        assert!(!history.push_history(Arc::new(msg)));
        assert_eq!(history.len(), MAX_HISTORY);
    }

    #[tokio::test]
    async fn participant_join_leave_counts() {
        let (g, sink) = test_group();
        g.clone()
            .handle_frame(Frame::decode("participant:1:p1:7:alice:None::1\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("participant:1:p2:8:None:None::2\r\n"))
            .await;
        {
            let meta = g.meta.read().unwrap();
            assert_eq!(meta.user_count, 1);
            assert_eq!(meta.anon_count, 1);
        }
        g.clone()
            .handle_frame(Frame::decode("participant:0:p1:7:alice:None::1\r\n"))
            .await;
        {
            let meta = g.meta.read().unwrap();
            assert_eq!(meta.user_count, 0);
            assert_eq!(meta.anon_count, 1);
        }
        assert_eq!(
            kinds(&sink),
            vec![
                crate::event_type::JOIN,
                crate::event_type::JOIN,
                crate::event_type::LEAVE
            ]
        );
    }

    #[tokio::test]
    async fn participant_transition_login_logout() {
        let (g, sink) = test_group();
        g.clone()
            .handle_frame(Frame::decode("participant:1:p1:7:None:None::5\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("participant:2:p1:7:alice:None::5\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("participant:2:p1:7:None:None::5\r\n"))
            .await;
        assert_eq!(
            kinds(&sink),
            vec![
                crate::event_type::JOIN,
                crate::event_type::LOGIN,
                crate::event_type::LOGOUT
            ]
        );
    }

    #[tokio::test]
    async fn mods_diff_emits_add_remove_update() {
        let (g, sink) = test_group();
        g.clone()
            .handle_frame(Frame::decode("mods:alice,3;bob,1\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("mods:alice,7;carol,1\r\n"))
            .await;
        let events = sink.0.lock().unwrap();
        // First frame: two adds. Second: update (alice), add (carol),
        // remove (bob).
        assert_eq!(events.len(), 5);
        let updated = events.iter().find_map(|e| match e {
            Event::ModeratorUpdated { user, diff, .. } => Some((user.name.clone(), *diff)),
            _ => None,
        });
        let (name, diff) = updated.unwrap();
        assert_eq!(name, "alice");
        assert_eq!(diff.added, 0b100);
        assert_eq!(diff.removed, 0);
    }

    #[tokio::test]
    async fn flag_update_diffs() {
        let (g, sink) = test_group();
        g.meta.write().unwrap().flags = 0b0101_0010;
        g.clone()
            .handle_frame(Frame::decode("groupflagsupdate:50\r\n"))
            .await;
        let events = sink.0.lock().unwrap();
        match &events[0] {
            Event::FlagUpdate { diff, .. } => {
                assert_eq!(diff.added, 0b0010_0000);
                assert_eq!(diff.removed, 0b0100_0000);
            }
            _ => panic!("expected FlagUpdate"),
        }
    }

    #[tokio::test]
    async fn restriction_heads_open_a_window() {
        let (g, _) = test_group();
        g.clone()
            .handle_frame(Frame::decode("show_fw:60\r\n"))
            .await;
        let until = g.windows.read().unwrap().restrict_until.unwrap();
        let left = until - Instant::now();
        assert!(left > Duration::from_secs(59 * 60) && left <= Duration::from_secs(60 * 60));
        g.clone().handle_frame(Frame::decode("end_fw\r\n")).await;
        assert!(g.windows.read().unwrap().restrict_until.is_none());
    }

    #[tokio::test]
    async fn clearall_wipes_history_and_temp() {
        let (g, sink) = test_group();
        g.clone()
            .handle_frame(Frame::decode("u:t1:r1\r\n"))
            .await;
        g.clone()
            .handle_frame(Frame::decode("b:1:alice::7:m:t1::0:0:hi\r\n"))
            .await;
        assert_eq!(g.history.lock().unwrap().len(), 1);
        g.clone()
            .handle_frame(Frame::decode("clearall:ok\r\n"))
            .await;
        assert_eq!(g.history.lock().unwrap().len(), 0);
        assert!(kinds(&sink).contains(&crate::event_type::CLEAR_ALL));
    }

    #[tokio::test]
    async fn participant_count_is_hex() {
        let (g, sink) = test_group();
        g.clone().handle_frame(Frame::decode("n:3e8\r\n")).await;
        assert_eq!(g.meta.read().unwrap().participant_count, 1000);
        assert_eq!(kinds(&sink), vec![crate::event_type::PARTICIPANT_COUNT]);
    }
}
