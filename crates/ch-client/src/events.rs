//! Typed event feed.
//!
//! Sessions translate inbound frames into these variants and hand them to
//! an [`EventSink`] (the bot runtime's dispatcher). Events are cheap to
//! clone: session handles are `Arc`s and message payloads are shared.

use std::sync::Arc;

use ch_wire::flags::FlagDiff;
use ch_wire::{Blocked, GroupInfo, Message, Participant, Unblocked, User};

use crate::group::Group;
use crate::private::Private;

/// Bit per event kind, for type-mask handlers.
pub mod event_type {
    pub const GROUP_JOINED: u64 = 1 << 0;
    pub const GROUP_RECONNECTED: u64 = 1 << 1;
    pub const GROUP_LEFT: u64 = 1 << 2;
    pub const MESSAGE_HISTORY: u64 = 1 << 3;
    pub const MESSAGE: u64 = 1 << 4;
    pub const MESSAGE_DELETE: u64 = 1 << 5;
    pub const CLEAR_ALL: u64 = 1 << 6;
    pub const JOIN: u64 = 1 << 7;
    pub const LEAVE: u64 = 1 << 8;
    pub const LOGIN: u64 = 1 << 9;
    pub const LOGOUT: u64 = 1 << 10;
    pub const PARTICIPANT_COUNT: u64 = 1 << 11;
    pub const FLAG_UPDATE: u64 = 1 << 12;
    pub const ANNOUNCEMENT: u64 = 1 << 13;
    pub const MODERATOR_ADDED: u64 = 1 << 14;
    pub const MODERATOR_REMOVED: u64 = 1 << 15;
    pub const MODERATOR_UPDATED: u64 = 1 << 16;
    pub const USER_BANNED: u64 = 1 << 17;
    pub const USER_UNBANNED: u64 = 1 << 18;
    pub const ALL_UNBANNED: u64 = 1 << 19;
    pub const GROUP_INFO_UPDATE: u64 = 1 << 20;
    pub const PROFILE_REFRESH: u64 = 1 << 21;
    pub const PRIVATE_CONNECTED: u64 = 1 << 22;
    pub const PRIVATE_RECONNECTED: u64 = 1 << 23;
    pub const PRIVATE_DISCONNECTED: u64 = 1 << 24;
    pub const PRIVATE_KICKED_OFF: u64 = 1 << 25;
    pub const PRIVATE_MESSAGE: u64 = 1 << 26;
    pub const PRIVATE_OFFLINE_MESSAGE: u64 = 1 << 27;
    pub const FRIEND_ONLINE: u64 = 1 << 28;
    pub const FRIEND_ONLINE_APP: u64 = 1 << 29;
    pub const FRIEND_OFFLINE: u64 = 1 << 30;
    pub const FRIEND_IDLE_CHANGE: u64 = 1 << 31;
    pub const ERROR: u64 = 1 << 32;

    pub const ANY_MESSAGE: u64 = MESSAGE | PRIVATE_MESSAGE;
    pub const ALL: u64 = u64::MAX;
}

/// One event out of a session.
#[derive(Clone)]
pub enum Event {
    GroupJoined { group: Group },
    GroupReconnected { group: Group },
    GroupLeft { group: Group },
    MessageHistory { group: Group, message: Arc<Message> },
    Message { group: Group, message: Arc<Message> },
    MessageDelete { group: Group, ids: Vec<String> },
    ClearAll { group: Group },
    Join { group: Group, participant: Participant },
    Leave { group: Group, participant: Participant },
    Login { group: Group, participant: Participant },
    Logout { group: Group, participant: Participant },
    ParticipantCountChange { group: Group, count: u64 },
    FlagUpdate { group: Group, diff: FlagDiff },
    Announcement { group: Group, text: String },
    ModeratorAdded { group: Group, user: User, access: u64 },
    ModeratorRemoved { group: Group, user: User },
    ModeratorUpdated { group: Group, user: User, diff: FlagDiff },
    UserBanned { group: Group, record: Blocked },
    UserUnbanned { group: Group, record: Unblocked },
    AllUnbanned { group: Group },
    GroupInfoUpdate { group: Group, info: GroupInfo },
    ProfileRefresh { group: Option<Group>, private: Option<Private>, user: User },
    PrivateConnected { private: Private },
    PrivateReconnected { private: Private },
    PrivateDisconnected { private: Private },
    PrivateKickedOff { private: Private },
    PrivateMessage { private: Private, message: Arc<Message> },
    PrivateOfflineMessage { private: Private, message: Arc<Message> },
    FriendOnline { private: Private, user: User },
    FriendOnlineApp { private: Private, user: User },
    FriendOffline { private: Private, user: User },
    FriendIdleChange { private: Private, user: User, is_idle: bool },
    /// A handler failed while processing `original`; redispatched once on
    /// the error-handler chain.
    Error { original: Option<Box<Event>>, message: String },
}

impl Event {
    /// The kind bit for type-mask matching.
    pub fn kind(&self) -> u64 {
        use event_type as t;
        match self {
            Event::GroupJoined { .. } => t::GROUP_JOINED,
            Event::GroupReconnected { .. } => t::GROUP_RECONNECTED,
            Event::GroupLeft { .. } => t::GROUP_LEFT,
            Event::MessageHistory { .. } => t::MESSAGE_HISTORY,
            Event::Message { .. } => t::MESSAGE,
            Event::MessageDelete { .. } => t::MESSAGE_DELETE,
            Event::ClearAll { .. } => t::CLEAR_ALL,
            Event::Join { .. } => t::JOIN,
            Event::Leave { .. } => t::LEAVE,
            Event::Login { .. } => t::LOGIN,
            Event::Logout { .. } => t::LOGOUT,
            Event::ParticipantCountChange { .. } => t::PARTICIPANT_COUNT,
            Event::FlagUpdate { .. } => t::FLAG_UPDATE,
            Event::Announcement { .. } => t::ANNOUNCEMENT,
            Event::ModeratorAdded { .. } => t::MODERATOR_ADDED,
            Event::ModeratorRemoved { .. } => t::MODERATOR_REMOVED,
            Event::ModeratorUpdated { .. } => t::MODERATOR_UPDATED,
            Event::UserBanned { .. } => t::USER_BANNED,
            Event::UserUnbanned { .. } => t::USER_UNBANNED,
            Event::AllUnbanned { .. } => t::ALL_UNBANNED,
            Event::GroupInfoUpdate { .. } => t::GROUP_INFO_UPDATE,
            Event::ProfileRefresh { .. } => t::PROFILE_REFRESH,
            Event::PrivateConnected { .. } => t::PRIVATE_CONNECTED,
            Event::PrivateReconnected { .. } => t::PRIVATE_RECONNECTED,
            Event::PrivateDisconnected { .. } => t::PRIVATE_DISCONNECTED,
            Event::PrivateKickedOff { .. } => t::PRIVATE_KICKED_OFF,
            Event::PrivateMessage { .. } => t::PRIVATE_MESSAGE,
            Event::PrivateOfflineMessage { .. } => t::PRIVATE_OFFLINE_MESSAGE,
            Event::FriendOnline { .. } => t::FRIEND_ONLINE,
            Event::FriendOnlineApp { .. } => t::FRIEND_ONLINE_APP,
            Event::FriendOffline { .. } => t::FRIEND_OFFLINE,
            Event::FriendIdleChange { .. } => t::FRIEND_IDLE_CHANGE,
            Event::Error { .. } => t::ERROR,
        }
    }

    /// The group this event belongs to, if any.
    pub fn group(&self) -> Option<&Group> {
        match self {
            Event::GroupJoined { group }
            | Event::GroupReconnected { group }
            | Event::GroupLeft { group }
            | Event::MessageHistory { group, .. }
            | Event::Message { group, .. }
            | Event::MessageDelete { group, .. }
            | Event::ClearAll { group }
            | Event::Join { group, .. }
            | Event::Leave { group, .. }
            | Event::Login { group, .. }
            | Event::Logout { group, .. }
            | Event::ParticipantCountChange { group, .. }
            | Event::FlagUpdate { group, .. }
            | Event::Announcement { group, .. }
            | Event::ModeratorAdded { group, .. }
            | Event::ModeratorRemoved { group, .. }
            | Event::ModeratorUpdated { group, .. }
            | Event::UserBanned { group, .. }
            | Event::UserUnbanned { group, .. }
            | Event::AllUnbanned { group }
            | Event::GroupInfoUpdate { group, .. } => Some(group),
            Event::ProfileRefresh { group, .. } => group.as_ref(),
            Event::Error { original, .. } => original.as_deref().and_then(Event::group),
            _ => None,
        }
    }

    /// The private session this event belongs to, if any.
    pub fn private(&self) -> Option<&Private> {
        match self {
            Event::PrivateConnected { private }
            | Event::PrivateReconnected { private }
            | Event::PrivateDisconnected { private }
            | Event::PrivateKickedOff { private }
            | Event::PrivateMessage { private, .. }
            | Event::PrivateOfflineMessage { private, .. }
            | Event::FriendOnline { private, .. }
            | Event::FriendOnlineApp { private, .. }
            | Event::FriendOffline { private, .. }
            | Event::FriendIdleChange { private, .. } => Some(private),
            Event::ProfileRefresh { private, .. } => private.as_ref(),
            Event::Error { original, .. } => original.as_deref().and_then(Event::private),
            _ => None,
        }
    }

    /// The user the event is about: message sender, participant, friend,
    /// or moderator.
    pub fn user(&self) -> Option<&User> {
        match self {
            Event::Message { message, .. }
            | Event::MessageHistory { message, .. }
            | Event::PrivateMessage { message, .. }
            | Event::PrivateOfflineMessage { message, .. } => Some(&message.user),
            Event::Join { participant, .. }
            | Event::Leave { participant, .. }
            | Event::Login { participant, .. }
            | Event::Logout { participant, .. } => Some(&participant.user),
            Event::ModeratorAdded { user, .. }
            | Event::ModeratorRemoved { user, .. }
            | Event::ModeratorUpdated { user, .. }
            | Event::ProfileRefresh { user, .. }
            | Event::FriendOnline { user, .. }
            | Event::FriendOnlineApp { user, .. }
            | Event::FriendOffline { user, .. }
            | Event::FriendIdleChange { user, .. } => Some(user),
            Event::Error { original, .. } => original.as_deref().and_then(Event::user),
            _ => None,
        }
    }

    /// The message payload, for the four message kinds.
    pub fn message(&self) -> Option<&Arc<Message>> {
        match self {
            Event::Message { message, .. }
            | Event::MessageHistory { message, .. }
            | Event::PrivateMessage { message, .. }
            | Event::PrivateOfflineMessage { message, .. } => Some(message),
            Event::Error { original, .. } => original.as_deref().and_then(Event::message),
            _ => None,
        }
    }

    pub fn participant(&self) -> Option<&Participant> {
        match self {
            Event::Join { participant, .. }
            | Event::Leave { participant, .. }
            | Event::Login { participant, .. }
            | Event::Logout { participant, .. } => Some(participant),
            Event::Error { original, .. } => original.as_deref().and_then(Event::participant),
            _ => None,
        }
    }
}

/// Where sessions emit events. Implemented by the bot dispatcher; tests
/// plug in channel-backed sinks.
pub trait EventSink: Send + Sync + 'static {
    fn dispatch(&self, event: Event);
}
