//! Protocol data model: users, messages, participants, ban records.
//!
//! Field layouts handled here:
//!
//! - group message (`b` / `i`):
//!   `time:name:temp_name:user_id:mod_id:msg_id:ip:flags:_:body…`
//! - private message (`msg` / `msgoff`):
//!   `from:_:_:time:flags:body…`
//! - participant update (`participant`):
//!   `op:participant_id:user_id:name:temp_name:_:time`
//! - `gparticipants` record: `participant_id,time,user_id,name,temp_name,_`
//! - ban record (`blocked` / `unblocked` / banlist pages):
//!   `mod_id:ip:target:actor:time`
//! - moderator record (`mods` / `ok` field 6): `name,access_flags`
//!
//! Bodies may contain `:` so they are always the re-joined tail.

use std::time::SystemTime;

use crate::anon::anon_name;
use crate::frame::Frame;
use crate::style::parse_anon_seed;
use crate::text::render_plain;
use crate::time::ServerTime;
use crate::WireError;

/// A message sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    pub name: String,
    pub is_anon: bool,
    pub is_self: bool,
}

impl User {
    pub fn registered(name: &str) -> Self {
        User {
            name: name.to_owned(),
            is_anon: false,
            is_self: false,
        }
    }

    pub fn anon(name: String) -> Self {
        User {
            name,
            is_anon: true,
            is_self: false,
        }
    }
}

/// The identity a parser compares senders against to mark `is_self`.
#[derive(Debug, Clone, Default)]
pub struct SelfIdentity {
    pub name: String,
    pub user_id: u64,
}

impl SelfIdentity {
    fn matches(&self, name: &str, uid: u64) -> bool {
        if self.name.is_empty() {
            return false;
        }
        let name_matches = name.eq_ignore_ascii_case(&self.name);
        if self.user_id != 0 && uid != 0 {
            name_matches && uid == self.user_id
        } else {
            name_matches
        }
    }
}

/// A group or private message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Server message id. May be rewritten once (`u` frame) before the
    /// message is committed to history; immutable afterwards.
    pub id: String,
    /// Moderation id, used by delete/ban requests.
    pub mod_id: String,
    pub user: User,
    pub user_id: u64,
    pub body_html: String,
    pub text: String,
    pub time: ServerTime,
    pub received_at: SystemTime,
    pub flags: u64,
    /// Sender IP; only present on group messages and only for moderators.
    pub ip: Option<String>,
    /// Anonymous seed embedded in the body, when the sender is anonymous.
    pub anon_seed: Option<u32>,
    pub is_private: bool,
}

/// Parse a `b`/`i` group message frame.
pub fn parse_group_message(frame: &Frame, me: &SelfIdentity) -> Result<Message, WireError> {
    let time = ServerTime::parse(frame.arg(0))?;
    let name = frame.arg(1);
    let temp_name = frame.arg(2);
    let user_id = parse_u64_or_zero(frame.arg(3));
    let mod_id = frame.arg(4).to_owned();
    let id = frame.arg(5).to_owned();
    let ip = match frame.arg(6) {
        "" => None,
        ip => Some(ip.to_owned()),
    };
    let flags = parse_u64_or_zero(frame.arg(7));
    let body_html = frame.tail(9);

    let mut anon_seed = None;
    let user = if !name.is_empty() {
        User {
            name: name.to_owned(),
            is_anon: false,
            is_self: me.matches(name, user_id),
        }
    } else if !temp_name.is_empty() {
        User {
            name: temp_name.to_owned(),
            is_anon: true,
            is_self: me.matches(temp_name, user_id),
        }
    } else {
        // Fully anonymous: the display name is derived from the seed the
        // body carries and the sender's numeric id.
        let seed = parse_anon_seed(&body_html).unwrap_or(0);
        anon_seed = Some(seed);
        let derived = anon_name(seed, user_id);
        let is_self = me.matches(&derived, user_id);
        User {
            name: derived,
            is_anon: true,
            is_self,
        }
    };

    Ok(Message {
        id,
        mod_id,
        user,
        user_id,
        text: render_plain(&body_html),
        body_html,
        time,
        received_at: SystemTime::now(),
        flags,
        ip,
        anon_seed,
        is_private: false,
    })
}

/// Parse a `msg`/`msgoff` private message frame.
pub fn parse_private_message(frame: &Frame, me: &SelfIdentity) -> Result<Message, WireError> {
    let from = frame.arg(0);
    let raw_time = frame.arg(3);
    let time = ServerTime::parse(raw_time)?;
    let flags = parse_u64_or_zero(frame.arg(4));
    let body_html = frame.tail(5);
    // The PM endpoint has no message ids; the integer part of the
    // timestamp is the only stable handle.
    let id = raw_time
        .split_once('.')
        .map_or(raw_time, |(secs, _)| secs)
        .to_owned();

    Ok(Message {
        id,
        mod_id: String::new(),
        user: User {
            name: from.to_owned(),
            is_anon: false,
            is_self: me.matches(from, 0),
        },
        user_id: 0,
        text: render_plain(&body_html),
        body_html,
        time,
        received_at: SystemTime::now(),
        flags,
        ip: None,
        anon_seed: None,
        is_private: true,
    })
}

/// One connection instance of a user in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub participant_id: String,
    pub user_id: u64,
    pub user: User,
    pub joined_at: ServerTime,
}

/// What a `participant` frame describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantOp {
    Leave,
    Join,
    Transition,
}

/// Parse a `participant` frame into its opcode and record.
pub fn parse_participant_frame(frame: &Frame) -> Result<(ParticipantOp, Participant), WireError> {
    let op = match frame.arg(0) {
        "0" => ParticipantOp::Leave,
        "1" => ParticipantOp::Join,
        "2" => ParticipantOp::Transition,
        other => {
            return Err(WireError::BadRecord(format!(
                "participant opcode {other:?}"
            )));
        }
    };
    let user_id = parse_u64_or_zero(frame.arg(2));
    let participant = Participant {
        participant_id: frame.arg(1).to_owned(),
        user_id,
        user: resolve_participant_user(frame.arg(3), frame.arg(4), user_id),
        joined_at: ServerTime::parse(frame.arg(6)).unwrap_or_default(),
    };
    Ok((op, participant))
}

/// Parse one `gparticipants` record (`;`-separated on the wire).
pub fn parse_participant_record(record: &str) -> Result<Participant, WireError> {
    let fields: Vec<&str> = record.split(',').collect();
    if fields.len() < 5 {
        return Err(WireError::BadRecord(record.to_owned()));
    }
    let user_id = parse_u64_or_zero(fields[2]);
    Ok(Participant {
        participant_id: fields[0].to_owned(),
        user_id,
        user: resolve_participant_user(fields[3], fields[4], user_id),
        joined_at: ServerTime::parse(fields[1]).unwrap_or_default(),
    })
}

/// Participant frames write `None` for absent names. With both name
/// fields absent there is no seed on the wire to derive from; the
/// zero-seed derivation keeps the name a pure function of the user id.
fn resolve_participant_user(name: &str, temp_name: &str, uid: u64) -> User {
    if !name.is_empty() && name != "None" {
        User::registered(name)
    } else if !temp_name.is_empty() && temp_name != "None" {
        User::anon(temp_name.to_owned())
    } else {
        User::anon(anon_name(0, uid))
    }
}

/// A ban record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub mod_id: String,
    pub ip: String,
    /// Username, or `"anon"` when the target field is empty.
    pub target: String,
    pub actor: String,
    pub time: ServerTime,
}

/// An unban record; same shape as [`Blocked`].
pub type Unblocked = Blocked;

/// Parse the argument slice of a `blocked`/`unblocked` frame or one
/// banlist-page record.
pub fn parse_ban_record(fields: &[&str]) -> Result<Blocked, WireError> {
    if fields.len() < 5 {
        return Err(WireError::BadRecord(fields.join(":")));
    }
    let target = if fields[2].is_empty() {
        "anon".to_owned()
    } else {
        fields[2].to_owned()
    };
    Ok(Blocked {
        mod_id: fields[0].to_owned(),
        ip: fields[1].to_owned(),
        target,
        actor: fields[3].to_owned(),
        time: ServerTime::parse(fields[4]).unwrap_or_default(),
    })
}

/// Parse a banlist page: records `;`-separated, fields `:`-separated.
pub fn parse_ban_page(tail: &str) -> Vec<Blocked> {
    tail.split(';')
        .filter(|r| !r.is_empty())
        .filter_map(|record| {
            let fields: Vec<&str> = record.split(':').collect();
            parse_ban_record(&fields).ok()
        })
        .collect()
}

/// Parse a `mods`-style list: `name,flags` records `;`-separated.
pub fn parse_moderator_list(tail: &str) -> Vec<(String, u64)> {
    tail.split(';')
        .filter(|r| !r.is_empty())
        .map(|record| match record.split_once(',') {
            Some((name, flags)) => (name.to_lowercase(), parse_u64_or_zero(flags)),
            None => (record.to_lowercase(), 0),
        })
        .collect()
}

/// Owner-editable group metadata (`updgroupinfo`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupInfo {
    pub title: String,
    pub message: String,
}

/// Parse an `updgroupinfo` frame; both fields arrive percent-encoded.
pub fn parse_group_info(frame: &Frame) -> GroupInfo {
    GroupInfo {
        title: percent_decode(frame.arg(0)),
        message: percent_decode(&frame.tail(1)),
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                match u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_u64_or_zero(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}
