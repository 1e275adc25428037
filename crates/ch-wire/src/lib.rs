// ch-wire: Chatango wire grammar and protocol data model.
//
// Everything in this crate is runtime-free: frame split/join, the
// colon-delimited field layouts, style/anon grammars, and the derived
// values (server selection, flag diffs) that both session kinds and the
// test harness share.

pub mod anon;
pub mod flags;
pub mod frame;
pub mod message;
pub mod modaction;
pub mod server;
pub mod style;
pub mod text;
pub mod time;

pub use flags::{FlagDiff, flag_changes};
pub use frame::{Frame, Terminator};
pub use message::{Blocked, GroupInfo, Message, Participant, Unblocked, User};
pub use modaction::ModAction;
pub use time::ServerTime;

/// Errors produced while decoding wire payloads.
///
/// Frame-level decoding never fails (any text is a frame); these come from
/// the field-level parsers that interpret a frame's arguments.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("bad time value: {0:?}")]
    BadTime(String),
    #[error("bad number in field {field}: {value:?}")]
    BadNumber { field: &'static str, value: String },
    #[error("frame {head:?} is missing field {field}")]
    MissingField { head: &'static str, field: &'static str },
    #[error("malformed record: {0:?}")]
    BadRecord(String),
}
