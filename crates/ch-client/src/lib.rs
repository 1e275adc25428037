// ch-client: Chatango session layer.
//
// One Group or Private owns its WebSocket transport and runs the frame
// multiplexer over it: a listener pumps unsolicited frames into per-head
// handlers while solicited requests temporarily take over the read side,
// correlate their replies, and re-inject everything they did not want.

pub mod backoff;
pub mod error;
pub mod events;
pub mod group;
pub mod options;
pub mod private;
pub mod rest;
pub(crate) mod session;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use error::ClientError;
pub use events::{Event, EventSink, event_type};
pub use group::Group;
pub use options::SessionOptions;
pub use private::{Friend, FriendStatus, Private};
pub use rest::{RestClient, TokenSource};
