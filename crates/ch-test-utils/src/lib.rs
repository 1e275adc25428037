// ch-test-utils: scripted mock Chatango server and test sinks.

mod script_server;
mod sink;

pub use script_server::{ScriptServer, Step, group_auth_prelude, quiet_history_tail};
pub use sink::{ChannelSink, event_channel, wait_for_kind};
