// rusty-chatango: Chatango client library and bot runtime.
//
// Facade crate: re-exports the wire codec, the session layer, and the
// bot runtime, and hosts the end-to-end integration suites under
// tests/integration/.

pub use ch_bot::{
    App, BotConfig, BotError, ChatFilter, CommandArgs, CommandHandler, ConfigError, Context,
    Dispatcher, Filter, FilterBox, Handler, MessageHandler, NoopPersistence, Persistence,
    RegexFilter, SqlitePersistence, Store, Stores, TypesHandler, UserFilter,
};
pub use ch_client::{
    Backoff, BackoffConfig, ClientError, Event, EventSink, Friend, FriendStatus, Group, Private,
    RestClient, SessionOptions, TokenSource, event_type,
};
pub use ch_wire as wire;

pub mod config {
    pub use ch_bot::config::{load_config, load_config_from_path, load_config_from_str};
}
