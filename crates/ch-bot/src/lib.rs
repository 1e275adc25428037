// ch-bot: bot runtime on top of the session layer.
//
// Applications register handlers (commands, message hooks, type masks),
// the dispatcher walks them per event with per-chat data contexts and
// panic isolation, and the App orchestrates session lifecycles and
// persistence.

pub mod app;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod filter;
pub mod handler;
pub mod persist;
pub mod store;

pub use app::App;
pub use config::{BotConfig, ConfigError};
pub use context::Context;
pub use dispatch::Dispatcher;
pub use filter::{ChatFilter, Filter, FilterBox, RegexFilter, UserFilter};
pub use handler::{CommandArgs, CommandHandler, Handler, MessageHandler, TypesHandler};
pub use persist::{NoopPersistence, Persistence, SqlitePersistence};
pub use store::{Store, Stores};

/// Errors out of the bot runtime.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("client: {0}")]
    Client(#[from] ch_client::ClientError),
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
