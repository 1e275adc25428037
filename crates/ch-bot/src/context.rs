//! Per-invocation handler context.

use crate::app::App;
use crate::store::Store;

/// What a handler gets alongside the event: the application handle, the
/// bot-wide store, and the store of the chat the event came from (absent
/// for events without a chat, and for private messages from anonymous
/// senders).
#[derive(Clone)]
pub struct Context {
    pub app: Option<App>,
    pub bot_store: Store,
    pub chat_store: Option<Store>,
}
