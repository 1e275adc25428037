//! In-memory key/value stores handed to handlers through the context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// One namespace of key → JSON value. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.inner.write().unwrap().insert(key.to_owned(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().unwrap().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, map: HashMap<String, Value>) {
        *self.inner.write().unwrap() = map;
    }
}

/// The bot-wide store plus the per-chat namespaces.
///
/// Chat keys are group names, or for private conversations the peer's
/// lowercased username.
#[derive(Clone, Default)]
pub struct Stores {
    bot: Store,
    chats: Arc<RwLock<HashMap<String, Store>>>,
}

impl Stores {
    pub fn new() -> Self {
        Stores::default()
    }

    pub fn bot(&self) -> Store {
        self.bot.clone()
    }

    /// The store for one chat, created on first use.
    pub fn chat(&self, key: &str) -> Store {
        if let Some(store) = self.chats.read().unwrap().get(key) {
            return store.clone();
        }
        self.chats
            .write()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .clone()
    }

    pub fn del_chat(&self, key: &str) {
        self.chats.write().unwrap().remove(key);
    }

    pub fn chat_keys(&self) -> Vec<String> {
        self.chats.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_clones_share_data() {
        let a = Store::new();
        let b = a.clone();
        a.set("k", json!(42));
        assert_eq!(b.get("k"), Some(json!(42)));
        b.remove("k");
        assert!(a.is_empty());
    }

    #[test]
    fn chat_stores_are_namespaced() {
        let stores = Stores::new();
        stores.chat("room1").set("greeting", json!("hi"));
        assert_eq!(stores.chat("room1").get("greeting"), Some(json!("hi")));
        assert_eq!(stores.chat("room2").get("greeting"), None);
        stores.del_chat("room1");
        assert_eq!(stores.chat("room1").get("greeting"), None);
    }
}
