//! Per-session options.

use crate::backoff::BackoffConfig;

/// Identity and styling a session is constructed with.
///
/// With an empty `username` the session joins anonymously; with a
/// `username` but empty `password` it takes the name as a temporary
/// alias.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub username: String,
    pub password: String,
    /// Display name used while not logged in.
    pub anon_name: String,
    pub name_color: String,
    pub text_color: String,
    pub text_font: String,
    pub text_size: u8,
    /// Client-chosen session id; empty lets the server assign one.
    pub session_id: String,
    /// Turn the message background on once premium status is known.
    pub enable_bg: bool,
    pub reconnect: BackoffConfig,
    /// Endpoint override; `None` derives the URL from the group name (or
    /// uses the PM endpoint). Tests point this at a local server.
    pub server_url: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            username: String::new(),
            password: String::new(),
            anon_name: "anon0001".to_owned(),
            name_color: "000".to_owned(),
            text_color: "000".to_owned(),
            text_font: "1".to_owned(),
            text_size: 11,
            session_id: String::new(),
            enable_bg: false,
            reconnect: BackoffConfig::default(),
            server_url: None,
        }
    }
}
