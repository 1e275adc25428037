//! Bot configuration loading.
//!
//! TOML is the sole config source. Default config path:
//! `/etc/rusty-chatango/bot.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `[bot]` with at least one entry in `groups`
//!
//! Credentials are optional: without them the bot joins anonymously and
//! the PM endpoint stays disabled.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ch_client::SessionOptions;

/// Validated bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub schema_version: u32,
    pub username: String,
    pub password: String,
    pub anon_name: String,
    pub prefix: String,
    pub groups: Vec<String>,
    pub name_color: String,
    pub text_color: String,
    pub text_font: String,
    pub text_size: u8,
    pub session_id: String,
    pub enable_bg: bool,
    pub enable_pm: bool,
    /// Skippable for offline/test runs where the REST layer is absent.
    pub validate_groups: bool,
    pub persistence: Option<PersistenceConfig>,
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub sqlite_path: String,
    pub snapshot_interval: Duration,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    bot: Option<RawBotSection>,
    style: Option<RawStyleSection>,
    session: Option<RawSessionSection>,
    persistence: Option<RawPersistenceSection>,
}

#[derive(Debug, Deserialize)]
struct RawBotSection {
    username: Option<String>,
    password: Option<String>,
    anon_name: Option<String>,
    prefix: Option<String>,
    groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawStyleSection {
    name_color: Option<String>,
    text_color: Option<String>,
    text_font: Option<String>,
    text_size: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawSessionSection {
    session_id: Option<String>,
    enable_bg: Option<bool>,
    enable_pm: Option<bool>,
    validate_groups: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawPersistenceSection {
    sqlite_path: Option<String>,
    snapshot_interval_mins: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<BotConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load config from the default path `/etc/rusty-chatango/bot.toml`.
pub fn load_config() -> Result<BotConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/rusty-chatango/bot.toml"))
}

/// Load config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<BotConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let bot = raw
        .bot
        .ok_or_else(|| ConfigError::MissingField("bot".to_owned()))?;
    let groups = bot
        .groups
        .ok_or_else(|| ConfigError::MissingField("bot.groups".to_owned()))?;
    if groups.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one entry in bot.groups is required".to_owned(),
        ));
    }

    let username = bot.username.unwrap_or_default().to_lowercase();
    let password = bot.password.unwrap_or_default();
    if !password.is_empty() && username.is_empty() {
        return Err(ConfigError::InvalidValue(
            "bot.password set without bot.username".to_owned(),
        ));
    }

    let style = raw.style;
    let (name_color, text_color, text_font, text_size) = match style {
        Some(s) => (
            s.name_color.unwrap_or_else(|| "000".to_owned()),
            s.text_color.unwrap_or_else(|| "000".to_owned()),
            s.text_font.unwrap_or_else(|| "1".to_owned()),
            s.text_size.unwrap_or(11),
        ),
        None => ("000".to_owned(), "000".to_owned(), "1".to_owned(), 11),
    };
    if !(9..=22).contains(&text_size) {
        return Err(ConfigError::InvalidValue(format!(
            "style.text_size must be in 9..=22, got {text_size}"
        )));
    }

    let session = raw.session;
    let (session_id, enable_bg, enable_pm, validate_groups) = match session {
        Some(s) => (
            s.session_id.unwrap_or_default(),
            s.enable_bg.unwrap_or(false),
            s.enable_pm.unwrap_or(false),
            s.validate_groups.unwrap_or(true),
        ),
        None => (String::new(), false, false, true),
    };
    if enable_pm && (username.is_empty() || password.is_empty()) {
        return Err(ConfigError::InvalidValue(
            "session.enable_pm requires bot.username and bot.password".to_owned(),
        ));
    }

    let persistence = match raw.persistence {
        Some(p) => {
            let sqlite_path = p
                .sqlite_path
                .ok_or_else(|| ConfigError::MissingField("persistence.sqlite_path".to_owned()))?;
            Some(PersistenceConfig {
                sqlite_path,
                snapshot_interval: Duration::from_secs(
                    p.snapshot_interval_mins.unwrap_or(30).max(30) * 60,
                ),
            })
        }
        None => None,
    };

    Ok(BotConfig {
        schema_version,
        username,
        password,
        anon_name: bot.anon_name.unwrap_or_else(|| "anon0001".to_owned()),
        prefix: bot.prefix.unwrap_or_else(|| "!".to_owned()),
        groups: groups.into_iter().map(|g| g.to_lowercase()).collect(),
        name_color,
        text_color,
        text_font,
        text_size,
        session_id,
        enable_bg,
        enable_pm,
        validate_groups,
        persistence,
    })
}

impl BotConfig {
    /// The per-session options this config describes.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            username: self.username.clone(),
            password: self.password.clone(),
            anon_name: self.anon_name.clone(),
            name_color: self.name_color.clone(),
            text_color: self.text_color.clone(),
            text_font: self.text_font.clone(),
            text_size: self.text_size,
            session_id: self.session_id.clone(),
            enable_bg: self.enable_bg,
            ..SessionOptions::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
