//! Session error taxonomy.

/// Everything a session or REST call can fail with.
///
/// The protocol-level variants map 1:1 to server error heads; the network
/// variants wrap the transports underneath.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    // -- network --
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out")]
    Timeout,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("reconnect retries exhausted")]
    RetryExhausted,

    // -- auth --
    #[error("login failed")]
    LoginFailed,
    #[error("bad login")]
    BadLogin,
    #[error("bad alias")]
    BadAlias,
    #[error("must be logged in")]
    MustLogin,
    #[error("proxy or VPN banned")]
    ProxyBanned,
    #[error("verification required")]
    VerificationRequired,

    // -- throttling --
    #[error("rate limited for {0} seconds")]
    RateLimited(u64),
    #[error("connection limited")]
    CLimited,
    #[error("flood warning")]
    FloodWarning,
    #[error("flood banned")]
    FloodBanned,
    #[error("restricted from sending")]
    Restricted,

    // -- content policy --
    #[error("message exceeds the maximum length of {0}")]
    MessageLengthExceeded(usize),
    #[error("message flagged as nonsense")]
    NonSenseWarning,
    #[error("message flagged as spam")]
    SpamWarning,
    #[error("message too short")]
    ShortWarning,

    // -- domain --
    #[error("not a group")]
    NotAGroup,
    #[error("no argument given")]
    NoArgument,
    #[error("invalid username")]
    InvalidUsername,
    #[error("offline message limit reached")]
    OfflineMessageLimit,
    #[error("premium subscription expired")]
    PremiumExpired,

    // -- sources --
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("wire: {0}")]
    Wire(#[from] ch_wire::WireError),
}
