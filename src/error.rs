use thiserror::Error;

/// Failures raised by an [`ImageStore`](crate::store::ImageStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("could not prepare store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("record {0} has an empty content hash")]
    MissingHash(String),
}

/// Failures observed by the page side of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The page context has been invalidated; nothing was sent.
    #[error("page context is no longer valid")]
    Cancelled,

    /// The store host could not be started.
    #[error("store host activation failed: {0}")]
    Activation(String),

    /// The store host went away before replying.
    #[error("store host channel closed")]
    ChannelClosed,

    /// The store host replied with a failure.
    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("unexpected reply from store host")]
    UnexpectedReply,
}

/// Failures while fetching image bytes. These never leave the capture stage.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("non-success status {0}")]
    Status(u16),

    #[error("empty body")]
    Empty,
}

/// Failures from the browser session driving the crawl.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The browser session or window is gone. Treated as context invalidation.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("webdriver connection failed: {0}")]
    Connect(String),

    #[error("webdriver command failed: {0}")]
    Command(String),

    #[error("unexpected script result: {0}")]
    Script(String),
}

impl DriverError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not read cached images: {0}")]
    Source(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Top-level error for a harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
