//! Error types for YantraIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// YantraIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error on the deployment socket
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// No device chosen, capability missing, or device not connected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command or deployment exceeded its deadline
    #[error("Timeout after {timeout_ms} ms waiting for '{action}'")]
    Timeout {
        /// Action that was awaiting a response
        action: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// A newer command took over the single response slot of the connection
    #[error("Response slot taken over by a newer command")]
    ResponseSlotReplaced,

    /// Binary transfer failed after the handshake
    #[error("Deployment error: {0}")]
    Deployment(String),

    /// Invalid console VM transition or cartridge failure
    #[error("Console error: {0}")]
    Console(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// True for errors that mean the link itself is gone
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Serial(_) | Error::WebSocket(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
