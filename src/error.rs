use thiserror::Error;

pub type Result<T> = std::result::Result<T, CastError>;

#[derive(Error, Debug)]
pub enum CastError {
    /// Adapter could not establish a session with the device.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Device rejected the media URL or content type.
    #[error("Load error: {0}")]
    Load(String),

    /// In-session command failed or timed out.
    #[error("Command error: {0}")]
    Command(String),

    /// Status polling lost the device.
    #[error("Status error: {0}")]
    Status(String),

    /// The bound device kind cannot perform this operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Another command is already in flight for this session.
    #[error("Session busy: a command is already pending")]
    Busy,

    /// A relay or cast was attempted with no device bound.
    #[error("No active session")]
    NoActiveSession,

    /// Malformed or unsatisfiable HTTP range.
    #[error("Range error: {0}")]
    Range(String),

    /// Unknown or expired media token.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
