/// Result alias that carries the custom [`VibeatError`] type.
pub type Result<T> = std::result::Result<T, VibeatError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VibeatError {
    /// Free-form failure, mostly used for poisoned locks and worker faults.
    #[error("{0}")]
    Message(String),
    /// A caller handed the engine something it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A numeric parameter fell outside its documented range.
    #[error("{what} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown subdivision `{0}`")]
    UnknownSubdivision(String),
    /// A shared-settings payload decoded but lacks a required field.
    #[error("settings payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("compression failed: {0}")]
    Compression(String),
    /// The audio device could not be opened or driven.
    #[error("audio device error: {0}")]
    Device(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Base64(#[from] base64::DecodeError),
}

impl VibeatError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VibeatError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VibeatError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
