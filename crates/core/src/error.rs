/// Result alias that carries the custom [`SketchpadError`] type.
pub type Result<T> = std::result::Result<T, SketchpadError>;

/// Common error type for the core crate.
///
/// Validation failures (unknown ids, bad names) are reported as `false`
/// returns by the owning component and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum SketchpadError {
    /// Free-form failure with a readable message.
    #[error("{0}")]
    Message(String),
    /// Structurally invalid input handed to a core operation.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The host audio subsystem could not be opened.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl SketchpadError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SketchpadError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SketchpadError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
