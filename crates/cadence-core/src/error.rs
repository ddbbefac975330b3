use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

impl CoreError {
    /// Short error code string for protocol layers.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::UnknownTimezone(_) => "UNKNOWN_TIMEZONE",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
