//! Error types for model description operations

use thiserror::Error;

/// Result type for model description operations
pub type Result<T> = std::result::Result<T, DescriptionError>;

/// Errors that can occur while building, validating, or (de)serializing a
/// model description
#[derive(Error, Debug)]
pub enum DescriptionError {
    /// The payload is not a structurally valid description
    #[error("{0}")]
    Parse(#[from] serde_yaml::Error),

    /// The description could not be encoded
    #[error("cannot encode description: {0}")]
    Encode(#[source] serde_yaml::Error),

    /// The payload parsed but carries a format version this build cannot read
    #[error("unsupported description version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The description parsed but violates a referential invariant
    #[error("invalid description: {0}")]
    Invalid(String),

    /// An agent binary version string could not be parsed
    #[error("invalid binary version {0:?}")]
    InvalidVersion(String),

    /// A charm locator could not be parsed
    #[error("invalid charm url {url:?}: {reason}")]
    InvalidCharmUrl { url: String, reason: String },
}

impl DescriptionError {
    /// True when the error came from the parse gate rather than from a
    /// structurally valid payload with unexpected content
    pub fn is_parse_error(&self) -> bool {
        matches!(self, DescriptionError::Parse(_))
    }
}
