use thiserror::Error;

/// Error types that can occur when talking to a remote model deployment.
#[derive(Error, Debug)]
pub enum TrussError {
    /// Transport level failures: connection refused, timeouts, non-2xx status.
    #[error("HTTP Error: {0}")]
    HttpError(String),

    /// A wrapper for authentication/authorization errors.
    #[error("Auth Error: {0}")]
    AuthError(String),

    /// The deployment answered without the `model_output` field.
    #[error("Response is missing `model_output`. Raw response: '{raw_response}'")]
    MissingModelOutput { raw_response: String },

    /// Capability the deployment target does not provide.
    #[error("Not Implemented: {0}")]
    NotImplemented(String),

    /// Bytes in a streamed chunk were not valid for the response encoding.
    #[error("Decode Error ({encoding}): {message}")]
    Decode {
        encoding: &'static str,
        message: String,
    },

    /// The response declared a charset we do not know how to decode.
    #[error("Unknown response encoding: {0}")]
    UnknownEncoding(String),

    #[error("Config Error: {0}")]
    ConfigError(String),

    /// Handles JSON serialization and deserialization errors.
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Handles errors from parsing URLs.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Handles standard I/O errors.
    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<reqwest::Error> for TrussError {
    fn from(err: reqwest::Error) -> Self {
        TrussError::HttpError(err.to_string())
    }
}

impl From<http::Error> for TrussError {
    fn from(err: http::Error) -> Self {
        TrussError::HttpError(err.to_string())
    }
}

impl From<toml::de::Error> for TrussError {
    fn from(err: toml::de::Error) -> Self {
        TrussError::ConfigError(err.to_string())
    }
}
