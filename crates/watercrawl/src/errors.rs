/// Top-level error type for the WaterCrawl client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaterCrawlError {
    /// Caller input was rejected before any request was sent.
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
    /// The service answered with a non-2xx status.
    #[error("API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },
    /// A bounded sub-operation exceeded its time budget.
    #[error("timeout error during {operation}: {message}")]
    Timeout { operation: String, message: String },
    /// Connection or stream I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The operation was abandoned because its abort handle fired.
    #[error("cancelled")]
    Cancelled,
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl WaterCrawlError {
    /// Creates a field-tagged validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an API error for an HTTP status.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for API errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<reqwest::Error> for WaterCrawlError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            WaterCrawlError::timeout("request", value.to_string())
        } else if value.is_decode() {
            WaterCrawlError::Decode(value.to_string())
        } else {
            WaterCrawlError::Transport(value.to_string())
        }
    }
}

/// Builds the API error for a non-2xx response body.
///
/// Prefers the JSON `error` field, then the raw body text, then a generic
/// `HTTP error N` message.
pub(crate) fn api_error_from_body(status_code: u16, body: &str) -> WaterCrawlError {
    let structured = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
        })
        .filter(|message| !message.is_empty());
    let message = match structured {
        Some(message) => message,
        None if !body.is_empty() => body.to_string(),
        None => format!("HTTP error {status_code}"),
    };
    WaterCrawlError::api(status_code, message)
}
