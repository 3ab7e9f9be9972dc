//! Error types shared by the MCP servers and their downstream clients.

use thiserror::Error;

/// Main error type for library code.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request could not be sent or its body could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote API answered with a non-success status
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Entity (project, task, tool, resource) does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Tool or prompt arguments are missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Webhook payload is missing fields its handler needs
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Studio project has no GitHub repository attached
    #[error("Project not connected to GitHub")]
    NotConnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Build an API error from a response status and raw body.
    ///
    /// GitHub and Studio both answer errors with `{"message": "..."}`; when the
    /// body has that shape only the message is kept.
    pub fn from_response(status: u16, body: String) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        Error::Api { status, message }
    }

    /// Whether the remote side reported 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Api { status: 404, .. })
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_extracts_message() {
        let err = Error::from_response(422, r#"{"message":"Validation Failed"}"#.to_string());
        assert_eq!(err.to_string(), "API error: 422 - Validation Failed");
    }

    #[test]
    fn test_from_response_keeps_plain_body() {
        let err = Error::from_response(500, "boom".to_string());
        assert_eq!(err.to_string(), "API error: 500 - boom");
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::from_response(404, "{}".to_string()).is_not_found());
        assert!(Error::NotFound("Task".to_string()).is_not_found());
        assert!(!Error::Config("x".to_string()).is_not_found());
    }
}
