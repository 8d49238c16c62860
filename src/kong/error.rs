//! Errors returned by the Kong Admin API client.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when talking to the Kong Admin API.
#[derive(Debug, Error)]
pub enum KongError {
    /// Kong answered with a non-success status code.
    #[error("Kong Admin API returned {status}: {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request never produced a response (connection, TLS, timeout).
    #[error("Kong Admin API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the expected entity shape.
    #[error("Unexpected Kong Admin API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The client could not be built from the provider configuration.
    #[error("Invalid Kong client configuration: {0}")]
    InvalidConfig(String),
}

impl KongError {
    /// The HTTP status code, for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the error is a 404 from Kong.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Build an [`KongError::Api`] from a status code and raw response body.
    ///
    /// Kong reports failures as `{"message": "..."}`, optionally with a
    /// `fields` object for schema violations. Both are folded into the
    /// message; bodies that are not JSON are kept verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
            fields: Option<serde_json::Value>,
        }

        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                message: Some(message),
                fields: Some(fields),
            }) => format!("{} {}", message, fields),
            Ok(ErrorBody {
                message: Some(message),
                fields: None,
            }) => message,
            _ if body.trim().is_empty() => "empty response body".to_string(),
            _ => body.trim().to_string(),
        };

        Self::Api { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_uses_kong_message() {
        let err = KongError::from_response(404, r#"{"message":"Not found"}"#);
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Kong Admin API returned 404: Not found"
        );
    }

    #[test]
    fn test_from_response_includes_schema_violation_fields() {
        let err = KongError::from_response(
            400,
            r#"{"message":"schema violation (host: required field missing)","name":"schema violation","fields":{"host":"required field missing"}}"#,
        );
        let text = err.to_string();
        assert!(text.contains("schema violation"));
        assert!(text.contains("required field missing"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_response_non_json_body() {
        let err = KongError::from_response(502, "Bad Gateway\n");
        assert_eq!(err.to_string(), "Kong Admin API returned 502: Bad Gateway");

        let err = KongError::from_response(500, "");
        assert_eq!(
            err.to_string(),
            "Kong Admin API returned 500: empty response body"
        );
    }

    #[test]
    fn test_invalid_config_has_no_status() {
        let err = KongError::InvalidConfig("bad header".to_string());
        assert_eq!(err.status(), None);
    }
}
