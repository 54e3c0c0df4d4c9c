use thiserror::Error;

/// Failure of a backend operation, classified the way the UI reports it.
///
/// Transport and status failures come from the HTTP layer, `Application`
/// from a 2xx body carrying `success: false`, and `Validation` from checks
/// the client makes before anything goes on the wire.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} reported failure: {message}")]
    Application {
        endpoint: &'static str,
        message: String,
    },

    #[error("malformed response from {endpoint}: {detail}")]
    Decode {
        endpoint: &'static str,
        detail: String,
    },

    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short text suitable for an inline message or alert.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } => "Could not reach the server.".to_string(),
            Self::Status { status, body, .. } if body.trim().is_empty() => {
                format!("Server error (HTTP {status}).")
            }
            Self::Status { body, .. } => body.trim().to_string(),
            Self::Application { message, .. } => message.clone(),
            Self::Decode { .. } => "Unexpected response from the server.".to_string(),
            Self::Validation(msg) => msg.clone(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_body_text() {
        let err = ApiError::Status {
            endpoint: "/merge-git-branch",
            status: 409,
            body: "  Merge failed due to conflicts.  ".into(),
        };
        assert_eq!(err.user_message(), "Merge failed due to conflicts.");
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn test_user_message_empty_status_body() {
        let err = ApiError::Status {
            endpoint: "/git-status",
            status: 500,
            body: String::new(),
        };
        assert_eq!(err.user_message(), "Server error (HTTP 500).");
    }

    #[test]
    fn test_validation_has_no_status() {
        let err = ApiError::validation("Message is busy");
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "Message is busy");
    }
}
