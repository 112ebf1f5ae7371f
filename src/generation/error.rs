use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("missing required environment variable: {0}")]
    MissingApiKey(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("HTTP request to {provider} failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP status {status} from {provider}: {message}")]
    HttpStatus {
        provider: &'static str,
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("{provider} blocked the request: {reason}")]
    Blocked {
        provider: &'static str,
        reason: String,
    },
    #[error("{0} returned no text")]
    EmptyResponse(&'static str),
    #[error("unable to parse response from {provider}: {message}")]
    ResponseParse {
        provider: &'static str,
        message: String,
    },
}

impl GenerationError {
    pub fn http(provider: &'static str, source: reqwest::Error) -> Self {
        Self::Http { provider, source }
    }

    pub fn status(provider: &'static str, status: reqwest::StatusCode, message: String) -> Self {
        Self::HttpStatus {
            provider,
            status,
            message,
        }
    }

    pub fn response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::ResponseParse {
            provider,
            message: message.into(),
        }
    }

    /// Transport failures, 429 and 5xx responses may succeed on a later attempt.
    /// Everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::HttpStatus { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::MissingApiKey(_)
            | Self::Configuration(_)
            | Self::Blocked { .. }
            | Self::EmptyResponse(_)
            | Self::ResponseParse { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(GenerationError::status("gemini", StatusCode::TOO_MANY_REQUESTS, "quota".into())
            .is_transient());
        assert!(
            GenerationError::status("gemini", StatusCode::SERVICE_UNAVAILABLE, "busy".into())
                .is_transient()
        );
    }

    #[test]
    fn auth_and_content_errors_are_permanent() {
        assert!(!GenerationError::status("gemini", StatusCode::FORBIDDEN, "bad key".into())
            .is_transient());
        assert!(!GenerationError::MissingApiKey("GEMINI_API_KEY".into()).is_transient());
        assert!(!GenerationError::EmptyResponse("gemini").is_transient());
        assert!(!GenerationError::Blocked {
            provider: "gemini",
            reason: "SAFETY".into()
        }
        .is_transient());
    }

    #[test]
    fn status_error_display() {
        let err = GenerationError::status("gemini", StatusCode::BAD_REQUEST, "Bad prompt".into());
        assert_eq!(
            err.to_string(),
            "HTTP status 400 Bad Request from gemini: Bad prompt"
        );
    }
}
