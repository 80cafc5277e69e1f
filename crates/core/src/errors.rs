use thiserror::Error;

/// Failures of the reply-generation collaborator. The core never raises these
/// itself; they pass through it to the event handler, which turns them into
/// user-facing text via [`to_display_error`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("provider returned an empty reply")]
    EmptyResponse,
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
    #[error("reply generator is not configured: {0}")]
    Unconfigured(String),
}

impl GenerationError {
    /// Whether a provider client may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::RateLimited { .. } | Self::Transport(_) | Self::Timeout { .. } => true,
            Self::EmptyResponse | Self::Decode(_) | Self::Unconfigured(_) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayError {
    pub message: String,
}

impl DisplayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn fallback_text(&self) -> String {
        format!("Sorry, I couldn't generate a response. {}", self.message)
    }
}

pub fn to_display_error(error: &GenerationError) -> DisplayError {
    let message = match error {
        GenerationError::Http { status: 401 | 403, .. } => {
            "The AI provider rejected the bot's credentials. Ask an admin to check the API key."
        }
        GenerationError::Http { status: 429, .. } | GenerationError::RateLimited { .. } => {
            "The AI provider is rate limiting requests right now. Please try again in a moment."
        }
        GenerationError::Http { status, .. } if *status >= 500 => {
            "The AI provider is having trouble right now. Please try again shortly."
        }
        GenerationError::Http { .. } => "The AI provider could not process this request.",
        GenerationError::Transport(_) => "I couldn't reach the AI provider. Please try again.",
        GenerationError::Timeout { .. } => {
            "The AI provider took too long to answer. Please try again."
        }
        GenerationError::EmptyResponse => "The AI provider returned an empty reply.",
        GenerationError::Decode(_) => "The AI provider sent a response I couldn't read.",
        GenerationError::Unconfigured(_) => {
            "The AI provider is not configured. Ask an admin to check the bot settings."
        }
    };

    DisplayError::new(message)
}

impl From<&GenerationError> for DisplayError {
    fn from(error: &GenerationError) -> Self {
        to_display_error(error)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{to_display_error, GenerationError};

    #[test]
    fn credential_failures_point_at_the_api_key() {
        let display = to_display_error(&GenerationError::Http {
            status: 401,
            body: "invalid x-api-key".to_owned(),
        });

        assert!(display.message.contains("API key"));
        assert!(!display.message.contains("invalid x-api-key"));
    }

    #[test]
    fn rate_limits_map_to_the_same_message_regardless_of_shape() {
        let from_status =
            to_display_error(&GenerationError::Http { status: 429, body: String::new() });
        let from_variant = to_display_error(&GenerationError::RateLimited { retry_after_secs: None });

        assert_eq!(from_status, from_variant);
    }

    #[test]
    fn server_errors_are_retryable_but_client_errors_are_not() {
        assert!(GenerationError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!GenerationError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(GenerationError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(!GenerationError::EmptyResponse.is_retryable());
    }

    #[test]
    fn fallback_text_wraps_the_display_message() {
        let display = to_display_error(&GenerationError::Transport("connection reset".to_owned()));

        assert_eq!(
            display.fallback_text(),
            "Sorry, I couldn't generate a response. I couldn't reach the AI provider. Please try again."
        );
    }
}
