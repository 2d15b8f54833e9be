use thiserror::Error;

/// Failure talking to an external model service (decision-maker or vision).
///
/// The rendered message carries the HTTP status and transport details so that
/// [`crate::retry::is_transient`] can classify it by substring.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{service} is not configured: {reason}")]
    NotConfigured {
        service: &'static str,
        reason: String,
    },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: String,
        message: String,
    },

    #[error("{service} returned no content: {body}")]
    EmptyResponse { service: &'static str, body: String },
}

impl ServiceError {
    /// Build a transport error from a `reqwest` failure, keeping the source chain.
    pub fn from_reqwest(service: &'static str, err: &reqwest::Error) -> Self {
        let mut message = String::new();
        if err.is_timeout() {
            message.push_str("timed out: ");
        } else if err.is_connect() {
            message.push_str("connect error: ");
        }
        message.push_str(&error_chain(err));
        ServiceError::Transport { service, message }
    }
}

/// A tool call that breaks the registry contract and is never dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("missing required args {missing:?} for {tool}")]
    MissingArgs { tool: String, missing: Vec<String> },
}

/// Render an error and all of its sources as one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_mentions_status() {
        let err = ServiceError::Api {
            service: "decision-maker",
            status: "503 Service Unavailable".into(),
            message: "overloaded".into(),
        };
        assert_eq!(
            err.to_string(),
            "decision-maker API error (503 Service Unavailable): overloaded"
        );
    }

    #[test]
    fn test_contract_error_display() {
        let err = ContractError::MissingArgs {
            tool: "navigate".into(),
            missing: vec!["url".into()],
        };
        assert_eq!(err.to_string(), "missing required args [\"url\"] for navigate");
    }
}
