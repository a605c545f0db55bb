use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The caller violated a precondition.
///
/// Always returned synchronously and never retried: the fix is on the
/// calling side (wrong argument shape, operation before readiness, a
/// privileged operation from the end-user side, double `connect`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct UsageError {
    /// Stable machine-readable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl UsageError {
    /// Construct a usage error with an explicit code.
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `connect()` was already called on this instance.
    pub fn already_connected(component: impl AsRef<str>) -> Self {
        Self::new(
            "already_connected",
            format!("connect() was already called on {}", component.as_ref()),
        )
    }

    /// An event name outside the component's vocabulary.
    pub fn unknown_event(event: impl AsRef<str>) -> Self {
        Self::new(
            "unknown_event",
            format!("'{}' is not a recognized event name", event.as_ref()),
        )
    }

    /// The operation needs a state that has not been reached yet.
    pub fn not_ready(action: impl AsRef<str>) -> Self {
        Self::new(
            "not_ready",
            format!("cannot run '{}' before the session is ready", action.as_ref()),
        )
    }

    /// The operation is only valid from the privileged (hub) side.
    pub fn privileged_operation(action: impl AsRef<str>) -> Self {
        Self::new(
            "privileged_operation",
            format!("'{}' is only available to hub users", action.as_ref()),
        )
    }

    /// An argument failed boundary validation.
    pub fn invalid_argument(name: impl AsRef<str>, reason: impl AsRef<str>) -> Self {
        Self::new(
            "invalid_argument",
            format!("invalid '{}': {}", name.as_ref(), reason.as_ref()),
        )
    }

    /// Neither a static credential nor a refresher was configured.
    pub fn missing_credential() -> Self {
        Self::new(
            "missing_credential",
            "either a credential or a credential refresher must be configured",
        )
    }

    /// A marker move was requested but no message has been observed.
    pub fn no_known_message() -> Self {
        Self::new(
            "no_known_message",
            "no message id given and no message has been observed in this room",
        )
    }
}

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The transport reported an error.
    Transport,
    /// Obtaining or refreshing the credential failed.
    CredentialRefresh,
    /// Joining the private user channel failed.
    UserChannel,
}

/// Transport-level failure reported through a connector `error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct ConnectionError {
    /// Failure category.
    pub kind: ConnectionErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ConnectionError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn credential_refresh(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::CredentialRefresh,
            message: message.into(),
        }
    }

    pub fn user_channel(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::UserChannel,
            message: message.into(),
        }
    }
}

/// Failure of a request sent over a channel, or of a join.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PushError {
    /// The server answered with an `error` outcome.
    #[error("request rejected by server: {reason}")]
    Rejected {
        /// Error payload exactly as the server sent it.
        reason: Value,
    },
    /// No answer within the channel deadline.
    #[error("request timed out")]
    Timeout,
    /// The channel was disconnected while the request was pending.
    #[error("channel closed before the request settled")]
    Closed,
    /// A payload did not decode into the expected record.
    #[error("malformed payload for '{context}': {message}")]
    Malformed {
        /// Event or operation the payload belonged to.
        context: String,
        /// Decoder message.
        message: String,
    },
}

impl PushError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "push_rejected",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
            Self::Malformed { .. } => "malformed_payload",
        }
    }

    pub fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keeps_usage_error_codes_stable() {
        assert_eq!(UsageError::already_connected("room:1").code, "already_connected");
        assert_eq!(UsageError::unknown_event("nope").code, "unknown_event");
        assert_eq!(UsageError::not_ready("room").code, "not_ready");
        assert_eq!(
            UsageError::privileged_operation("archive").code,
            "privileged_operation"
        );
        assert_eq!(UsageError::missing_credential().code, "missing_credential");
        assert_eq!(UsageError::no_known_message().code, "no_known_message");
    }

    #[test]
    fn usage_error_message_names_the_offending_input() {
        let err = UsageError::unknown_event("message_edited");
        assert!(err.to_string().contains("message_edited"));
    }

    #[test]
    fn push_error_codes_are_distinct() {
        let codes = [
            PushError::Rejected {
                reason: json!({"reason": "forbidden"}),
            }
            .code(),
            PushError::Timeout.code(),
            PushError::Closed.code(),
            PushError::malformed("message_posted", "missing field `id`").code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn connection_error_keeps_kind() {
        let err = ConnectionError::credential_refresh("token endpoint unreachable");
        assert_eq!(err.kind, ConnectionErrorKind::CredentialRefresh);
        assert_eq!(ConnectionError::transport("eof").kind, ConnectionErrorKind::Transport);
    }
}
