use parley_models::gateway::{CLOSE_AUTHENTICATION_FAILED, CLOSE_POLICY_VIOLATION};
use parley_models::ids::GroupId;
use thiserror::Error;

use crate::collab::DependencyError;

#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("no token supplied")]
    MissingToken,
    #[error("unknown or inactive session")]
    InvalidSession,
    #[error("session expired")]
    Expired,
    #[error("session store unavailable: {0}")]
    Unavailable(DependencyError),
    #[error("connection already authenticated")]
    AlreadyAuthenticated,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("too many concurrent connections")]
    ConnectionLimit,
    #[error("not a member of group {0}")]
    NotGroupMember(GroupId),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("message persistence failed: {0}")]
    Persistence(DependencyError),
}

impl GatewayError {
    /// Text sent to the client in an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication(AuthFailure::MissingToken) => {
                "Authentication token required".to_string()
            }
            Self::Authentication(AuthFailure::InvalidSession | AuthFailure::Expired) => {
                "Invalid or expired session".to_string()
            }
            Self::Authentication(AuthFailure::AlreadyAuthenticated) => {
                "Already authenticated".to_string()
            }
            Self::Authentication(AuthFailure::Unavailable(_) | AuthFailure::Closed) => {
                "Authentication failed".to_string()
            }
            Self::AuthenticationRequired => "Authentication required".to_string(),
            Self::ConnectionLimit => "Too many concurrent connections".to_string(),
            Self::NotGroupMember(_) => "Not a member of this group".to_string(),
            Self::Validation(message) => message.clone(),
            Self::RateLimited => "rate limited".to_string(),
            Self::Persistence(_) => "Failed to send message".to_string(),
        }
    }

    /// WebSocket close code for errors after which the connection cannot
    /// continue; `None` for errors reported in-band only.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Authentication(_) => Some(CLOSE_AUTHENTICATION_FAILED),
            Self::ConnectionLimit => Some(CLOSE_POLICY_VIOLATION),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_handshake_errors_close_the_connection() {
        assert_eq!(
            GatewayError::Authentication(AuthFailure::Expired).close_code(),
            Some(4001)
        );
        assert_eq!(
            GatewayError::Authentication(AuthFailure::MissingToken).close_code(),
            Some(4001)
        );
        assert_eq!(GatewayError::ConnectionLimit.close_code(), Some(1008));
        assert_eq!(GatewayError::RateLimited.close_code(), None);
        assert_eq!(
            GatewayError::NotGroupMember(GroupId::from("g")).close_code(),
            None
        );
    }

    #[test]
    fn persistence_failure_hides_details() {
        let err = GatewayError::Persistence(DependencyError::unavailable(
            "message repository",
            "disk full",
        ));
        assert_eq!(err.client_message(), "Failed to send message");
    }
}
