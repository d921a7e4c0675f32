use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// Reason an authentication handshake was rejected.
///
/// Derived from the gRPC status code where it is unambiguous, otherwise from
/// the server's error text (see [`crate::auth::classify_auth_failure`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    InvalidCredential,
    IpNotWhitelisted,
    ClientDisabled,
    Unauthenticated,
    Unclassified,
}

impl AuthFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailureKind::InvalidCredential => "invalid-credential",
            AuthFailureKind::IpNotWhitelisted => "ip-not-whitelisted",
            AuthFailureKind::ClientDisabled => "client-disabled",
            AuthFailureKind::Unauthenticated => "unauthenticated",
            AuthFailureKind::Unclassified => "unclassified",
        }
    }

    /// Operator-facing hint attached to the error message.
    pub fn guidance(&self) -> &'static str {
        match self {
            AuthFailureKind::InvalidCredential => {
                "invalid API key; verify the key with the server administrator"
            }
            AuthFailureKind::IpNotWhitelisted => {
                "IP address not whitelisted; ask the server administrator to whitelist your address \
                 (the server log shows the detected IP)"
            }
            AuthFailureKind::ClientDisabled => {
                "client is disabled; ask the server administrator to enable it"
            }
            AuthFailureKind::Unauthenticated => {
                "possible reasons: invalid API key, IP address not whitelisted, client disabled on server"
            }
            AuthFailureKind::Unclassified => "unrecognized authentication failure",
        }
    }
}

impl fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CRUD verb an [`ClientError::Operation`] was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Select,
    SelectStreaming,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Select => "SELECT",
            OperationKind::SelectStreaming => "SELECT streaming",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }

    /// Verb name as listed in `allowed_operations`.
    pub fn verb(&self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Select | OperationKind::SelectStreaming => "SELECT",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Arrow Flight server is not running at {location} ({message})")]
    ServerNotRunning { location: String, message: String },

    #[error("connection failed: {0}")]
    Transport(#[from] TransportError),

    #[error("authentication failed for client '{client_name}' [{kind}]: {}; original error: {message}", .kind.guidance())]
    Authentication {
        kind: AuthFailureKind,
        client_name: String,
        message: String,
    },

    #[error("not connected; call connect() first")]
    NotConnected,

    #[error("{operation} failed ({context}): {message}")]
    Operation {
        operation: OperationKind,
        context: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn operation(
        operation: OperationKind,
        context: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        ClientError::Operation {
            operation,
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Authentication failure kind, if this is an authentication error.
    pub fn auth_kind(&self) -> Option<AuthFailureKind> {
        match self {
            ClientError::Authentication { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_server_not_running(&self) -> bool {
        matches!(self, ClientError::ServerNotRunning { .. })
    }
}
