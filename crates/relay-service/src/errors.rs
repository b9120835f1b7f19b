//! Relay error types.
//!
//! Every variant is recoverable. Client-caused errors are reported back to the
//! originating connection as an `error` event carrying [`RelayError::client_message`];
//! none of them closes the connection. Internal details are logged server-side
//! but never sent to clients.

use crate::state::StateField;
use thiserror::Error;

/// Relay error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Consumer join for credentials that match no live channel.
    #[error("Authentication failed")]
    AuthFailure,

    /// Registry lookup found no channel for the fingerprint.
    ///
    /// Surfaced to clients exactly like `AuthFailure` so that a wrong password
    /// cannot be told apart from a channel that does not exist yet.
    #[error("Channel not found")]
    ChannelNotFound,

    /// Update from a connection that is not the provider of record.
    #[error("Not authorized: connection is not a provider")]
    NotAuthorized,

    /// State payload carried a key outside the whitelist.
    #[error("Invalid field: {key}")]
    InvalidField { key: String },

    /// State payload carried a non-numeric or non-finite value for a known field.
    #[error("Invalid value for {field}")]
    InvalidValue { field: StateField },

    /// Inbound frame did not match any known message shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Channel actor has shut down (orphan grace expired or shutdown).
    #[error("Channel closed")]
    ChannelClosed,

    /// Internal error (actor mailbox failures and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy reported in metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailure,
    NotAuthorized,
    InvalidField,
    InvalidValue,
    Internal,
}

impl ErrorKind {
    /// Returns the kind as a bounded metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::InvalidField => "invalid_field",
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::Internal => "internal",
        }
    }
}

impl RelayError {
    /// Classify this error into the client-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::AuthFailure | RelayError::ChannelNotFound => ErrorKind::AuthFailure,
            RelayError::NotAuthorized => ErrorKind::NotAuthorized,
            RelayError::InvalidField { .. } => ErrorKind::InvalidField,
            RelayError::InvalidValue { .. } | RelayError::MalformedMessage(_) => {
                ErrorKind::InvalidValue
            }
            RelayError::ChannelClosed | RelayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::AuthFailure | RelayError::ChannelNotFound => {
                "ChannelId or Password incorrect".to_string()
            }
            RelayError::NotAuthorized => "Invalid update: not a provider".to_string(),
            RelayError::InvalidField { .. } => "Invalid key".to_string(),
            RelayError::InvalidValue { field } => format!("Invalid {} value", field.as_str()),
            RelayError::MalformedMessage(_) => "Invalid message".to_string(),
            RelayError::ChannelClosed | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}
