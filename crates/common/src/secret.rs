//! Secret types for keeping channel passwords out of logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace names the same
//! types. `SecretString` redacts itself in `Debug`, which means a struct that
//! derives `Debug` and holds a password can be passed to `tracing` fields
//! without leaking it.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     channel_id: String,
//!     password: SecretString,
//! }
//!
//! let creds = Credentials {
//!     channel_id: "lab1".to_string(),
//!     password: SecretString::from("secret"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("\"secret\""));
//! assert_eq!(creds.password.expose_secret(), "secret");
//! ```
//!
//! With the `serde` feature of `secrecy` enabled (workspace default), a
//! `SecretString` deserializes directly from a JSON string.

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("password123");
        assert_eq!(secret.expose_secret(), "password123");
    }

    #[test]
    fn test_deserialized_password_is_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct JoinData {
            channel_id: String,
            password: SecretString,
        }

        let json = r#"{"channelId": "lab1", "password": "my-secret-value"}"#;
        let data: JoinData = serde_json::from_str(json).expect("deserialize");

        assert_eq!(data.password.expose_secret(), "my-secret-value");

        let debug = format!("{data:?}");
        assert!(debug.contains("lab1"));
        assert!(!debug.contains("my-secret-value"));
    }
}
