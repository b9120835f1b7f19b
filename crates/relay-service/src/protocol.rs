//! Wire protocol between clients and the hub.
//!
//! One JSON text frame per event, enveloped as `{"event": <name>, "data": <payload>}`:
//!
//! | Direction | Event | Payload |
//! |-----------|-------|---------|
//! | in  | `join`   | `{clientType: "provider"\|"consumer", data: {channelId, password}}` |
//! | out | `joined` | `{channelId}` (the derived fingerprint) |
//! | in  | `update` | `{solar?, battery?, consumption?}` (provider only) |
//! | out | `update` | same shape, partial |
//! | out | `error`  | `{error}` |

use crate::errors::RelayError;
use crate::fingerprint::ChannelFingerprint;
use crate::state::StateDelta;
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Role a connection declares when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Provider,
    Consumer,
}

impl ClientRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Provider => "provider",
            ClientRole::Consumer => "consumer",
        }
    }
}

/// Shared secret pair naming a channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCredentials {
    pub channel_id: String,
    pub password: SecretString,
}

impl JoinCredentials {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Derive the channel fingerprint for these credentials.
    #[must_use]
    pub fn fingerprint(&self) -> ChannelFingerprint {
        ChannelFingerprint::derive(&self.channel_id, self.password.expose_secret())
    }
}

/// Join request, discriminated by `clientType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "clientType", content = "data", rename_all = "lowercase")]
pub enum JoinRequest {
    Provider(JoinCredentials),
    Consumer(JoinCredentials),
}

impl JoinRequest {
    #[must_use]
    pub fn role(&self) -> ClientRole {
        match self {
            JoinRequest::Provider(_) => ClientRole::Provider,
            JoinRequest::Consumer(_) => ClientRole::Consumer,
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &JoinCredentials {
        match self {
            JoinRequest::Provider(creds) | JoinRequest::Consumer(creds) => creds,
        }
    }
}

/// Inbound event from a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Join(JoinRequest),
    /// Raw payload; checked by `StateValidator` before anything else sees it.
    Update(Map<String, Value>),
}

impl ClientEvent {
    /// Event name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Update(_) => "update",
        }
    }
}

/// Outbound event to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Joined {
        #[serde(rename = "channelId")]
        channel_id: ChannelFingerprint,
    },
    Update(StateDelta),
    Error { error: String },
}

impl ServerEvent {
    /// Build an `error` event from a relay error, using the client-safe message.
    #[must_use]
    pub fn from_error(err: &RelayError) -> Self {
        ServerEvent::Error {
            error: err.client_message(),
        }
    }

    /// Event name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Update(_) => "update",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if serialization fails.
    pub fn to_frame(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Internal(format!("failed to encode frame: {e}")))
    }
}

/// Inbound envelope; `data` is decoded once the event name is known.
#[derive(Deserialize)]
struct Envelope<'a> {
    event: String,
    #[serde(borrow)]
    data: &'a RawValue,
}

/// Decode an inbound JSON text frame.
///
/// # Errors
///
/// Returns `RelayError::MalformedMessage` for invalid JSON, unknown events,
/// unknown client types and missing fields.
pub fn decode_client_frame(text: &str) -> Result<ClientEvent, RelayError> {
    let envelope: Envelope<'_> = serde_json::from_str(text).map_err(malformed)?;

    match envelope.event.as_str() {
        "join" => serde_json::from_str(envelope.data.get())
            .map(ClientEvent::Join)
            .map_err(malformed),
        "update" => decode_update(envelope.data).map(ClientEvent::Update),
        other => Err(RelayError::MalformedMessage(format!(
            "unknown event `{other}`"
        ))),
    }
}

/// Decode `update` data one field at a time.
///
/// A value serde_json cannot hold (a number beyond the `f64` range) becomes
/// `null`, so validation rejects it against its own field.
fn decode_update(data: &RawValue) -> Result<Map<String, Value>, RelayError> {
    let fields: BTreeMap<String, &RawValue> =
        serde_json::from_str(data.get()).map_err(malformed)?;

    Ok(fields
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw.get()).unwrap_or(Value::Null);
            (key, value)
        })
        .collect())
}

fn malformed(err: serde_json::Error) -> RelayError {
    RelayError::MalformedMessage(err.to_string())
}
