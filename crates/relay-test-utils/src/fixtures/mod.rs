//! Pre-configured test data fixtures for relay testing.
//!
//! Provides:
//! - Channel credentials and the join frames built from them
//! - Hubs with short, test-friendly settings

use relay_service::actors::ActorMetrics;
use relay_service::fingerprint::ChannelFingerprint;
use relay_service::hub::{ConnectionHub, HubSettings};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Test channel credentials.
#[derive(Debug, Clone)]
pub struct TestChannel {
    pub channel_id: String,
    pub password: String,
}

impl TestChannel {
    #[must_use]
    pub fn new(channel_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            password: password.into(),
        }
    }

    /// Create a test channel with random credentials.
    #[must_use]
    pub fn random() -> Self {
        Self::new(
            format!("channel-{}", Uuid::new_v4()),
            format!("password-{}", Uuid::new_v4()),
        )
    }

    /// Same channel ID, different password.
    #[must_use]
    pub fn with_password(&self, password: impl Into<String>) -> Self {
        Self::new(self.channel_id.clone(), password)
    }

    #[must_use]
    pub fn fingerprint(&self) -> ChannelFingerprint {
        ChannelFingerprint::derive(&self.channel_id, &self.password)
    }

    /// `join` frame for the given client type (`provider` or `consumer`).
    #[must_use]
    pub fn join_frame(&self, client_type: &str) -> Value {
        json!({
            "event": "join",
            "data": {
                "clientType": client_type,
                "data": {
                    "channelId": self.channel_id,
                    "password": self.password,
                }
            }
        })
    }
}

/// Builder for hubs used in tests.
#[derive(Debug, Clone)]
pub struct TestHub {
    orphan_grace: Duration,
    outbound_queue_capacity: usize,
}

impl TestHub {
    /// Defaults: 30s orphan grace, 64-event outbound queues.
    #[must_use]
    pub fn builder() -> Self {
        Self {
            orphan_grace: Duration::from_secs(30),
            outbound_queue_capacity: 64,
        }
    }

    #[must_use]
    pub fn orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn build(self) -> ConnectionHub {
        ConnectionHub::with_settings(
            HubSettings {
                orphan_grace: self.orphan_grace,
                outbound_queue_capacity: self.outbound_queue_capacity,
            },
            ActorMetrics::new(),
            CancellationToken::new(),
        )
    }
}
