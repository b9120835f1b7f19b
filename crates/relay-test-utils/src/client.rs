//! In-process test client.
//!
//! Speaks the JSON wire protocol to a [`ConnectionHub`] without a socket:
//! frames are encoded, decoded with the real decoder, and delivered to the
//! connection actor exactly as the WebSocket transport would.

use crate::fixtures::TestChannel;
use anyhow::{anyhow, bail, Result};
use common::types::ConnectionId;
use relay_service::actors::{ConnectionActorHandle, SessionState};
use relay_service::fingerprint::ChannelFingerprint;
use relay_service::hub::ConnectionHub;
use relay_service::protocol::{decode_client_frame, ServerEvent};
use relay_service::state::StateDelta;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `recv` waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `expect_silence` listens.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(100);

/// A connected test client.
pub struct TestClient {
    handle: ConnectionActorHandle,
    events: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    /// Open a connection on the hub.
    #[must_use]
    pub fn connect(hub: &ConnectionHub) -> Self {
        let (handle, events) = hub.open_connection();
        Self { handle, events }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    /// Send a raw text frame.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        match decode_client_frame(text) {
            Ok(event) => self.handle.deliver(event).await?,
            Err(error) => self.handle.report_malformed(error).await?,
        }
        Ok(())
    }

    /// Send a JSON frame.
    pub async fn send(&self, frame: &Value) -> Result<()> {
        self.send_text(&frame.to_string()).await
    }

    /// Join as provider and return the reply.
    pub async fn join_provider(&mut self, channel: &TestChannel) -> Result<ServerEvent> {
        self.send(&channel.join_frame("provider")).await?;
        self.recv().await
    }

    /// Join as consumer and return the reply.
    pub async fn join_consumer(&mut self, channel: &TestChannel) -> Result<ServerEvent> {
        self.send(&channel.join_frame("consumer")).await?;
        self.recv().await
    }

    /// Join as provider and fail unless the reply is `joined`.
    pub async fn joined_provider(&mut self, channel: &TestChannel) -> Result<ChannelFingerprint> {
        expect_joined(self.join_provider(channel).await?)
    }

    /// Join as consumer and fail unless the reply is `joined`.
    pub async fn joined_consumer(&mut self, channel: &TestChannel) -> Result<ChannelFingerprint> {
        expect_joined(self.join_consumer(channel).await?)
    }

    /// Send an `update` frame with the given payload.
    pub async fn update(&self, payload: Value) -> Result<()> {
        self.send(&json!({"event": "update", "data": payload})).await
    }

    /// Next event, or an error after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Result<ServerEvent> {
        tokio::time::timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for event"))?
            .ok_or_else(|| anyhow!("outbound queue closed"))
    }

    /// Next event, which must be an `update`.
    pub async fn recv_update(&mut self) -> Result<StateDelta> {
        match self.recv().await? {
            ServerEvent::Update(delta) => Ok(delta),
            other => bail!("expected update, got {other:?}"),
        }
    }

    /// Next event, which must be an `error`; returns its message.
    pub async fn recv_error(&mut self) -> Result<String> {
        match self.recv().await? {
            ServerEvent::Error { error } => Ok(error),
            other => bail!("expected error, got {other:?}"),
        }
    }

    /// Fail if any event arrives within [`SILENCE_WINDOW`].
    pub async fn expect_silence(&mut self) -> Result<()> {
        match tokio::time::timeout(SILENCE_WINDOW, self.events.recv()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(event)) => bail!("expected no event, got {event:?}"),
        }
    }

    /// Current session state of the connection actor.
    pub async fn session(&self) -> Result<SessionState> {
        Ok(self.handle.session().await?)
    }

    /// Report a transport close.
    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.handle.disconnect().await?)
    }

    /// Disconnect and wait until the connection has fully left its channel.
    ///
    /// The outbound queue closes once the connection actor and every channel
    /// holding it as a consumer have dropped their senders.
    pub async fn close(mut self) -> Result<()> {
        self.disconnect().await?;
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.events.recv().await.is_some() {}
        })
        .await
        .map_err(|_| anyhow!("connection did not close"))
    }
}

fn expect_joined(event: ServerEvent) -> Result<ChannelFingerprint> {
    match event {
        ServerEvent::Joined { channel_id } => Ok(channel_id),
        other => bail!("expected joined, got {other:?}"),
    }
}
