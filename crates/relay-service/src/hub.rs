//! Connection hub.
//!
//! Entry point for transports: each accepted connection gets a
//! [`ConnectionActor`] plus a bounded outbound queue of [`ServerEvent`]s for the
//! transport to drain. The hub owns the registry and validator that every
//! connection actor shares.

use crate::actors::channel::ChannelSettings;
use crate::actors::connection::{ConnectionActor, ConnectionActorHandle};
use crate::actors::metrics::{ActorMetrics, ActorType};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::protocol::ServerEvent;
use crate::registry::ChannelRegistry;
use crate::state::StateValidator;

use common::types::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Hub settings derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub orphan_grace: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_capacity: usize,
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            orphan_grace: Duration::from_secs(config.orphan_grace_period_seconds),
            outbound_queue_capacity: config.outbound_queue_capacity,
        }
    }
}

/// Shared entry point for connections.
#[derive(Clone)]
pub struct ConnectionHub {
    registry: Arc<ChannelRegistry>,
    validator: Arc<StateValidator>,
    metrics: Arc<ActorMetrics>,
    outbound_queue_capacity: usize,
}

impl ConnectionHub {
    /// Build a hub from injected parts.
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        validator: Arc<StateValidator>,
        metrics: Arc<ActorMetrics>,
        outbound_queue_capacity: usize,
    ) -> Self {
        Self {
            registry,
            validator,
            metrics,
            outbound_queue_capacity: outbound_queue_capacity.max(1),
        }
    }

    /// Build a hub with its own registry, broadcaster and validator.
    #[must_use]
    pub fn with_settings(
        settings: HubSettings,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&metrics)));
        let registry = Arc::new(ChannelRegistry::new(
            ChannelSettings {
                orphan_grace: settings.orphan_grace,
            },
            broadcaster,
            Arc::clone(&metrics),
            cancel_token,
        ));

        info!(
            target: "relay.hub",
            orphan_grace_seconds = settings.orphan_grace.as_secs(),
            outbound_queue_capacity = settings.outbound_queue_capacity,
            "Connection hub initialized"
        );

        Self::new(
            registry,
            Arc::new(StateValidator::new()),
            metrics,
            settings.outbound_queue_capacity,
        )
    }

    /// Register a new connection.
    ///
    /// Returns the actor handle the transport feeds inbound events to, and the
    /// receiver it drains outbound events from.
    #[must_use]
    pub fn open_connection(&self) -> (ConnectionActorHandle, mpsc::Receiver<ServerEvent>) {
        let connection_id = ConnectionId::new();
        let (outbound, receiver) = mpsc::channel(self.outbound_queue_capacity);

        let (handle, task) = ConnectionActor::spawn(
            connection_id,
            outbound,
            Arc::clone(&self.registry),
            Arc::clone(&self.validator),
            self.registry.child_token(),
            Arc::clone(&self.metrics),
        );
        tokio::spawn(supervise_connection(
            connection_id,
            task,
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        ));

        debug!(
            target: "relay.hub",
            connection_id = %connection_id,
            "Connection opened"
        );

        (handle, receiver)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Spawn the periodic reaper for closed channels.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.registry).run_reaper(interval))
    }

    /// Cancel every connection and channel actor.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

/// Wait for a connection actor to exit and clean up after a panic.
///
/// A panicking actor never reaches its own exit bookkeeping, so the connection
/// count and provider index are settled here.
async fn supervise_connection(
    connection_id: ConnectionId,
    task: JoinHandle<()>,
    registry: Arc<ChannelRegistry>,
    metrics: Arc<ActorMetrics>,
) {
    match task.await {
        Ok(()) => {}
        Err(join_error) if join_error.is_panic() => {
            error!(
                target: "relay.hub",
                connection_id = %connection_id,
                error = ?join_error,
                "Connection actor panicked"
            );
            metrics.record_panic(ActorType::Connection);
            metrics.connection_closed();
            registry.forget_connection(connection_id).await;
        }
        Err(join_error) => {
            debug!(
                target: "relay.hub",
                connection_id = %connection_id,
                error = ?join_error,
                "Connection actor task cancelled"
            );
        }
    }
}
