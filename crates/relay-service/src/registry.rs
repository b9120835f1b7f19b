//! Channel registry.
//!
//! Maps fingerprints to live channel actors and indexes connections by the
//! channel they provide for. The registry is the only place channels are
//! created; only a provider join creates one.
//!
//! The provider index is a routing hint. The channel actor is authoritative on
//! who its provider of record is, so a stale index entry can never authorize an
//! update.
//!
//! Lock order is `channels` before `providers`; no lock is held across an
//! actor round trip.

use crate::actors::channel::{ChannelActor, ChannelActorHandle, ChannelSettings};
use crate::actors::messages::{ChannelSnapshot, ConnectionLink};
use crate::actors::metrics::{ActorMetrics, ActorType};
use crate::broadcast::Broadcaster;
use crate::errors::RelayError;
use crate::fingerprint::ChannelFingerprint;

use common::types::ConnectionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Attempts at claiming a channel that keeps closing underneath us.
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Per-channel task wait during shutdown.
const SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel entry owned by the registry.
struct ManagedChannel {
    handle: ChannelActorHandle,
    task_handle: JoinHandle<()>,
}

/// Registry of live channels.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelFingerprint, ManagedChannel>>,
    /// Connection -> channel it last claimed as provider.
    providers: RwLock<HashMap<ConnectionId, ChannelFingerprint>>,
    next_instance: AtomicU64,
    settings: ChannelSettings,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(
        settings: ChannelSettings,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
            settings,
            broadcaster,
            metrics,
            cancel_token,
        }
    }

    /// Make `connection_id` the provider of record for `fingerprint`, creating
    /// the channel if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the channel closed on every attempt.
    #[instrument(skip_all, fields(channel = %fingerprint.short(), connection_id = %connection_id))]
    pub async fn claim_provider(
        &self,
        fingerprint: &ChannelFingerprint,
        connection_id: ConnectionId,
    ) -> Result<ChannelActorHandle, RelayError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let existing = self.lookup(fingerprint).await;
            let handle = match existing {
                Some(handle) => handle,
                None => match self.create_channel(fingerprint, connection_id).await {
                    Created::New(handle) => {
                        self.index_provider(fingerprint, connection_id, None).await;
                        return Ok(handle);
                    }
                    Created::Existing(handle) => handle,
                },
            };

            match handle.claim_provider(connection_id).await {
                Ok(previous) => {
                    self.index_provider(fingerprint, connection_id, previous)
                        .await;
                    return Ok(handle);
                }
                Err(RelayError::ChannelClosed) => {
                    // Lost a race with orphan teardown; replace the dead entry
                    debug!(
                        target: "relay.registry",
                        channel = %fingerprint.short(),
                        "Channel closed during provider claim, retrying"
                    );
                    self.remove_instance(fingerprint, handle.instance_id()).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(RelayError::Internal(
            "channel kept closing during provider claim".to_string(),
        ))
    }

    /// Attach a consumer to an existing channel.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ChannelNotFound` if no live channel has this fingerprint.
    pub async fn attach_consumer(
        &self,
        fingerprint: &ChannelFingerprint,
        link: ConnectionLink,
    ) -> Result<ChannelActorHandle, RelayError> {
        let handle = self
            .lookup(fingerprint)
            .await
            .ok_or(RelayError::ChannelNotFound)?;

        match handle.attach_consumer(link).await {
            Ok(_) => Ok(handle),
            Err(RelayError::ChannelClosed) => {
                self.remove_instance(fingerprint, handle.instance_id()).await;
                Err(RelayError::ChannelNotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Channel this connection last claimed as provider, if it is still live.
    pub async fn find_by_provider(&self, connection_id: ConnectionId) -> Option<ChannelActorHandle> {
        let fingerprint = self.providers.read().await.get(&connection_id).cloned()?;
        self.lookup(&fingerprint).await
    }

    /// Detach a consumer. A missing or closed channel is not an error.
    pub async fn remove_consumer(&self, fingerprint: &ChannelFingerprint, connection_id: ConnectionId) {
        if let Some(handle) = self.lookup(fingerprint).await {
            let _ = handle.detach_consumer(connection_id).await;
        }
    }

    /// Release provider status held by `connection_id` on `fingerprint`.
    pub async fn release_provider(
        &self,
        fingerprint: &ChannelFingerprint,
        connection_id: ConnectionId,
    ) {
        {
            let mut providers = self.providers.write().await;
            if providers.get(&connection_id) == Some(fingerprint) {
                providers.remove(&connection_id);
            }
        }

        if let Some(handle) = self.lookup(fingerprint).await {
            let _ = handle.release_provider(connection_id).await;
        }
    }

    /// Drop any index entry for a closed connection.
    pub async fn forget_connection(&self, connection_id: ConnectionId) {
        self.providers.write().await.remove(&connection_id);
    }

    /// Snapshot of a live channel.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ChannelNotFound` if no live channel has this fingerprint.
    pub async fn snapshot(
        &self,
        fingerprint: &ChannelFingerprint,
    ) -> Result<ChannelSnapshot, RelayError> {
        let handle = self
            .lookup(fingerprint)
            .await
            .ok_or(RelayError::ChannelNotFound)?;
        handle
            .snapshot()
            .await
            .map_err(|_| RelayError::ChannelNotFound)
    }

    /// Number of registry entries (including channels not yet reaped).
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Remove entries whose actor has exited. Returns how many were removed.
    pub async fn reap_closed_channels(&self) -> usize {
        let finished: Vec<(ChannelFingerprint, ManagedChannel)> = {
            let mut channels = self.channels.write().await;
            let keys: Vec<ChannelFingerprint> = channels
                .iter()
                .filter(|(_, managed)| managed.task_handle.is_finished())
                .map(|(fingerprint, _)| fingerprint.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| channels.remove_entry(&key))
                .collect()
        };

        if finished.is_empty() {
            return 0;
        }

        {
            let channels = self.channels.read().await;
            self.providers
                .write()
                .await
                .retain(|_, fingerprint| channels.contains_key(fingerprint));
        }

        let removed = finished.len();
        for (fingerprint, managed) in finished {
            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "relay.registry",
                        channel = %fingerprint.short(),
                        "Reaped closed channel"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "relay.registry",
                            channel = %fingerprint.short(),
                            error = ?join_error,
                            "Channel actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Channel);
                    }
                }
            }
            self.metrics.channel_removed();
        }

        removed
    }

    /// Periodically reap closed channels until cancelled.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "relay.registry", "Reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = self.reap_closed_channels().await;
                    if reaped > 0 {
                        debug!(target: "relay.registry", reaped, "Reaper pass complete");
                    }
                }
            }
        }
    }

    /// Child token for actors whose lifetime ends with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Cancel every channel and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let drained: Vec<(ChannelFingerprint, ManagedChannel)> =
            self.channels.write().await.drain().collect();
        self.providers.write().await.clear();

        info!(
            target: "relay.registry",
            channel_count = drained.len(),
            "Shutting down channels"
        );

        for (fingerprint, managed) in drained {
            match tokio::time::timeout(SHUTDOWN_TASK_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.registry",
                        channel = %fingerprint.short(),
                        error = ?e,
                        "Channel task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.registry",
                        channel = %fingerprint.short(),
                        "Channel shutdown timed out"
                    );
                }
            }
            self.metrics.channel_removed();
        }
    }

    async fn lookup(&self, fingerprint: &ChannelFingerprint) -> Option<ChannelActorHandle> {
        self.channels
            .read()
            .await
            .get(fingerprint)
            .map(|managed| managed.handle.clone())
    }

    async fn create_channel(
        &self,
        fingerprint: &ChannelFingerprint,
        provider: ConnectionId,
    ) -> Created {
        let mut channels = self.channels.write().await;

        // Another provider may have created it since our read
        if let Some(managed) = channels.get(fingerprint) {
            return Created::Existing(managed.handle.clone());
        }

        let instance_id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (handle, task_handle) = ChannelActor::spawn(
            fingerprint.clone(),
            instance_id,
            provider,
            self.settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.metrics),
        );

        channels.insert(
            fingerprint.clone(),
            ManagedChannel {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.channel_created();

        info!(
            target: "relay.registry",
            channel = %fingerprint.short(),
            instance_id,
            "Channel created"
        );

        Created::New(handle)
    }

    async fn index_provider(
        &self,
        fingerprint: &ChannelFingerprint,
        connection_id: ConnectionId,
        previous: Option<ConnectionId>,
    ) {
        let mut providers = self.providers.write().await;
        if let Some(previous) = previous.filter(|p| *p != connection_id) {
            if providers.get(&previous) == Some(fingerprint) {
                providers.remove(&previous);
            }
        }
        providers.insert(connection_id, fingerprint.clone());
    }

    async fn remove_instance(&self, fingerprint: &ChannelFingerprint, instance_id: u64) {
        let mut channels = self.channels.write().await;
        if channels
            .get(fingerprint)
            .is_some_and(|managed| managed.handle.instance_id() == instance_id)
        {
            channels.remove(fingerprint);
            self.metrics.channel_removed();
        }
    }
}

enum Created {
    New(ChannelActorHandle),
    Existing(ChannelActorHandle),
}
