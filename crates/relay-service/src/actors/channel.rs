//! `ChannelActor` - per-fingerprint actor that owns channel state.
//!
//! Each `ChannelActor`:
//! - Owns the merged state for one channel
//! - Tracks the provider of record and the consumer list
//! - Fans validated updates out to consumers through the [`Broadcaster`]
//!
//! Because every mutation is a message to this one task, updates to a channel
//! are applied and broadcast in arrival order, and a consumer that attaches
//! after an update is never sent that update.
//!
//! # Provider Disconnect Handling
//!
//! When the provider of record disconnects:
//! 1. The channel is marked orphaned; consumers stay attached
//! 2. Updates are rejected (there is no provider of record)
//! 3. A provider join within the grace period clears the mark
//! 4. Otherwise the actor exits and the registry reaps the entry

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::errors::RelayError;
use crate::fingerprint::ChannelFingerprint;
use crate::state::{ChannelState, StateDelta};

use super::messages::{ChannelMessage, ChannelSnapshot, ConnectionLink};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the channel mailbox.
const CHANNEL_MAILBOX_BUFFER: usize = 500;

/// How often an orphaned channel checks whether its grace period has run out.
const GRACE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a `ChannelActor`.
///
/// Every method fails with `RelayError::ChannelClosed` once the actor has exited.
#[derive(Clone, Debug)]
pub struct ChannelActorHandle {
    sender: mpsc::Sender<ChannelMessage>,
    instance_id: u64,
    mailbox: Arc<MailboxMonitor>,
}

impl ChannelActorHandle {
    /// Registry-assigned instance number; distinguishes successive actors for one fingerprint.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Make `connection_id` the provider of record. Returns the previous provider.
    pub async fn claim_provider(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionId>, RelayError> {
        self.request(|respond_to| ChannelMessage::ClaimProvider {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Attach a consumer. Returns the consumer count after the attach.
    pub async fn attach_consumer(&self, link: ConnectionLink) -> Result<usize, RelayError> {
        self.request(|respond_to| ChannelMessage::AttachConsumer { link, respond_to })
            .await
    }

    /// Detach a consumer. Returns whether it was attached.
    pub async fn detach_consumer(&self, connection_id: ConnectionId) -> Result<bool, RelayError> {
        self.request(|respond_to| ChannelMessage::DetachConsumer {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Release provider status. Returns whether the channel became orphaned.
    pub async fn release_provider(&self, connection_id: ConnectionId) -> Result<bool, RelayError> {
        self.request(|respond_to| ChannelMessage::ReleaseProvider {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Merge `delta` and broadcast it, if `connection_id` is the provider of record.
    pub async fn apply_update(
        &self,
        connection_id: ConnectionId,
        delta: StateDelta,
    ) -> Result<BroadcastReport, RelayError> {
        self.request(|respond_to| ChannelMessage::ApplyUpdate {
            connection_id,
            delta,
            respond_to,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<ChannelSnapshot, RelayError> {
        self.request(|respond_to| ChannelMessage::GetSnapshot { respond_to })
            .await
    }

    /// True once the actor has exited and dropped its mailbox.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChannelMessage,
    ) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if self.sender.send(build(tx)).await.is_err() {
            self.mailbox.record_rejected();
            return Err(RelayError::ChannelClosed);
        }
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }
}

/// Settings shared by every channel actor.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// How long an orphaned channel waits for a provider before closing.
    pub orphan_grace: Duration,
}

/// The channel actor implementation.
pub struct ChannelActor {
    fingerprint: ChannelFingerprint,
    receiver: mpsc::Receiver<ChannelMessage>,
    cancel_token: CancellationToken,
    state: ChannelState,
    provider: Option<ConnectionId>,
    /// In attach order; broadcast order follows it.
    consumers: Vec<ConnectionLink>,
    orphaned_since: Option<Instant>,
    settings: ChannelSettings,
    /// Set when the actor should exit after the current message.
    closing: bool,
    created_at: i64,
    updates_applied: u64,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl ChannelActor {
    /// Spawn a channel actor with `provider` already installed as provider of record.
    pub fn spawn(
        fingerprint: ChannelFingerprint,
        instance_id: u64,
        provider: ConnectionId,
        settings: ChannelSettings,
        cancel_token: CancellationToken,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<ActorMetrics>,
    ) -> (ChannelActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_MAILBOX_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Channel, fingerprint.short()));

        let actor = Self {
            fingerprint,
            receiver,
            cancel_token,
            state: ChannelState::default(),
            provider: Some(provider),
            consumers: Vec::new(),
            orphaned_since: None,
            settings,
            closing: false,
            created_at: chrono::Utc::now().timestamp(),
            updates_applied: 0,
            broadcaster,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ChannelActorHandle {
            sender,
            instance_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "relay.actor.channel", fields(channel = %self.fingerprint.short()))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.channel",
            channel = %self.fingerprint.short(),
            "ChannelActor started"
        );

        let mut grace_check = tokio::time::interval(GRACE_CHECK_INTERVAL);
        grace_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.channel",
                        channel = %self.fingerprint.short(),
                        "ChannelActor received cancellation signal"
                    );
                    break;
                }

                _ = grace_check.tick() => {
                    if self.orphan_grace_expired() {
                        info!(
                            target: "relay.actor.channel",
                            channel = %self.fingerprint.short(),
                            consumers = self.consumers.len(),
                            grace_seconds = self.settings.orphan_grace.as_secs(),
                            "Orphan grace period expired, closing channel"
                        );
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if self.closing {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "relay.actor.channel",
                                channel = %self.fingerprint.short(),
                                "ChannelActor mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        // Reject anything still queued; callers see ChannelClosed
        self.receiver.close();
        let mut discarded = 0usize;
        while self.receiver.try_recv().is_ok() {
            self.mailbox.record_dequeue();
            discarded += 1;
        }

        info!(
            target: "relay.actor.channel",
            channel = %self.fingerprint.short(),
            consumers = self.consumers.len(),
            updates_applied = self.updates_applied,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            discarded,
            "ChannelActor stopped"
        );
    }

    fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::ClaimProvider {
                connection_id,
                respond_to,
            } => {
                let previous = self.claim_provider(connection_id);
                let _ = respond_to.send(previous);
            }

            ChannelMessage::AttachConsumer { link, respond_to } => {
                self.consumers
                    .retain(|c| c.connection_id != link.connection_id);
                debug!(
                    target: "relay.actor.channel",
                    channel = %self.fingerprint.short(),
                    connection_id = %link.connection_id,
                    "Consumer attached"
                );
                self.consumers.push(link);
                let _ = respond_to.send(self.consumers.len());
            }

            ChannelMessage::DetachConsumer {
                connection_id,
                respond_to,
            } => {
                let before = self.consumers.len();
                self.consumers.retain(|c| c.connection_id != connection_id);
                let removed = self.consumers.len() != before;
                if removed {
                    debug!(
                        target: "relay.actor.channel",
                        channel = %self.fingerprint.short(),
                        connection_id = %connection_id,
                        "Consumer detached"
                    );
                }
                let _ = respond_to.send(removed);
            }

            ChannelMessage::ReleaseProvider {
                connection_id,
                respond_to,
            } => {
                let orphaned = self.release_provider(connection_id);
                let _ = respond_to.send(orphaned);
            }

            ChannelMessage::ApplyUpdate {
                connection_id,
                delta,
                respond_to,
            } => {
                let result = self.apply_update(connection_id, &delta);
                let _ = respond_to.send(result);
            }

            ChannelMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn claim_provider(&mut self, connection_id: ConnectionId) -> Option<ConnectionId> {
        let previous = self.provider.replace(connection_id);

        if self.orphaned_since.take().is_some() {
            info!(
                target: "relay.actor.channel",
                channel = %self.fingerprint.short(),
                connection_id = %connection_id,
                "Provider rejoined orphaned channel"
            );
        } else if let Some(previous) = previous.filter(|p| *p != connection_id) {
            info!(
                target: "relay.actor.channel",
                channel = %self.fingerprint.short(),
                previous = %previous,
                connection_id = %connection_id,
                "Provider replaced"
            );
        }

        previous
    }

    fn release_provider(&mut self, connection_id: ConnectionId) -> bool {
        if self.provider != Some(connection_id) {
            // Superseded provider; the current one keeps the channel alive
            return false;
        }

        self.provider = None;
        self.orphaned_since = Some(Instant::now());

        if self.settings.orphan_grace.is_zero() {
            info!(
                target: "relay.actor.channel",
                channel = %self.fingerprint.short(),
                "Provider disconnected, closing channel"
            );
            self.closing = true;
        } else {
            info!(
                target: "relay.actor.channel",
                channel = %self.fingerprint.short(),
                consumers = self.consumers.len(),
                grace_seconds = self.settings.orphan_grace.as_secs(),
                "Provider disconnected, channel orphaned"
            );
        }

        true
    }

    fn apply_update(
        &mut self,
        connection_id: ConnectionId,
        delta: &StateDelta,
    ) -> Result<BroadcastReport, RelayError> {
        if self.provider != Some(connection_id) {
            return Err(RelayError::NotAuthorized);
        }

        self.state.merge(delta);
        self.updates_applied += 1;

        let report = self
            .broadcaster
            .broadcast(&self.fingerprint, &self.consumers, delta);

        if !report.stale.is_empty() {
            self.consumers
                .retain(|c| !report.stale.contains(&c.connection_id));
            warn!(
                target: "relay.actor.channel",
                channel = %self.fingerprint.short(),
                removed = report.stale.len(),
                "Removed consumers with closed queues"
            );
        }

        Ok(report)
    }

    fn orphan_grace_expired(&self) -> bool {
        self.provider.is_none()
            && self
                .orphaned_since
                .is_some_and(|since| since.elapsed() >= self.settings.orphan_grace)
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            fingerprint: self.fingerprint.clone(),
            state: self.state,
            provider: self.provider,
            consumers: self.consumers.iter().map(|c| c.connection_id).collect(),
            orphaned: self.orphaned_since.is_some(),
            created_at: self.created_at,
            updates_applied: self.updates_applied,
        }
    }
}
