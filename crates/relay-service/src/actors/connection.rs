//! `ConnectionActor` - per-connection session actor.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one transport connection
//! - Runs the join/update session state machine
//! - Sends `joined`/`error` events to its own client through the outbound queue
//!
//! The transport delivers decoded events here in arrival order and drains the
//! outbound queue back to the socket. Channel actors hold a clone of the
//! outbound sender while the connection is attached as a consumer.
//!
//! # Lifecycle
//!
//! 1. Spawned by the hub when the transport accepts a connection
//! 2. Runs until the transport reports a disconnect or the hub shuts down
//! 3. On disconnect, releases its channel membership and exits

use crate::broadcast::BroadcastReport;
use crate::errors::RelayError;
use crate::fingerprint::ChannelFingerprint;
use crate::observability::metrics as prom;
use crate::protocol::{ClientEvent, ClientRole, JoinRequest, ServerEvent};
use crate::registry::ChannelRegistry;
use crate::state::StateValidator;

use super::messages::{ConnectionLink, ConnectionMessage, SessionState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ConnectionId;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_MAILBOX_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    connection_id: ConnectionId,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Deliver a decoded client event.
    pub async fn deliver(&self, event: ClientEvent) -> Result<(), RelayError> {
        self.send(ConnectionMessage::Inbound { event }).await
    }

    /// Report a frame that could not be decoded.
    pub async fn report_malformed(&self, error: RelayError) -> Result<(), RelayError> {
        self.send(ConnectionMessage::Malformed { error }).await
    }

    /// Report that the transport closed.
    pub async fn disconnect(&self) -> Result<(), RelayError> {
        self.send(ConnectionMessage::Disconnected).await
    }

    /// Current session state.
    pub async fn session(&self) -> Result<SessionState, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionMessage::GetSession { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    async fn send(&self, message: ConnectionMessage) -> Result<(), RelayError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_rejected();
            RelayError::Internal(format!("channel send failed: {e}"))
        })
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Child of the hub's token.
    cancel_token: CancellationToken,
    /// Events for this connection's client.
    outbound: mpsc::Sender<ServerEvent>,
    session: SessionState,
    registry: Arc<ChannelRegistry>,
    validator: Arc<StateValidator>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
        registry: Arc<ChannelRegistry>,
        validator: Arc<StateValidator>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_MAILBOX_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.to_string(),
        ));

        metrics.connection_opened();

        let actor = Self {
            connection_id,
            receiver,
            cancel_token,
            outbound,
            session: SessionState::Unjoined,
            registry,
            validator,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "relay.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.connection",
                        connection_id = %self.connection_id,
                        session = self.session.as_str(),
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if self.session == SessionState::Closed {
                                break;
                            }
                        }
                        None => {
                            // Every handle dropped without a disconnect
                            self.handle_disconnect().await;
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        debug!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "ConnectionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::Inbound { event } => {
                prom::record_message(event.name());
                match event {
                    ClientEvent::Join(request) => self.handle_join(request).await,
                    ClientEvent::Update(payload) => self.handle_update(payload).await,
                }
            }

            ConnectionMessage::Malformed { error } => {
                prom::record_message("malformed");
                debug!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    error = %error,
                    "Malformed frame"
                );
                self.report_error(&error).await;
            }

            ConnectionMessage::Disconnected => {
                self.handle_disconnect().await;
            }

            ConnectionMessage::GetSession { respond_to } => {
                let _ = respond_to.send(self.session.clone());
            }
        }
    }

    async fn handle_join(&mut self, request: JoinRequest) {
        let role = request.role();
        let fingerprint = request.credentials().fingerprint();

        let result = match role {
            ClientRole::Provider => self
                .registry
                .claim_provider(&fingerprint, self.connection_id)
                .await
                .map(|_| ()),
            ClientRole::Consumer => self
                .registry
                .attach_consumer(&fingerprint, self.link())
                .await
                .map(|_| ())
                .map_err(|e| match e {
                    // Unknown channel and wrong password look the same from here
                    RelayError::ChannelNotFound => RelayError::AuthFailure,
                    other => other,
                }),
        };

        if let Err(error) = result {
            debug!(
                target: "relay.actor.connection",
                connection_id = %self.connection_id,
                role = role.as_str(),
                channel = %fingerprint.short(),
                error = %error,
                "Join rejected"
            );
            self.report_error(&error).await;
            return;
        }

        let previous = std::mem::replace(
            &mut self.session,
            SessionState::Joined {
                role,
                fingerprint: fingerprint.clone(),
            },
        );

        // Release the old membership only after the new one is in place
        if let SessionState::Joined {
            role: previous_role,
            fingerprint: previous_fingerprint,
        } = previous
        {
            if previous_role != role || previous_fingerprint != fingerprint {
                self.leave(previous_role, &previous_fingerprint).await;
            }
        }

        info!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            role = role.as_str(),
            channel = %fingerprint.short(),
            "Joined channel"
        );

        self.emit(ServerEvent::Joined {
            channel_id: fingerprint,
        })
        .await;
    }

    async fn handle_update(&mut self, payload: Map<String, Value>) {
        let start = Instant::now();

        match self.apply_update(&payload).await {
            Ok(report) => {
                prom::record_update_latency(start.elapsed());
                debug!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Update applied"
                );
            }
            Err(error) => self.report_error(&error).await,
        }
    }

    async fn apply_update(
        &self,
        payload: &Map<String, Value>,
    ) -> Result<BroadcastReport, RelayError> {
        let channel = self
            .registry
            .find_by_provider(self.connection_id)
            .await
            .ok_or(RelayError::NotAuthorized)?;

        let delta = self.validator.validate(payload)?;

        match channel.apply_update(self.connection_id, delta).await {
            // Channel went away between lookup and apply
            Err(RelayError::ChannelClosed) => Err(RelayError::NotAuthorized),
            other => other,
        }
    }

    async fn handle_disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.session, SessionState::Closed);

        if let SessionState::Joined { role, fingerprint } = previous {
            self.leave(role, &fingerprint).await;
        }
        self.registry.forget_connection(self.connection_id).await;

        info!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            "Connection closed"
        );
    }

    async fn leave(&self, role: ClientRole, fingerprint: &ChannelFingerprint) {
        match role {
            ClientRole::Provider => {
                self.registry
                    .release_provider(fingerprint, self.connection_id)
                    .await;
            }
            ClientRole::Consumer => {
                self.registry
                    .remove_consumer(fingerprint, self.connection_id)
                    .await;
            }
        }
    }

    async fn report_error(&self, error: &RelayError) {
        prom::record_error(error.kind().as_str());
        if let RelayError::Internal(detail) = error {
            warn!(
                target: "relay.actor.connection",
                connection_id = %self.connection_id,
                error = %detail,
                "Internal error while handling client message"
            );
        }
        self.emit(ServerEvent::from_error(error)).await;
    }

    async fn emit(&self, event: ServerEvent) {
        let name = event.name();
        if self.outbound.send(event).await.is_err() {
            debug!(
                target: "relay.actor.connection",
                connection_id = %self.connection_id,
                event = name,
                "Outbound queue closed, dropping event"
            );
        }
    }

    fn link(&self) -> ConnectionLink {
        ConnectionLink {
            connection_id: self.connection_id,
            outbound: self.outbound.clone(),
        }
    }
}
