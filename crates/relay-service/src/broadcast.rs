//! Update fan-out to consumers.
//!
//! Delivery never blocks the caller: each consumer has a bounded outbound
//! queue and a full queue drops the update for that consumer only. A closed
//! queue means the connection is gone; it is reported back so the channel can
//! forget it.

use crate::actors::messages::ConnectionLink;
use crate::actors::metrics::ActorMetrics;
use crate::fingerprint::ChannelFingerprint;
use crate::observability::metrics as prom;
use crate::protocol::ServerEvent;
use crate::state::StateDelta;
use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Consumers whose queue was full.
    pub dropped: usize,
    /// Consumers whose queue is closed.
    pub stale: Vec<ConnectionId>,
}

/// Fans state deltas out to a channel's consumers.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    metrics: Arc<ActorMetrics>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(metrics: Arc<ActorMetrics>) -> Self {
        Self { metrics }
    }

    /// Deliver `delta` as an `update` event to every consumer, in list order.
    pub fn broadcast(
        &self,
        fingerprint: &ChannelFingerprint,
        consumers: &[ConnectionLink],
        delta: &StateDelta,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for consumer in consumers {
            match consumer.outbound.try_send(ServerEvent::Update(*delta)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        target: "relay.broadcast",
                        channel = %fingerprint.short(),
                        connection_id = %consumer.connection_id,
                        "Consumer queue full, dropping update"
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        target: "relay.broadcast",
                        channel = %fingerprint.short(),
                        connection_id = %consumer.connection_id,
                        "Consumer queue closed"
                    );
                    report.stale.push(consumer.connection_id);
                }
            }
        }

        self.metrics.record_fanout(report.delivered, report.dropped);
        prom::record_broadcast("delivered", report.delivered);
        prom::record_broadcast("dropped", report.dropped);
        prom::record_broadcast("stale", report.stale.len());

        report
    }
}
