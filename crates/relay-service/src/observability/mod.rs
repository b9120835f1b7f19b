//! Observability for the relay service.
//!
//! # Privacy by Default
//!
//! Run loops use `#[instrument(skip_all)]` with explicit safe fields. Passwords
//! never reach logs; channels are logged by fingerprint prefix only, and metric
//! labels never carry fingerprints or connection IDs.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | none | Open client connections |
//! | `relay_channels_active` | Gauge | none | Live channels |
//! | `relay_messages_total` | Counter | `event` | Inbound client messages |
//! | `relay_errors_total` | Counter | `kind` | Errors reported to clients |
//! | `relay_broadcast_total` | Counter | `outcome` | Per-consumer fan-out outcomes |
//! | `relay_update_latency_seconds` | Histogram | none | Validate + merge + fan-out time |
//! | `relay_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
