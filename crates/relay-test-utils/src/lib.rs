//! # Relay Test Utilities
//!
//! Shared test utilities for the relay service.
//!
//! - `client` - In-process test client speaking the wire protocol to a hub
//! - `fixtures` - Channel credentials and pre-configured hubs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let hub = TestHub::builder().build();
//!     let channel = TestChannel::new("lab1", "secret");
//!
//!     let mut provider = TestClient::connect(&hub);
//!     let mut consumer = TestClient::connect(&hub);
//!
//!     provider.join_provider(&channel).await.unwrap();
//!     consumer.join_consumer(&channel).await.unwrap();
//!     provider.update(serde_json::json!({"solar": 10})).await.unwrap();
//!
//!     assert_eq!(consumer.recv_update().await.unwrap().solar, Some(10.0));
//! }
//! ```

pub mod client;
pub mod fixtures;

// Re-export commonly used items
pub use client::*;
pub use fixtures::*;
