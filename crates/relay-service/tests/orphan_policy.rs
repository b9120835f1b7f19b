//! Provider loss: orphaning, rejoin within the grace period, and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use relay_service::protocol::ServerEvent;
use relay_service::state::ChannelState;
use relay_test_utils::{TestChannel, TestClient, TestHub};
use serde_json::json;
use std::time::Duration;

const GRACE: Duration = Duration::from_secs(30);

/// Let actors observe an `advance`.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_provider_disconnect_orphans_channel() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);
    let mut late = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    provider.update(json!({"solar": 2})).await.unwrap();
    consumer.recv_update().await.unwrap();

    provider.close().await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert!(snapshot.orphaned);
    assert_eq!(snapshot.provider, None);
    assert_eq!(snapshot.consumers, vec![consumer.connection_id()]);

    // Consumers can still join while the channel waits for its provider
    late.joined_consumer(&channel).await.unwrap();

    // Nobody may update an orphaned channel
    consumer.update(json!({"solar": 5})).await.unwrap();
    assert_eq!(
        consumer.recv_error().await.unwrap(),
        "Invalid update: not a provider"
    );
    late.expect_silence().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_provider_rejoin_within_grace_resumes_channel() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    provider.update(json!({"battery": 40})).await.unwrap();
    consumer.recv_update().await.unwrap();
    provider.close().await.unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    settle().await;

    let mut returning = TestClient::connect(&hub);
    assert_eq!(
        returning.joined_provider(&channel).await.unwrap(),
        fingerprint
    );

    // Past the first deadline the channel is still alive
    tokio::time::advance(Duration::from_secs(20)).await;
    settle().await;

    returning.update(json!({"solar": 1})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().solar, Some(1.0));

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert!(!snapshot.orphaned);
    assert_eq!(
        snapshot.state,
        ChannelState {
            solar: Some(1.0),
            battery: Some(40.0),
            consumption: None,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_channel_torn_down_after_grace() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    provider.update(json!({"consumption": 3})).await.unwrap();
    consumer.recv_update().await.unwrap();
    provider.close().await.unwrap();

    tokio::time::advance(GRACE + Duration::from_secs(2)).await;
    settle().await;

    let mut newcomer = TestClient::connect(&hub);
    assert_eq!(
        newcomer.join_consumer(&channel).await.unwrap(),
        ServerEvent::Error {
            error: "ChannelId or Password incorrect".to_string()
        }
    );
    assert_eq!(hub.registry().channel_count().await, 0);

    // A new provider recreates the channel from scratch
    let mut successor = TestClient::connect(&hub);
    assert_eq!(
        successor.joined_provider(&channel).await.unwrap(),
        fingerprint
    );
    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert_eq!(snapshot.state, ChannelState::default());
    assert!(snapshot.consumers.is_empty());

    // Consumers of the old channel are not carried over
    successor.update(json!({"solar": 8})).await.unwrap();
    consumer.expect_silence().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reaper_removes_expired_channels() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let _reaper = hub.spawn_reaper(Duration::from_secs(5));
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    provider.close().await.unwrap();
    assert_eq!(hub.registry().channel_count().await, 1);

    tokio::time::advance(GRACE + Duration::from_secs(1)).await;
    settle().await;
    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;

    assert_eq!(hub.registry().channel_count().await, 0);
    assert_eq!(hub.metrics().channel_count(), 0);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_replaced_provider_disconnect_does_not_orphan() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let channel = TestChannel::random();
    let mut first = TestClient::connect(&hub);
    let mut second = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = first.joined_provider(&channel).await.unwrap();
    second.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    let second_id = second.connection_id();
    first.close().await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert!(!snapshot.orphaned);
    assert_eq!(snapshot.provider, Some(second_id));

    tokio::time::advance(GRACE * 2).await;
    settle().await;

    second.update(json!({"battery": 9})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().battery, Some(9.0));
}

#[tokio::test(start_paused = true)]
async fn test_provider_switching_channels_orphans_previous() {
    let hub = TestHub::builder().orphan_grace(GRACE).build();
    let old = TestChannel::random();
    let new = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let old_fp = provider.joined_provider(&old).await.unwrap();
    consumer.joined_consumer(&old).await.unwrap();
    provider.joined_provider(&new).await.unwrap();

    assert!(hub.registry().snapshot(&old_fp).await.unwrap().orphaned);

    // Updates now go to the new channel only
    provider.update(json!({"solar": 1})).await.unwrap();
    consumer.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_zero_grace_closes_channel_with_provider() {
    let hub = TestHub::builder().orphan_grace(Duration::ZERO).build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);
    let mut late = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    provider.close().await.unwrap();

    assert_eq!(
        late.join_consumer(&channel).await.unwrap(),
        ServerEvent::Error {
            error: "ChannelId or Password incorrect".to_string()
        }
    );
}
