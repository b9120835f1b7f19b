//! End-to-end hub scenarios driven through the wire protocol.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use relay_service::actors::SessionState;
use relay_service::fingerprint::ChannelFingerprint;
use relay_service::protocol::{ClientRole, ServerEvent};
use relay_service::state::{ChannelState, StateDelta};
use relay_test_utils::{TestChannel, TestClient, TestHub};
use serde_json::json;

#[tokio::test]
async fn test_lab1_scenario() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::new("lab1", "secret");
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    assert_eq!(
        fingerprint.as_str(),
        "aee744de2163afffc9770a65b111c5b7e896e680b7246ad34c6c9f51d18e98eb"
    );

    assert_eq!(
        consumer.join_consumer(&channel).await.unwrap(),
        ServerEvent::Joined {
            channel_id: fingerprint.clone()
        }
    );

    provider.update(json!({"solar": 10})).await.unwrap();
    assert_eq!(
        consumer.recv().await.unwrap(),
        ServerEvent::Update(StateDelta {
            solar: Some(10.0),
            ..StateDelta::default()
        })
    );

    // NaN is serialized as null on the wire
    provider
        .update(json!({"consumption": f64::NAN}))
        .await
        .unwrap();
    assert_eq!(
        provider.recv_error().await.unwrap(),
        "Invalid consumption value"
    );
    consumer.expect_silence().await.unwrap();
    provider.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_consumer_before_provider_fails_and_creates_nothing() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::new("lab1", "secret");
    let mut consumer = TestClient::connect(&hub);

    assert_eq!(
        consumer.join_consumer(&channel).await.unwrap(),
        ServerEvent::Error {
            error: "ChannelId or Password incorrect".to_string()
        }
    );
    assert_eq!(hub.registry().channel_count().await, 0);
    assert_eq!(consumer.session().await.unwrap(), SessionState::Unjoined);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::new("lab1", "secret");
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();

    assert_eq!(
        consumer
            .join_consumer(&channel.with_password("Secret"))
            .await
            .unwrap(),
        ServerEvent::Error {
            error: "ChannelId or Password incorrect".to_string()
        }
    );
}

#[tokio::test]
async fn test_provider_join_is_idempotent_and_replaces() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut first = TestClient::connect(&hub);
    let mut second = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let a = first.joined_provider(&channel).await.unwrap();
    let again = first.joined_provider(&channel).await.unwrap();
    let b = second.joined_provider(&channel).await.unwrap();
    assert_eq!(a, again);
    assert_eq!(a, b);
    assert_eq!(hub.registry().channel_count().await, 1);

    consumer.joined_consumer(&channel).await.unwrap();

    // The replaced provider lost update rights
    first.update(json!({"solar": 1})).await.unwrap();
    assert_eq!(
        first.recv_error().await.unwrap(),
        "Invalid update: not a provider"
    );
    consumer.expect_silence().await.unwrap();

    second.update(json!({"solar": 2})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().solar, Some(2.0));

    let snapshot = hub.registry().snapshot(&a).await.unwrap();
    assert_eq!(snapshot.provider, Some(second.connection_id()));
}

#[tokio::test]
async fn test_consumer_rejoin_does_not_duplicate() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert_eq!(snapshot.consumers, vec![consumer.connection_id()]);

    provider.update(json!({"battery": 50})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().battery, Some(50.0));
    consumer.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_updates_reach_only_their_channel() {
    let hub = TestHub::builder().build();
    let red = TestChannel::new("red", "pw");
    let blue = TestChannel::new("blue", "pw");

    let mut red_provider = TestClient::connect(&hub);
    let mut blue_provider = TestClient::connect(&hub);
    let mut red_a = TestClient::connect(&hub);
    let mut red_b = TestClient::connect(&hub);
    let mut blue_consumer = TestClient::connect(&hub);

    red_provider.joined_provider(&red).await.unwrap();
    blue_provider.joined_provider(&blue).await.unwrap();
    red_a.joined_consumer(&red).await.unwrap();
    red_b.joined_consumer(&red).await.unwrap();
    blue_consumer.joined_consumer(&blue).await.unwrap();

    red_provider
        .update(json!({"solar": 3.5, "battery": 80}))
        .await
        .unwrap();

    let expected = StateDelta {
        solar: Some(3.5),
        battery: Some(80.0),
        consumption: None,
    };
    assert_eq!(red_a.recv_update().await.unwrap(), expected);
    assert_eq!(red_b.recv_update().await.unwrap(), expected);
    blue_consumer.expect_silence().await.unwrap();
    // Providers do not receive their own updates
    red_provider.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_consumer_update_is_rejected_without_side_effects() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);
    let mut other = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();
    other.joined_consumer(&channel).await.unwrap();

    consumer.update(json!({"solar": 99})).await.unwrap();
    assert_eq!(
        consumer.recv_error().await.unwrap(),
        "Invalid update: not a provider"
    );
    other.expect_silence().await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert_eq!(snapshot.state, ChannelState::default());
    assert_eq!(snapshot.updates_applied, 0);
}

#[tokio::test]
async fn test_unjoined_update_is_rejected() {
    let hub = TestHub::builder().build();
    let mut client = TestClient::connect(&hub);

    client.update(json!({"solar": 1})).await.unwrap();
    assert_eq!(
        client.recv_error().await.unwrap(),
        "Invalid update: not a provider"
    );
}

#[tokio::test]
async fn test_validation_errors_and_merge() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    provider.update(json!({"solar": "x"})).await.unwrap();
    assert_eq!(provider.recv_error().await.unwrap(), "Invalid solar value");

    provider.update(json!({"foo": 1})).await.unwrap();
    assert_eq!(provider.recv_error().await.unwrap(), "Invalid key");

    // Values are checked before keys
    provider
        .update(json!({"foo": 1, "battery": true}))
        .await
        .unwrap();
    assert_eq!(provider.recv_error().await.unwrap(), "Invalid battery value");

    consumer.expect_silence().await.unwrap();

    // An empty update is accepted and changes nothing
    provider.update(json!({})).await.unwrap();
    assert!(consumer.recv_update().await.unwrap().is_empty());

    provider.update(json!({"solar": 1})).await.unwrap();
    provider.update(json!({"battery": 5})).await.unwrap();
    consumer.recv_update().await.unwrap();
    consumer.recv_update().await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert_eq!(
        snapshot.state,
        ChannelState {
            solar: Some(1.0),
            battery: Some(5.0),
            consumption: None,
        }
    );
    provider.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut client = TestClient::connect(&hub);

    client.send_text("not json").await.unwrap();
    assert_eq!(client.recv_error().await.unwrap(), "Invalid message");

    client
        .send(&json!({"event": "join", "data": {"clientType": "admin", "data": {"channelId": "a", "password": "b"}}}))
        .await
        .unwrap();
    assert_eq!(client.recv_error().await.unwrap(), "Invalid message");

    client.send(&json!({"event": "update", "data": [1, 2]})).await.unwrap();
    assert_eq!(client.recv_error().await.unwrap(), "Invalid message");

    // Still usable
    client.joined_provider(&channel).await.unwrap();
}

#[tokio::test]
async fn test_updates_arrive_in_order() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    for i in 0..20 {
        provider.update(json!({"consumption": i})).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(
            consumer.recv_update().await.unwrap().consumption,
            Some(f64::from(i))
        );
    }
}

#[tokio::test]
async fn test_consumer_join_receives_no_backlog() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut late = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    provider.update(json!({"solar": 4})).await.unwrap();

    late.joined_consumer(&channel).await.unwrap();
    late.expect_silence().await.unwrap();
}

#[tokio::test]
async fn test_switching_channels_releases_previous_membership() {
    let hub = TestHub::builder().build();
    let first = TestChannel::random();
    let second = TestChannel::random();
    let mut first_provider = TestClient::connect(&hub);
    let mut second_provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    let first_fp = first_provider.joined_provider(&first).await.unwrap();
    let second_fp = second_provider.joined_provider(&second).await.unwrap();

    consumer.joined_consumer(&first).await.unwrap();
    consumer.joined_consumer(&second).await.unwrap();

    assert!(hub
        .registry()
        .snapshot(&first_fp)
        .await
        .unwrap()
        .consumers
        .is_empty());
    assert_eq!(
        consumer.session().await.unwrap(),
        SessionState::Joined {
            role: ClientRole::Consumer,
            fingerprint: second_fp,
        }
    );

    first_provider.update(json!({"solar": 1})).await.unwrap();
    consumer.expect_silence().await.unwrap();

    second_provider.update(json!({"solar": 2})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().solar, Some(2.0));
}

#[tokio::test]
async fn test_failed_join_keeps_current_membership() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    consumer
        .join_consumer(&TestChannel::random())
        .await
        .unwrap();

    provider.update(json!({"battery": 12})).await.unwrap();
    assert_eq!(consumer.recv_update().await.unwrap().battery, Some(12.0));
}

#[tokio::test]
async fn test_consumer_disconnect_leaves_channel() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut staying = TestClient::connect(&hub);
    let mut leaving = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    staying.joined_consumer(&channel).await.unwrap();
    leaving.joined_consumer(&channel).await.unwrap();

    leaving.close().await.unwrap();

    let snapshot = hub.registry().snapshot(&fingerprint).await.unwrap();
    assert_eq!(snapshot.consumers, vec![staying.connection_id()]);

    provider.update(json!({"solar": 6})).await.unwrap();
    assert_eq!(staying.recv_update().await.unwrap().solar, Some(6.0));
    assert_eq!(hub.metrics().connection_count(), 2);
}

#[tokio::test]
async fn test_disconnect_stops_connection() {
    let hub = TestHub::builder().build();
    let client = TestClient::connect(&hub);
    assert_eq!(client.session().await.unwrap(), SessionState::Unjoined);

    client.disconnect().await.unwrap();

    // Disconnect is processed first; the actor then stops answering
    assert!(client.session().await.is_err());
}

#[tokio::test]
async fn test_fingerprint_matches_derivation() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::new("house", "hunter2");
    let mut provider = TestClient::connect(&hub);

    let fingerprint = provider.joined_provider(&channel).await.unwrap();
    assert_eq!(fingerprint, ChannelFingerprint::derive("house", "hunter2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_provider_joins_create_one_channel() {
    for _ in 0..10 {
        let hub = TestHub::builder().build();
        let channel = TestChannel::random();

        let joins: Vec<_> = (0..8)
            .map(|_| {
                let mut client = TestClient::connect(&hub);
                let channel = channel.clone();
                tokio::spawn(async move {
                    client.joined_provider(&channel).await.unwrap();
                    client
                })
            })
            .collect();

        let mut providers = Vec::new();
        for join in joins {
            providers.push(join.await.unwrap());
        }

        assert_eq!(hub.registry().channel_count().await, 1);
        let provider_of_record = hub
            .registry()
            .snapshot(&channel.fingerprint())
            .await
            .unwrap()
            .provider
            .unwrap();

        let mut consumer = TestClient::connect(&hub);
        consumer.joined_consumer(&channel).await.unwrap();

        for provider in &mut providers {
            provider.update(json!({"solar": 1})).await.unwrap();
            if provider.connection_id() != provider_of_record {
                assert_eq!(
                    provider.recv_error().await.unwrap(),
                    "Invalid update: not a provider"
                );
            }
        }

        // Exactly one update got through
        assert_eq!(consumer.recv_update().await.unwrap().solar, Some(1.0));
        consumer.expect_silence().await.unwrap();
    }
}

#[tokio::test]
async fn test_out_of_range_number_reports_its_field() {
    let hub = TestHub::builder().build();
    let channel = TestChannel::random();
    let mut provider = TestClient::connect(&hub);
    let mut consumer = TestClient::connect(&hub);

    provider.joined_provider(&channel).await.unwrap();
    consumer.joined_consumer(&channel).await.unwrap();

    provider
        .send_text(r#"{"event":"update","data":{"solar":1e400}}"#)
        .await
        .unwrap();
    assert_eq!(provider.recv_error().await.unwrap(), "Invalid solar value");
    consumer.expect_silence().await.unwrap();
}
