//! Integration test: route discovery across a simulated line of nodes.

use std::time::Duration;

use meshroute_core::{Address, DestinationState, RoutingConfig, RoutingPolicy};
use meshroute_integration_tests::{fast_config, sequential, MeshFixture};
use meshroute_routing::{DiscoveryError, LinkError, NoRouteError, RouteEntry, RouteOutcome, RoutingEvent};

const LIMIT: Duration = Duration::from_secs(3);

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =========================================================================
// Successful discovery
// =========================================================================

#[tokio::test]
async fn test_discovery_through_one_relay() {
    let us = Address(0x0013_A2FF);
    let relay = Address(0x0013_A201);
    let target = Address(0x0013_A200);
    let mesh = MeshFixture::line(&[us, relay, target], RoutingConfig::default());

    let outcome = tokio::time::timeout(LIMIT, mesh.node(0).discover(target))
        .await
        .expect("discovery should finish")
        .unwrap();

    let expected = RouteEntry::new(target, relay, 2);
    assert_eq!(outcome, RouteOutcome::Found(expected));
    assert_eq!(expected.to_string(), "0000.0000.0013.A200:0000.0000.0013.A201:2");
    assert_eq!(mesh.node(0).get_route_info(target), Some(expected));
    assert_eq!(mesh.node(0).destination_state(target), DestinationState::Routed);
    assert!(mesh.node(0).pending_request(target).is_none());

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_cached_route_needs_no_traffic() {
    let addresses = sequential(0x0013_A200_0000_0001, 3);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    let target = mesh.last();

    mesh.node(0).discover(target).await.unwrap().into_result().unwrap();
    let frames = mesh.medium.frames_delivered();

    let (client, _rx) = meshroute_routing::ChannelClient::new();
    let cached = mesh
        .node(0)
        .find_route(target, std::sync::Arc::new(client), uuid::Uuid::now_v7())
        .await;
    assert_eq!(cached, Ok(true));
    assert_eq!(mesh.medium.frames_delivered(), frames);

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_long_line_hop_counts() {
    let addresses = sequential(0x0013_A200_0000_0001, 6);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());

    let route = tokio::time::timeout(LIMIT, mesh.node(0).discover(mesh.last()))
        .await
        .unwrap()
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(route.next_hop, addresses[1]);
    assert_eq!(route.hop_count, 5);

    // Every relay learned both directions.
    for (i, relay) in mesh.managers.iter().enumerate().take(5).skip(1) {
        let forward = relay.get_route_info(mesh.last()).unwrap();
        assert_eq!(forward.next_hop, addresses[i + 1]);
        assert_eq!(forward.hop_count, (5 - i) as u32);
        let reverse = relay.get_route_info(addresses[0]).unwrap();
        assert_eq!(reverse.next_hop, addresses[i - 1]);
        assert_eq!(reverse.hop_count, i as u32);
    }

    // The destination answered exactly once.
    let replies = mesh.recorders[5]
        .events()
        .into_iter()
        .filter(|e| matches!(e, RoutingEvent::RrepSent { .. }))
        .count();
    assert_eq!(replies, 1);

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients_share_one_discovery() {
    let addresses = sequential(0x0013_A200_0000_0001, 4);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    let target = mesh.last();

    let (first, second) = tokio::join!(mesh.node(0).discover(target), mesh.node(0).discover(target));
    let first = first.unwrap().into_result().unwrap();
    let second = second.unwrap().into_result().unwrap();
    assert_eq!(first, second);

    let originated = mesh.recorders[0]
        .events()
        .into_iter()
        .filter(|e| matches!(e, RoutingEvent::RreqSent { originator, .. } if *originator == addresses[0]))
        .count();
    assert_eq!(originated, 1);

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_destination_events_serialize() {
    let addresses = sequential(0x0013_A200_0000_0001, 2);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    mesh.node(0).discover(addresses[1]).await.unwrap();

    let kinds: Vec<String> = mesh.recorders[1]
        .events()
        .iter()
        .map(|e| serde_json::to_value(e).unwrap()["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["rreq_received", "rrep_sent"]);

    mesh.shutdown().await;
}

// =========================================================================
// Failed discovery
// =========================================================================

#[tokio::test]
async fn test_unknown_destination_times_out() {
    let addresses = sequential(0x0013_A200_0000_0001, 2);
    let mesh = MeshFixture::line(&addresses, fast_config());
    let nowhere = Address(0x0013_A2EE);

    let outcome = tokio::time::timeout(LIMIT, mesh.node(0).discover(nowhere))
        .await
        .expect("cleaner should expire the request")
        .unwrap();
    assert_eq!(
        outcome,
        RouteOutcome::Failed {
            destination: nowhere,
            error: DiscoveryError::Timeout { destination: nowhere },
        }
    );
    assert!(mesh.node(0).get_route_info(nowhere).is_none());
    assert_eq!(mesh.node(0).destination_state(nowhere), DestinationState::Unreachable);

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_end_node_relay_blocks_discovery() {
    let addresses = sequential(0x0013_A200_0000_0001, 3);
    let mesh = MeshFixture::line_with_policies(
        &[
            (addresses[0], RoutingPolicy::if_awake()),
            (addresses[1], RoutingPolicy::end_node()),
            (addresses[2], RoutingPolicy::if_awake()),
        ],
        fast_config(),
    );

    let outcome = tokio::time::timeout(LIMIT, mesh.node(0).discover(addresses[2]))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.route().is_none());
    // The end node still learned where the request came from.
    assert!(mesh.node(1).get_route_info(addresses[0]).is_some());
    assert!(mesh.node(2).get_route_info(addresses[0]).is_none());

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_radio_off_refuses_discovery() {
    let addresses = sequential(0x0013_A200_0000_0001, 2);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    mesh.medium.set_radio_on(addresses[0], false);

    let result = mesh.node(0).discover(addresses[1]).await;
    assert_eq!(result, Err(NoRouteError::RadioUnavailable(LinkError::RadioOff)));

    mesh.shutdown().await;
}

// =========================================================================
// Route teardown
// =========================================================================

#[tokio::test]
async fn test_invalidate_route_true_then_false() {
    let addresses = sequential(0x0013_A200_0000_0001, 3);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    let target = mesh.last();
    mesh.node(0).discover(target).await.unwrap().into_result().unwrap();

    assert!(mesh.node(0).invalidate_route(addresses[0], target).await);
    assert!(mesh.node(0).get_route_info(target).is_none());
    assert!(!mesh.node(0).invalidate_route(addresses[0], target).await);
    assert!(mesh.recorders[0].events().contains(&RoutingEvent::RerrSent {
        originator: addresses[0],
        destination: target,
    }));

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_route_error_travels_back_to_originator() {
    let addresses = sequential(0x0013_A200_0000_0001, 4);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    let target = mesh.last();
    mesh.node(0).discover(target).await.unwrap().into_result().unwrap();

    // The relay next to the destination loses it and tells the originator.
    assert!(mesh.node(2).invalidate_route(addresses[0], target).await);

    let origin = mesh.node(0).clone();
    assert!(eventually(|| origin.get_route_info(target).is_none()).await);
    assert!(mesh.node(1).get_route_info(target).is_none());
    assert!(mesh.recorders[0].events().contains(&RoutingEvent::RerrReceived {
        originator: addresses[0],
        destination: target,
    }));

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_rediscovery_fails_after_relay_goes_silent() {
    let addresses = sequential(0x0013_A200_0000_0001, 3);
    let mesh = MeshFixture::line(&addresses, fast_config());
    let target = mesh.last();
    mesh.node(0).discover(target).await.unwrap().into_result().unwrap();

    mesh.medium.set_radio_on(addresses[1], false);
    let lost = mesh.node(0).link_failed(addresses[1]).await;
    assert!(lost.contains(&target));
    assert_eq!(mesh.node(0).destination_state(target), DestinationState::NoRoute);

    let outcome = tokio::time::timeout(LIMIT, mesh.node(0).discover(target))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        outcome,
        RouteOutcome::Failed {
            error: DiscoveryError::Timeout { .. },
            ..
        }
    ));

    mesh.shutdown().await;
}
