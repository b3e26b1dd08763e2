//! Integration test: engine lifecycle, policy changes and the request cleaner.

use std::sync::Arc;
use std::time::Duration;

use meshroute_core::{Address, RoutingConfig, RoutingPolicy};
use meshroute_integration_tests::{fast_config, sequential, MeshFixture};
use meshroute_routing::{
    ChannelClient, DiscoveryError, NoRouteError, RequestTable, RequestTableCleaner, RouteOutcome,
    RoutingError, RoutingManager, RoutingPolicyManager, SleepFlag, SleepManager,
};
use uuid::Uuid;

#[tokio::test]
async fn test_stop_fails_pending_and_refuses_restart() {
    let addresses = sequential(0x0013_A200_0000_0001, 2);
    let mesh = MeshFixture::line(&addresses, RoutingConfig::default());
    let nowhere = Address(0x0013_A2EE);

    let (client, mut rx) = ChannelClient::new();
    let token = Uuid::now_v7();
    assert_eq!(
        mesh.node(0).find_route(nowhere, Arc::new(client), token).await,
        Ok(false)
    );
    assert!(mesh.node(0).pending_request(nowhere).is_some());

    mesh.node(0).stop().await;
    assert_eq!(
        rx.recv().await.unwrap(),
        (
            token,
            RouteOutcome::Failed {
                destination: nowhere,
                error: DiscoveryError::Stopped,
            }
        )
    );

    let (client, _rx) = ChannelClient::new();
    assert_eq!(
        mesh.node(0).find_route(nowhere, Arc::new(client), Uuid::now_v7()).await,
        Err(NoRouteError::Stopped)
    );
    assert!(matches!(mesh.node(0).start(), Err(RoutingError::AlreadyStopped)));

    mesh.shutdown().await;
}

#[tokio::test]
async fn test_uninitialized_engine_refuses_discovery() {
    let manager = RoutingManager::new(RoutingConfig::default(), Arc::new(RoutingPolicyManager::default()));
    assert_eq!(
        manager.discover(Address(0x0013_A200)).await,
        Err(NoRouteError::NotInitialized)
    );
    assert!(matches!(manager.start(), Err(RoutingError::NotInitialized)));
}

#[tokio::test]
async fn test_policy_change_takes_effect_on_forwarding() {
    let addresses = sequential(0x0013_A200_0000_0001, 3);
    let mesh = MeshFixture::line_with_policies(
        &[
            (addresses[0], RoutingPolicy::if_awake()),
            (addresses[1], RoutingPolicy::end_node()),
            (addresses[2], RoutingPolicy::if_awake()),
        ],
        fast_config(),
    );

    let blocked = mesh.node(0).discover(addresses[2]).await.unwrap();
    assert!(blocked.route().is_none());

    let relay_policy = mesh.node(1).policy_manager();
    assert!(relay_policy.policy_has_changed(RoutingPolicy::always()));
    assert!(!relay_policy.policy_has_changed(RoutingPolicy::always()));

    let route = tokio::time::timeout(Duration::from_secs(3), mesh.node(0).discover(addresses[2]))
        .await
        .unwrap()
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(route.next_hop, addresses[1]);

    mesh.shutdown().await;
}

#[test]
fn test_route_always_keeps_node_awake() {
    let sleep = Arc::new(SleepFlag::new(true));
    let manager = RoutingPolicyManager::with_sleep_manager(RoutingPolicy::if_awake(), sleep.clone());
    assert!(sleep.is_deep_sleep_enabled());

    assert!(manager.policy_has_changed(RoutingPolicy::shared_basestation()));
    assert!(!sleep.is_deep_sleep_enabled());
    assert!(manager.route_always());
    assert!(manager.bridge_broadcasts());

    assert!(manager.policy_has_changed(RoutingPolicy::end_node()));
    assert!(sleep.is_deep_sleep_enabled());
    assert!(manager.is_end_node());
}

#[tokio::test]
async fn test_cleaner_sweeps_only_when_work_exists() {
    let requests = Arc::new(RequestTable::new(&fast_config()));
    let cleaner = RequestTableCleaner::new(requests.clone(), Duration::from_millis(20));
    assert!(cleaner.start());
    assert!(!cleaner.start());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cleaner.sweeps(), 0);

    let key = meshroute_routing::RequestKey::new(Address(1), Address(2));
    requests.record_forwarded(key, 7, chrono::Utc::now());
    let drained = async {
        while !requests.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), drained)
        .await
        .expect("expired request should be swept");
    assert!(cleaner.sweeps() > 0);

    cleaner.shutdown().await;
    assert!(!cleaner.is_running());
}
