//! A line of simulated nodes, each running its own routing engine.

use std::sync::Arc;
use std::time::Duration;

use meshroute_core::{Address, RoutingConfig, RoutingPolicy};
use meshroute_routing::sim::{spawn_receiver, SimulatedMedium};
use meshroute_routing::{EventRecorder, RoutingManager, RoutingPolicyManager};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timings short enough for discoveries to time out inside a test.
pub fn fast_config() -> RoutingConfig {
    RoutingConfig {
        path_discovery_time: Duration::from_millis(300),
        request_cleaner_interval: Duration::from_millis(50),
        ..RoutingConfig::default()
    }
}

/// `count` consecutive addresses starting at `first`.
pub fn sequential(first: u64, count: usize) -> Vec<Address> {
    (0..count as u64).map(|i| Address(first + i)).collect()
}

pub struct MeshFixture {
    pub medium: Arc<SimulatedMedium>,
    pub managers: Vec<Arc<RoutingManager>>,
    pub recorders: Vec<Arc<EventRecorder>>,
    pub addresses: Vec<Address>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshFixture {
    /// Nodes linked in the given order, all routing while awake.
    pub fn line(addresses: &[Address], config: RoutingConfig) -> Self {
        let nodes: Vec<_> = addresses
            .iter()
            .map(|a| (*a, RoutingPolicy::if_awake()))
            .collect();
        Self::line_with_policies(&nodes, config)
    }

    /// Must be called inside a tokio runtime.
    pub fn line_with_policies(nodes: &[(Address, RoutingPolicy)], config: RoutingConfig) -> Self {
        let medium = SimulatedMedium::new();
        let cancel = CancellationToken::new();
        let mut managers = Vec::new();
        let mut recorders = Vec::new();
        let mut tasks = Vec::new();

        for (address, policy) in nodes {
            let manager = Arc::new(RoutingManager::new(
                config.clone(),
                Arc::new(RoutingPolicyManager::new(*policy)),
            ));
            let recorder = Arc::new(EventRecorder::new());
            manager.add_event_listener(recorder.clone());

            let (radio, inbox) = medium.attach(*address);
            manager
                .initialize(*address, radio)
                .expect("fresh manager initializes");
            manager.start().expect("initialized manager starts");
            tasks.push(spawn_receiver(manager.clone(), inbox, cancel.clone()));

            managers.push(manager);
            recorders.push(recorder);
        }

        let addresses: Vec<Address> = nodes.iter().map(|(a, _)| *a).collect();
        medium.link_line(&addresses);

        Self {
            medium,
            managers,
            recorders,
            addresses,
            cancel,
            tasks,
        }
    }

    pub fn node(&self, index: usize) -> &Arc<RoutingManager> {
        &self.managers[index]
    }

    pub fn last(&self) -> Address {
        self.addresses[self.addresses.len() - 1]
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for manager in &self.managers {
            manager.stop().await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
