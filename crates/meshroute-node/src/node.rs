//! The mesh host orchestrator.
//!
//! Builds a line of simulated radio nodes, one routing engine each, and
//! serves the first node's engine to the rest of the process through
//! [`RouterCommand`]s.

use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshroute_core::{Address, RoutingPolicy};
use meshroute_routing::sim::{spawn_receiver, SimulatedMedium};
use meshroute_routing::{RoutingManager, RoutingPolicyManager, TracingListener};

use crate::commands::{RouterCommand, RouterHandle};
use crate::config::NodeConfig;

/// A simulated mesh whose first node is "ours".
pub struct MeshHost {
    /// Host configuration.
    config: NodeConfig,
    /// The shared radio channel.
    medium: Arc<SimulatedMedium>,
    /// One engine per simulated node; index 0 is the local node.
    managers: Vec<Arc<RoutingManager>>,
    /// Stops receiver pumps and the advertiser.
    cancel: CancellationToken,
    /// Background tasks spawned by `start`.
    tasks: Vec<JoinHandle<()>>,
    command_tx: mpsc::Sender<RouterCommand>,
    command_rx: Option<mpsc::Receiver<RouterCommand>>,
}

impl MeshHost {
    /// Create the engines. Nothing runs until `start`.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let policy = config.policy()?;
        let medium = SimulatedMedium::new();
        medium.set_link_loss(config.simulation.link_loss);

        let managers = (0..config.addresses().len())
            .map(|i| {
                // Relays must forward for the line to work at all.
                let node_policy = if i == 0 { policy } else { RoutingPolicy::always() };
                Arc::new(RoutingManager::new(
                    config.routing.clone(),
                    Arc::new(RoutingPolicyManager::new(node_policy)),
                ))
            })
            .collect::<Vec<_>>();
        managers[0].add_event_listener(Arc::new(TracingListener));

        let (command_tx, command_rx) = mpsc::channel(64);
        tracing::info!(
            address = %config.node.address,
            nodes = managers.len(),
            %policy,
            "mesh host created"
        );

        Ok(Self {
            config,
            medium,
            managers,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            command_tx,
            command_rx: Some(command_rx),
        })
    }

    /// Attach every node to the medium, link the line and start the engines.
    pub fn start(&mut self) -> Result<()> {
        let addresses = self.config.addresses();
        for (address, manager) in addresses.iter().zip(&self.managers) {
            let (radio, inbox) = self.medium.attach(*address);
            manager.initialize(*address, radio)?;
            manager.start()?;
            self.tasks
                .push(spawn_receiver(manager.clone(), inbox, self.cancel.clone()));
        }
        self.medium.link_line(&addresses);
        tracing::info!(first = %addresses[0], last = %addresses[addresses.len() - 1], "line topology up");

        if let Some(interval) = self.config.advertise_interval() {
            let managers = self.managers.clone();
            let cancel = self.cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            for manager in &managers {
                                if let Err(e) = manager.advertise().await {
                                    tracing::debug!(error = %e, "neighbor advertisement skipped");
                                }
                            }
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    /// Serve router commands until the host is cancelled.
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("host is already running"))?;
        let manager = self.local().clone();
        let cancel = self.cancel.clone();

        tracing::info!("entering main event loop");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(c) => Self::handle_command(&manager, c).await,
                        None => {
                            tracing::info!("command channel closed");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop every engine and background task.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down mesh host");
        self.cancel.cancel();
        join_all(self.managers.iter().map(|m| m.stop())).await;
        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "background task failed");
            }
        }
        tracing::info!("mesh host shut down");
        Ok(())
    }

    /// A handle for sending commands to the local engine.
    pub fn handle(&self) -> RouterHandle {
        RouterHandle::new(self.command_tx.clone())
    }

    /// The local node's engine.
    pub fn local(&self) -> &Arc<RoutingManager> {
        &self.managers[0]
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.config.addresses()
    }

    pub fn medium(&self) -> &Arc<SimulatedMedium> {
        &self.medium
    }

    async fn handle_command(manager: &Arc<RoutingManager>, cmd: RouterCommand) {
        match cmd {
            RouterCommand::FindRoute { destination, reply } => {
                // Discovery can take a full path discovery time; keep serving meanwhile.
                let manager = manager.clone();
                tokio::spawn(async move {
                    let result = manager.discover(destination).await;
                    match &result {
                        Ok(outcome) => tracing::info!(%destination, found = outcome.route().is_some(), "find route finished"),
                        Err(e) => tracing::warn!(%destination, error = %e, "find route refused"),
                    }
                    let _ = reply.send(result);
                });
            }
            RouterCommand::GetRouteInfo { destination, reply } => {
                let _ = reply.send(manager.get_route_info(destination));
            }
            RouterCommand::Invalidate {
                originator,
                destination,
                reply,
            } => {
                let _ = reply.send(manager.invalidate_route(originator, destination).await);
            }
            RouterCommand::Snapshot { reply } => {
                let _ = reply.send(manager.route_snapshot());
            }
            RouterCommand::SetPolicy { policy, reply } => {
                let _ = reply.send(manager.policy_manager().policy_has_changed(policy));
            }
        }
    }
}
