//! Commands dispatched to the local routing engine from other tasks.

use meshroute_core::{Address, RoutingPolicy};
use meshroute_routing::{NoRouteError, RouteEntry, RouteOutcome};
use tokio::sync::{mpsc, oneshot};

/// A command sent to the host's main event loop.
#[derive(Debug)]
pub enum RouterCommand {
    /// Discover (or look up) a route and reply with the outcome.
    FindRoute {
        destination: Address,
        reply: oneshot::Sender<Result<RouteOutcome, NoRouteError>>,
    },
    /// Cached route, without discovery.
    GetRouteInfo {
        destination: Address,
        reply: oneshot::Sender<Option<RouteEntry>>,
    },
    /// Drop a route after a delivery failure.
    Invalidate {
        originator: Address,
        destination: Address,
        reply: oneshot::Sender<bool>,
    },
    /// Copy of the route table.
    Snapshot {
        reply: oneshot::Sender<Vec<RouteEntry>>,
    },
    /// Switch the routing policy; replies whether it changed.
    SetPolicy {
        policy: RoutingPolicy,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable sender side of the command channel.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    pub fn new(tx: mpsc::Sender<RouterCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RouterCommand,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| anyhow::anyhow!("router event loop is not running"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("router dropped the command"))
    }

    pub async fn find_route(&self, destination: Address) -> anyhow::Result<RouteOutcome> {
        let result = self
            .request(|reply| RouterCommand::FindRoute { destination, reply })
            .await?;
        Ok(result?)
    }

    pub async fn route_info(&self, destination: Address) -> anyhow::Result<Option<RouteEntry>> {
        self.request(|reply| RouterCommand::GetRouteInfo { destination, reply })
            .await
    }

    pub async fn invalidate(&self, originator: Address, destination: Address) -> anyhow::Result<bool> {
        self.request(|reply| RouterCommand::Invalidate {
            originator,
            destination,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> anyhow::Result<Vec<RouteEntry>> {
        self.request(|reply| RouterCommand::Snapshot { reply }).await
    }

    pub async fn set_policy(&self, policy: RoutingPolicy) -> anyhow::Result<bool> {
        self.request(|reply| RouterCommand::SetPolicy { policy, reply })
            .await
    }
}
