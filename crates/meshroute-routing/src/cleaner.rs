use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::request::RequestTable;
use crate::route_table::RouteTable;

/// Background task that periodically evicts expired route requests and,
/// when a route table is attached, ages its routes.
///
/// The loop parks until either table is non-empty, sweeps both, then sleeps
/// for a fixed interval.
/// `stop` cancels the task wherever it is parked; once stopped no further
/// sweep runs and the cleaner cannot be restarted.
pub struct RequestTableCleaner {
    requests: Arc<RequestTable>,
    routes: Option<Arc<RouteTable>>,
    interval: Duration,
    cancel: CancellationToken,
    sweeps: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequestTableCleaner {
    pub fn new(requests: Arc<RequestTable>, interval: Duration) -> Self {
        Self {
            requests,
            routes: None,
            interval,
            cancel: CancellationToken::new(),
            sweeps: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Also age `routes` on every sweep, and wake for it alone.
    pub fn with_route_table(mut self, routes: Arc<RouteTable>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Spawn the cleaner task. Returns `false` if it was already started or
    /// has been stopped. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if handle.is_some() || self.cancel.is_cancelled() {
            return false;
        }

        let requests = self.requests.clone();
        let routes = self.routes.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let sweeps = self.sweeps.clone();

        *handle = Some(tokio::spawn(async move {
            tracing::debug!(interval_ms = interval.as_millis() as u64, "request table cleaner started");
            loop {
                let routes_waiting = async {
                    match &routes {
                        Some(routes) => routes.wait_until_not_empty().await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = requests.wait_until_not_empty() => {}
                    _ = routes_waiting => {}
                }
                if cancel.is_cancelled() {
                    break;
                }

                let now = Utc::now();
                let expired = requests.clean_table_at(now);
                let deleted = routes
                    .as_ref()
                    .map_or(0, |routes| routes.remove_expired(now).len());
                sweeps.fetch_add(1, Ordering::Relaxed);
                if expired > 0 || deleted > 0 {
                    tracing::debug!(expired, routes_deleted = deleted, "cleaner sweep");
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!("request table cleaner stopped");
        }));
        true
    }

    /// Signal the task to stop. Idempotent and callable from any task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "request table cleaner task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .as_ref()
                .map_or(false, |h| !h.is_finished())
    }

    /// Number of sweeps performed so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }
}

impl Drop for RequestTableCleaner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{OneshotClient, RouteOutcome};
    use crate::error::DiscoveryError;
    use crate::request::{RequestEntry, RequestKey};
    use meshroute_core::{Address, RoutingConfig};
    use uuid::Uuid;

    fn quick_config() -> RoutingConfig {
        RoutingConfig {
            path_discovery_time: Duration::from_millis(10),
            ..RoutingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cleaner_expires_pending_request() {
        let config = quick_config();
        let requests = Arc::new(RequestTable::new(&config));
        let cleaner = RequestTableCleaner::new(requests.clone(), Duration::from_millis(5));
        assert!(cleaner.start());
        assert!(!cleaner.start());

        let (client, rx) = OneshotClient::new();
        let key = RequestKey::new(Address(0x0013_A200), Address(1));
        requests.insert(
            RequestEntry::new(key, 1, requests.expiry_from(Utc::now()))
                .with_waiter(Arc::new(client), Uuid::now_v7()),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("cleaner never swept")
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Failed {
                destination: Address(0x0013_A200),
                error: DiscoveryError::Timeout {
                    destination: Address(0x0013_A200)
                },
            }
        );
        assert!(requests.is_empty());
        assert!(cleaner.sweeps() >= 1);
        cleaner.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleaner_parks_while_table_empty() {
        let requests = Arc::new(RequestTable::default());
        let cleaner = RequestTableCleaner::new(requests, Duration::from_millis(1));
        cleaner.start();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cleaner.sweeps(), 0);
        assert!(cleaner.is_running());
        cleaner.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_wait_and_is_idempotent() {
        let requests = Arc::new(RequestTable::default());
        let cleaner = RequestTableCleaner::new(requests.clone(), Duration::from_secs(8));
        cleaner.start();

        cleaner.stop();
        cleaner.stop();
        tokio::time::timeout(Duration::from_secs(1), cleaner.shutdown())
            .await
            .expect("stop did not interrupt the wait");
        assert!(!cleaner.is_running());
        assert!(!cleaner.start());

        // No sweep after stop, even once entries appear.
        requests.record_forwarded(RequestKey::new(Address(1), Address(2)), 1, Utc::now());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cleaner.sweeps(), 0);
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_cleaner_ages_route_table() {
        let config = RoutingConfig {
            active_route_timeout: Duration::from_millis(1),
            delete_period: Duration::from_millis(1),
            ..quick_config()
        };
        let requests = Arc::new(RequestTable::new(&config));
        let routes = Arc::new(RouteTable::new(&config));
        routes.insert_or_replace(crate::route_table::RouteEntry::neighbor(Address(3)));

        let cleaner = RequestTableCleaner::new(requests.clone(), Duration::from_millis(5))
            .with_route_table(routes.clone());
        cleaner.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !routes.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("route never aged out");
        assert!(requests.is_empty());
        assert!(cleaner.sweeps() > 0);
        cleaner.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleaner_wakes_for_route_inserted_later() {
        let config = RoutingConfig {
            active_route_timeout: Duration::from_millis(1),
            delete_period: Duration::from_millis(1),
            ..quick_config()
        };
        let requests = Arc::new(RequestTable::new(&config));
        let routes = Arc::new(RouteTable::new(&config));
        let cleaner = RequestTableCleaner::new(requests, Duration::from_millis(5))
            .with_route_table(routes.clone());
        cleaner.start();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cleaner.sweeps(), 0);

        routes.insert_or_replace(crate::route_table::RouteEntry::neighbor(Address(4)));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !routes.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("parked cleaner never aged the new route");
        cleaner.shutdown().await;
    }
}
