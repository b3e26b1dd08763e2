use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use meshroute_core::RoutingPolicy;

/// Deep-sleep control the policy manager drives when the policy changes.
pub trait SleepManager: Send + Sync {
    fn is_deep_sleep_enabled(&self) -> bool;
    fn set_deep_sleep_enabled(&self, enabled: bool);
}

/// A sleep manager that only records the requested state.
#[derive(Debug)]
pub struct SleepFlag {
    enabled: AtomicBool,
}

impl SleepFlag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

impl SleepManager for SleepFlag {
    fn is_deep_sleep_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_deep_sleep_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Holds the node's routing policy.
///
/// `policy_has_changed` is the only mutator. While the policy routes always,
/// deep sleep is disabled; switching back restores whatever sleep setting was
/// in force before.
pub struct RoutingPolicyManager {
    active: RwLock<RoutingPolicy>,
    sleep: Option<Arc<dyn SleepManager>>,
    saved_deep_sleep: Mutex<bool>,
}

impl RoutingPolicyManager {
    /// A manager with no sleep control.
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            active: RwLock::new(policy),
            sleep: None,
            saved_deep_sleep: Mutex::new(true),
        }
    }

    /// A manager that drives `sleep`. The initial policy is applied at once.
    pub fn with_sleep_manager(policy: RoutingPolicy, sleep: Arc<dyn SleepManager>) -> Self {
        let saved = sleep.is_deep_sleep_enabled();
        let manager = Self {
            active: RwLock::new(policy),
            sleep: Some(sleep),
            saved_deep_sleep: Mutex::new(saved),
        };
        manager.apply_sleep_policy(&policy);
        manager
    }

    /// The current policy.
    pub fn policy(&self) -> RoutingPolicy {
        *self.active.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Replace the policy. Returns `false` if `new_policy` is already active.
    pub fn policy_has_changed(&self, new_policy: RoutingPolicy) -> bool {
        let mut active = self.active.write().unwrap_or_else(|p| p.into_inner());
        if *active == new_policy {
            return false;
        }
        let old = *active;
        *active = new_policy;
        self.apply_sleep_policy(&new_policy);
        tracing::info!(from = %old, to = %new_policy, "routing policy changed");
        true
    }

    fn apply_sleep_policy(&self, policy: &RoutingPolicy) {
        let Some(sleep) = &self.sleep else {
            return;
        };
        let mut saved = self.saved_deep_sleep.lock().unwrap_or_else(|p| p.into_inner());
        if policy.route_always {
            *saved = sleep.is_deep_sleep_enabled();
            sleep.set_deep_sleep_enabled(false);
        } else {
            sleep.set_deep_sleep_enabled(*saved);
        }
        tracing::debug!(
            saved_deep_sleep = *saved,
            deep_sleep = sleep.is_deep_sleep_enabled(),
            "sleep policy applied"
        );
    }

    pub fn route_always(&self) -> bool {
        self.policy().route_always
    }

    pub fn is_end_node(&self) -> bool {
        self.policy().end_node
    }

    pub fn may_sleep(&self) -> bool {
        self.policy().may_sleep
    }

    pub fn bridge_broadcasts(&self) -> bool {
        self.policy().bridge_broadcasts
    }
}

impl Default for RoutingPolicyManager {
    fn default() -> Self {
        Self::new(RoutingPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_follow_policy() {
        let manager = RoutingPolicyManager::default();
        assert!(!manager.route_always());
        assert!(!manager.is_end_node());
        assert!(manager.may_sleep());

        assert!(manager.policy_has_changed(RoutingPolicy::shared_basestation()));
        assert!(manager.route_always());
        assert!(!manager.may_sleep());
        assert!(manager.bridge_broadcasts());

        assert!(manager.policy_has_changed(RoutingPolicy::end_node()));
        assert!(manager.is_end_node());
        assert!(!manager.route_always());
    }

    #[test]
    fn test_unchanged_policy_is_a_no_op() {
        let manager = RoutingPolicyManager::new(RoutingPolicy::always());
        assert!(!manager.policy_has_changed(RoutingPolicy::always()));
        assert_eq!(manager.policy(), RoutingPolicy::always());
    }

    #[test]
    fn test_route_always_disables_and_restores_deep_sleep() {
        let sleep = Arc::new(SleepFlag::new(true));
        let manager = RoutingPolicyManager::with_sleep_manager(RoutingPolicy::if_awake(), sleep.clone());
        assert!(sleep.is_deep_sleep_enabled());

        manager.policy_has_changed(RoutingPolicy::always());
        assert!(!sleep.is_deep_sleep_enabled());

        manager.policy_has_changed(RoutingPolicy::end_node());
        assert!(sleep.is_deep_sleep_enabled());
    }

    #[test]
    fn test_initial_route_always_policy_applies_at_construction() {
        let sleep = Arc::new(SleepFlag::new(false));
        let manager =
            RoutingPolicyManager::with_sleep_manager(RoutingPolicy::shared_basestation(), sleep.clone());
        assert!(!sleep.is_deep_sleep_enabled());

        manager.policy_has_changed(RoutingPolicy::if_awake());
        assert!(!sleep.is_deep_sleep_enabled());
    }
}
