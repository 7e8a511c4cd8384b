//! Automatic reconnection of failed signaling clients
//!
//! The [`FailoverMonitor`] is fed connection events of every signaling
//! client. When a client drops while the session is running it publishes
//! [`SessionEvent::Reconnecting`] and retries the failed clients with
//! exponential backoff. If the attempts run out a handler fault is raised
//! so the controller can demote the session.

use crate::config::ReconnectConfig;
use crate::error::ClientFault;
use crate::events::{EventBus, SessionEvent};
use crate::signaling::{ConnectionCallback, ConnectionEvent, FaultSink};
use crate::state::{ExecutableState, FacetState};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A client the monitor can bring back
#[async_trait]
pub trait Reconnectable: Send + Sync {
    fn name(&self) -> &str;

    async fn reconnect(&self) -> Result<()>;
}

/// Backoff policy for reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Maximum number of reconnection attempts (default: 5)
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff (default: true)
    pub jitter_enabled: bool,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectionPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_initial_ms: config.backoff_initial_ms,
            backoff_max_ms: config.backoff_max_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_enabled: true,
        }
    }

    /// Backoff before the given attempt (0-indexed), with up to 25% jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        let final_ms = if self.jitter_enabled && backoff_ms > 0.0 {
            backoff_ms + rand::thread_rng().gen_range(0.0..backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

struct Shared {
    policy: ReconnectionPolicy,
    targets: Vec<Arc<dyn Reconnectable>>,
    events: EventBus,
    faults: Option<FaultSink>,
    facet: Mutex<FacetState>,
    failed: Mutex<HashSet<String>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

/// Watches signaling connections and reconnects failed clients
#[derive(Clone)]
pub struct FailoverMonitor {
    shared: Arc<Shared>,
}

impl FailoverMonitor {
    pub fn new(
        policy: ReconnectionPolicy,
        targets: Vec<Arc<dyn Reconnectable>>,
        events: EventBus,
        faults: Option<FaultSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                targets,
                events,
                faults,
                facet: Mutex::new(FacetState::default()),
                failed: Mutex::new(HashSet::new()),
                recovery: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ExecutableState {
        self.shared.facet.lock().current()
    }

    pub fn is_recovering(&self) -> bool {
        self.shared
            .recovery
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Begin watching; failures before this are ignored
    pub fn start(&self) -> Result<()> {
        let mut facet = self.shared.facet.lock();
        if facet.is(ExecutableState::Created) {
            facet.transition(ExecutableState::Initialized)?;
        }
        facet.transition(ExecutableState::Starting)?;
        facet.transition(ExecutableState::Started)?;
        Ok(())
    }

    /// Stop watching and abort any recovery in progress
    pub fn stop(&self) -> Result<()> {
        if let Some(task) = self.shared.recovery.lock().take() {
            task.abort();
        }
        self.shared.failed.lock().clear();

        let mut facet = self.shared.facet.lock();
        if facet.is(ExecutableState::Started) {
            facet.transition(ExecutableState::Stopping)?;
            facet.transition(ExecutableState::Stopped)?;
        }
        Ok(())
    }

    /// Connection callback feeding this monitor
    pub fn connection_callback(&self) -> ConnectionCallback {
        let monitor = self.clone();
        Arc::new(move |name, event| match event {
            ConnectionEvent::Connected => monitor.client_connected(name),
            ConnectionEvent::Closed => monitor.client_failed(name),
            ConnectionEvent::Failed(reason) => {
                warn!("{} client failed: {}", name, reason);
                monitor.client_failed(name);
            }
        })
    }

    /// A client lost its connection
    pub fn client_failed(&self, name: &str) {
        if !self.shared.facet.lock().is(ExecutableState::Started) {
            debug!("Ignoring failure of {} client, monitor not started", name);
            return;
        }

        self.shared.failed.lock().insert(name.to_string());

        let mut recovery = self.shared.recovery.lock();
        if recovery.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        info!("{} client failed, starting recovery", name);
        self.shared.events.publish(SessionEvent::Reconnecting {
            client: name.to_string(),
        });

        *recovery = Some(tokio::spawn(Self::recover(self.shared.clone())));
    }

    /// A client (re)established its connection
    pub fn client_connected(&self, name: &str) {
        if self.shared.failed.lock().remove(name) {
            info!("{} client reconnected", name);
            self.shared.events.publish(SessionEvent::Reconnected {
                client: name.to_string(),
            });
        }
    }

    async fn recover(shared: Arc<Shared>) {
        let mut attempt = 0;

        loop {
            let pending: Vec<Arc<dyn Reconnectable>> = {
                let failed = shared.failed.lock();
                shared
                    .targets
                    .iter()
                    .filter(|t| failed.contains(t.name()))
                    .cloned()
                    .collect()
            };

            if pending.is_empty() {
                // A failure reported after the check above sees this task
                // still running, so only exit once the handle is cleared
                // with nothing failed.
                let mut recovery = shared.recovery.lock();
                let mut failed = shared.failed.lock();
                failed.retain(|name| shared.targets.iter().any(|t| t.name() == name));
                if failed.is_empty() {
                    recovery.take();
                    debug!("Recovery finished after {} attempts", attempt);
                    return;
                }
                continue;
            }

            if !shared.policy.should_retry(attempt) {
                break;
            }

            let backoff = shared.policy.calculate_backoff(attempt);
            debug!("Reconnection attempt {} in {:?}", attempt + 1, backoff);
            tokio::time::sleep(backoff).await;

            for target in pending {
                match target.reconnect().await {
                    Ok(()) => {
                        if shared.failed.lock().remove(target.name()) {
                            info!("{} client reconnected", target.name());
                            shared.events.publish(SessionEvent::Reconnected {
                                client: target.name().to_string(),
                            });
                        }
                    }
                    Err(e) => warn!("Reconnect {} client failed: {}", target.name(), e),
                }
            }

            attempt += 1;
        }

        let failed: Vec<String> = shared.failed.lock().drain().collect();
        for client in failed {
            error!("Giving up on {} client after {} attempts", client, attempt);
            shared.events.publish(SessionEvent::ReconnectFailed {
                client: client.clone(),
            });
            if let Some(faults) = &shared.faults {
                let _ = faults.send(ClientFault::handler(format!(
                    "Reconnection of {} client failed",
                    client
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct Flaky {
        name: String,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl Flaky {
        fn new(name: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Reconnectable for Flaky {
        fn name(&self) -> &str {
            &self.name
        }

        async fn reconnect(&self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(crate::Error::Network("refused".to_string()));
            }
            Ok(())
        }
    }

    fn fast_policy(max_retries: u32) -> ReconnectionPolicy {
        ReconnectionPolicy {
            max_retries,
            backoff_initial_ms: 1,
            backoff_max_ms: 5,
            backoff_multiplier: 2.0,
            jitter_enabled: false,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectionPolicy {
            jitter_enabled: false,
            ..Default::default()
        };
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.calculate_backoff(10), Duration::from_millis(30000));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = ReconnectionPolicy::default();
        let backoff = policy.calculate_backoff(0);
        assert!(backoff >= Duration::from_millis(1000));
        assert!(backoff <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_recovers_failed_client() {
        let target = Flaky::new("janus", 2);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let monitor = FailoverMonitor::new(fast_policy(5), vec![target.clone()], events, None);

        monitor.start().unwrap();
        monitor.client_failed("janus");

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Reconnecting {
                client: "janus".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Reconnected {
                client: "janus".to_string()
            }
        );
        assert_eq!(target.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_and_reports_fault() {
        let target = Flaky::new("stream-state", u32::MAX);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (faults, mut fault_rx) = mpsc::unbounded_channel();
        let monitor =
            FailoverMonitor::new(fast_policy(2), vec![target.clone()], events, Some(faults));

        monitor.start().unwrap();
        monitor.client_failed("stream-state");

        let fault = fault_rx.recv().await.unwrap();
        assert_eq!(fault.kind, crate::error::FaultKind::Handler);
        assert_eq!(target.attempts.load(Ordering::SeqCst), 2);

        let _reconnecting = rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::ReconnectFailed {
                client: "stream-state".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_after_recovery_starts_new_recovery() {
        let target = Flaky::new("janus", 0);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let monitor = FailoverMonitor::new(fast_policy(5), vec![target.clone()], events, None);
        monitor.start().unwrap();

        for round in 1..=2 {
            monitor.client_failed("janus");
            assert_eq!(
                rx.recv().await.unwrap(),
                SessionEvent::Reconnecting {
                    client: "janus".to_string()
                }
            );
            assert_eq!(
                rx.recv().await.unwrap(),
                SessionEvent::Reconnected {
                    client: "janus".to_string()
                }
            );
            assert_eq!(target.attempts.load(Ordering::SeqCst), round);

            tokio::time::timeout(Duration::from_secs(1), async {
                while monitor.is_recovering() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            assert!(monitor.shared.recovery.lock().is_none());
        }
    }

    #[tokio::test]
    async fn test_failures_ignored_until_started() {
        let target = Flaky::new("janus", 0);
        let monitor = FailoverMonitor::new(fast_policy(5), vec![target.clone()], EventBus::default(), None);

        monitor.client_failed("janus");
        assert!(!monitor.is_recovering());

        monitor.start().unwrap();
        monitor.stop().unwrap();
        monitor.client_failed("janus");
        assert!(!monitor.is_recovering());
        assert_eq!(monitor.state(), ExecutableState::Stopped);
    }
}
