#![allow(dead_code)]

use orchestrator::Error;
use orchestrator::clock::ManualClock;
use orchestrator::enforcement::{Enforcement, EnforcementRequest};
use orchestrator::firewall::{
    FirewallController, FirewallPreferences, FirewallState, FirewallTimings, PackageSet,
};
use orchestrator::persistence::{Edit, KeyValueStore, MemoryKeyValueStore, Preferences};
use orchestrator::scheduler::JobScheduler;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const START: u64 = 1_700_000_000_000;

pub fn set(items: &[&str]) -> PackageSet {
    items.iter().map(|s| s.to_string()).collect()
}

/// Keeps pending jobs in a map instead of running timers.
#[derive(Default)]
pub struct RecordingScheduler {
    pending: Mutex<BTreeMap<String, Duration>>,
}

impl RecordingScheduler {
    pub fn pending(&self, name: &str) -> Option<Duration> {
        self.pending.lock().get(name).copied()
    }
}

impl JobScheduler for RecordingScheduler {
    fn schedule_once(&self, name: &str, delay: Duration) {
        self.pending.lock().insert(name.to_owned(), delay);
    }

    fn cancel(&self, name: &str) {
        self.pending.lock().remove(name);
    }
}

#[derive(Default)]
pub struct RecordingEnforcement(Mutex<Vec<EnforcementRequest>>);

impl RecordingEnforcement {
    pub fn requests(&self) -> Vec<EnforcementRequest> {
        self.0.lock().clone()
    }

    pub fn last(&self) -> Option<EnforcementRequest> {
        self.0.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.0.lock().len()
    }
}

impl Enforcement for RecordingEnforcement {
    fn submit(&self, request: EnforcementRequest) {
        self.0.lock().push(request);
    }
}

/// A store that can be told to reject writes.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryKeyValueStore,
    pub failing: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl KeyValueStore for FlakyStore {
    async fn load(&self) -> Result<Preferences, Error> {
        self.inner.load().await
    }

    async fn edit(&self, edits: Vec<Edit>) -> Result<(), Error> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.edit(edits).await
    }
}

pub struct Harness {
    pub controller: Arc<FirewallController>,
    pub scheduler: Arc<RecordingScheduler>,
    pub enforcement: Arc<RecordingEnforcement>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn KeyValueStore>,
}

pub fn timings() -> FirewallTimings {
    FirewallTimings::from(&config::Firewall::default())
}

pub async fn harness() -> Harness {
    harness_on(Arc::new(MemoryKeyValueStore::default())).await
}

pub async fn harness_on(store: Arc<dyn KeyValueStore>) -> Harness {
    let scheduler = Arc::new(RecordingScheduler::default());
    let enforcement = Arc::new(RecordingEnforcement::default());
    let clock = Arc::new(ManualClock::new(START));
    let controller = Arc::new(FirewallController::new(
        FirewallPreferences::open(Arc::clone(&store)).await,
        scheduler.clone(),
        enforcement.clone(),
        clock.clone(),
        timings(),
    ));
    Harness {
        controller,
        scheduler,
        enforcement,
        clock,
        store,
    }
}

/// A harness whose durable state starts out as `state`.
pub async fn harness_with(state: &FirewallState) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
    FirewallPreferences::open(Arc::clone(&store))
        .await
        .write(state)
        .await
        .unwrap();
    harness_on(store).await
}

/// Structural invariants every committed state must satisfy.
pub fn assert_invariants(state: &FirewallState) {
    assert!(
        state
            .blocked_packages
            .is_disjoint(&state.whitelisted_packages),
        "whitelisted package blocked: {state:?}"
    );
    if state.is_blocking {
        assert!(state.is_enabled, "blocking while disabled: {state:?}");
        assert_eq!(state.reactivate_at, None, "blocking with timer: {state:?}");
    }
}
