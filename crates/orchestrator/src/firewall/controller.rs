#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::enforcement::{Enforcement, EnforcementRequest};
use crate::error::Error;
use crate::firewall::preferences::FirewallPreferences;
use crate::firewall::state::{FirewallPhase, FirewallState, PackageSet};
use crate::scheduler::{AUTO_BLOCK_JOB, JobScheduler, unblock_expiry_job};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};
use usage::{Timestamp, millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirewallTimings {
    pub default_allow: Duration,
    pub temporary_unblock: Duration,
    /// How late an auto-block timer may fire and still be honored.
    pub stale_grace: Duration,
}

impl From<&config::Firewall> for FirewallTimings {
    fn from(config: &config::Firewall) -> Self {
        Self {
            default_allow: config.default_allow_duration,
            temporary_unblock: config.temporary_unblock,
            stale_grace: config.stale_grace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(Duration),
    /// Already due but within the grace period.
    Immediate,
    /// Due too long ago; the allow window is left open.
    Dropped,
}

/// Decide what to do with an auto-block timer due at `reactivate_at`.
pub fn auto_block_schedule(
    reactivate_at: Timestamp,
    now: Timestamp,
    stale_grace: Duration,
) -> ScheduleOutcome {
    if reactivate_at > now {
        ScheduleOutcome::Scheduled(Duration::from_millis(reactivate_at - now))
    } else if now - reactivate_at > millis(stale_grace) {
        ScheduleOutcome::Dropped
    } else {
        ScheduleOutcome::Immediate
    }
}

/// Serializes every firewall transition.
///
/// Each public transition takes the transition lock, re-reads the durable
/// state, persists the result in one write and only then touches timers and
/// enforcement. Nothing here calls another public transition while holding
/// the lock.
pub struct FirewallController {
    prefs: FirewallPreferences,
    scheduler: Arc<dyn JobScheduler>,
    enforcement: Arc<dyn Enforcement>,
    clock: Arc<dyn Clock>,
    timings: FirewallTimings,
    transition: Mutex<()>,
}

impl FirewallController {
    pub fn new(
        prefs: FirewallPreferences,
        scheduler: Arc<dyn JobScheduler>,
        enforcement: Arc<dyn Enforcement>,
        clock: Arc<dyn Clock>,
        timings: FirewallTimings,
    ) -> Self {
        Self {
            prefs,
            scheduler,
            enforcement,
            clock,
            timings,
            transition: Mutex::new(()),
        }
    }

    /// Last committed state, without waiting for a transition in flight.
    pub fn state(&self) -> FirewallState {
        self.prefs.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<FirewallState> {
        self.prefs.subscribe()
    }

    pub fn timings(&self) -> FirewallTimings {
        self.timings
    }

    /// Enable in allowing mode for `allow` (or the default duration).
    #[instrument(skip_all)]
    pub async fn enable(
        &self,
        packages: Option<PackageSet>,
        allow: Option<Duration>,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let duration = allow.unwrap_or(self.timings.default_allow);
        self.allow_locked(current, packages, duration).await
    }

    #[instrument(skip_all, fields(duration = ?duration))]
    pub async fn allow_for_duration(
        &self,
        duration: Duration,
        packages: Option<PackageSet>,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        self.allow_locked(current, packages, duration).await
    }

    async fn allow_locked(
        &self,
        current: FirewallState,
        packages: Option<PackageSet>,
        duration: Duration,
    ) -> Result<FirewallState, Error> {
        let now = self.clock.now();
        let reactivate_at = now.saturating_add(millis(duration));
        let next = FirewallState {
            is_enabled: true,
            is_blocking: false,
            reactivate_at: Some(reactivate_at),
            blocked_packages: packages.unwrap_or_else(|| current.blocked_packages.clone()),
            ..current.clone()
        };
        let next = self.commit(&current, next).await?;

        // an empty block set still gets its timer
        let outcome = self.arm_auto_block(reactivate_at, now);
        self.enforce(&next);
        info!(
            reactivate_at,
            ?outcome,
            blocked = next.blocked_packages.len(),
            "firewall allowing"
        );
        Ok(next)
    }

    #[instrument(skip_all)]
    pub async fn block_now(&self, packages: Option<PackageSet>) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        self.block_locked(current, packages).await
    }

    async fn block_locked(
        &self,
        current: FirewallState,
        packages: Option<PackageSet>,
    ) -> Result<FirewallState, Error> {
        let next = FirewallState {
            is_enabled: true,
            is_blocking: true,
            reactivate_at: None,
            blocked_packages: packages.unwrap_or_else(|| current.blocked_packages.clone()),
            ..current.clone()
        };
        let next = self.commit(&current, next).await?;
        self.scheduler.cancel(AUTO_BLOCK_JOB);
        self.enforce(&next);
        info!(blocked = next.blocked_packages.len(), "firewall blocking");
        Ok(next)
    }

    /// Turn the firewall off. The whitelist survives; everything else resets.
    #[instrument(skip_all)]
    pub async fn disable(&self) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let next = FirewallState {
            whitelisted_packages: current.whitelisted_packages.clone(),
            ..Default::default()
        };
        let next = self.commit(&current, next).await?;
        self.scheduler.cancel(AUTO_BLOCK_JOB);
        for package in current.temporary_unblocks.keys() {
            self.scheduler.cancel(&unblock_expiry_job(package));
        }
        self.enforce(&next);
        info!("firewall disabled");
        Ok(next)
    }

    /// Replace the block set without touching the mode or the timer.
    #[instrument(skip_all, fields(packages = packages.len()))]
    pub async fn apply_manual_block_list(
        &self,
        packages: PackageSet,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let next = FirewallState {
            is_enabled: true,
            blocked_packages: packages,
            ..current.clone()
        }
        .normalized();
        if next == current {
            debug!("manual block list unchanged");
            return Ok(current);
        }
        self.prefs.write(&next).await?;
        self.enforce(&next);
        info!(blocked = next.blocked_packages.len(), "manual block list applied");
        Ok(next)
    }

    /// Replace the block set minus live temporary unblocks and the whitelist.
    ///
    /// Expired unblocks are pruned. Enforcement is only re-issued when the
    /// firewall is enabled and the effective block set changed.
    #[instrument(skip_all, fields(packages = packages.len()))]
    pub async fn update_blocked_packages(
        &self,
        packages: PackageSet,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let now = self.clock.now();

        let mut next = current.clone();
        next.temporary_unblocks.retain(|_, expiry| *expiry > now);
        next.blocked_packages = packages
            .into_iter()
            .filter(|package| !current.is_temporarily_unblocked(package, now))
            .collect();
        let next = next.normalized();
        if next == current {
            debug!("block set unchanged");
            return Ok(current);
        }

        self.prefs.write(&next).await?;
        if current.is_enabled && next.blocked_packages != current.blocked_packages {
            self.enforce(&next);
        }
        debug!(blocked = next.blocked_packages.len(), "block set updated");
        Ok(next)
    }

    /// Let `package` through for `duration` (or the default unblock period).
    #[instrument(skip(self, duration))]
    pub async fn temporarily_unblock(
        &self,
        package: &str,
        duration: Option<Duration>,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let duration = duration.unwrap_or(self.timings.temporary_unblock);
        let now = self.clock.now();
        let expiry = now.saturating_add(millis(duration));

        let mut next = current.clone();
        next.temporary_unblocks.retain(|_, at| *at > now);
        next.temporary_unblocks.insert(package.to_owned(), expiry);
        next.blocked_packages.remove(package);
        let next = self.commit(&current, next).await?;

        self.scheduler
            .schedule_once(&unblock_expiry_job(package), duration);
        if current.is_enabled && next.blocked_packages != current.blocked_packages {
            self.enforce(&next);
        }
        info!(expiry, "package temporarily unblocked");
        Ok(next)
    }

    /// Replace the whitelist, pruning newly whitelisted packages from the block set.
    #[instrument(skip_all, fields(packages = packages.len()))]
    pub async fn update_whitelisted_packages(
        &self,
        packages: PackageSet,
    ) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let next = FirewallState {
            whitelisted_packages: packages,
            ..current.clone()
        };
        let next = self.commit(&current, next).await?;
        if current.is_enabled && next.blocked_packages != current.blocked_packages {
            self.enforce(&next);
        }
        Ok(next)
    }

    /// Fired when the allow window ends.
    ///
    /// Only blocks once the persisted deadline has passed. A firing left over
    /// from a replaced window re-arms the timer for the current deadline.
    #[instrument(skip_all)]
    pub async fn auto_block(&self) -> Result<FirewallState, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let now = self.clock.now();
        match current.phase() {
            FirewallPhase::Allowing {
                reactivate_at: Some(at),
            } if at <= now => self.block_locked(current, None).await,
            FirewallPhase::Allowing {
                reactivate_at: Some(at),
            } => {
                let outcome = self.arm_auto_block(at, now);
                debug!(reactivate_at = at, now, ?outcome, "early auto block, re-armed");
                Ok(current)
            }
            phase => {
                debug!(?phase, "auto block ignored");
                Ok(current)
            }
        }
    }

    /// Re-apply persisted state after a restart: enforcement, the auto-block
    /// timer and pending unblock expiries.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<Option<ScheduleOutcome>, Error> {
        let _guard = self.transition.lock().await;
        let current = self.prefs.refresh().await?;
        let now = self.clock.now();

        for (package, expiry) in current.active_unblocks(now) {
            self.scheduler
                .schedule_once(&unblock_expiry_job(package), Duration::from_millis(expiry - now));
        }

        let outcome = match current.phase() {
            FirewallPhase::Allowing {
                reactivate_at: Some(at),
            } => Some(self.arm_auto_block(at, now)),
            _ => None,
        };
        self.enforce(&current);
        info!(phase = ?current.phase(), ?outcome, "firewall restored");
        Ok(outcome)
    }

    async fn commit(
        &self,
        current: &FirewallState,
        next: FirewallState,
    ) -> Result<FirewallState, Error> {
        let next = next.normalized();
        if next != *current {
            self.prefs.write(&next).await?;
        }
        Ok(next)
    }

    fn arm_auto_block(&self, reactivate_at: Timestamp, now: Timestamp) -> ScheduleOutcome {
        let outcome = auto_block_schedule(reactivate_at, now, self.timings.stale_grace);
        match outcome {
            ScheduleOutcome::Scheduled(delay) => {
                self.scheduler.schedule_once(AUTO_BLOCK_JOB, delay);
            }
            ScheduleOutcome::Immediate => {
                self.scheduler.schedule_once(AUTO_BLOCK_JOB, Duration::ZERO);
            }
            ScheduleOutcome::Dropped => {
                self.scheduler.cancel(AUTO_BLOCK_JOB);
                warn!(reactivate_at, now, "auto block timer is stale, dropping it");
            }
        }
        outcome
    }

    fn enforce(&self, state: &FirewallState) {
        self.enforcement
            .submit(EnforcementRequest::from_state(state));
    }
}
