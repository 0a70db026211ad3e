#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::enforcement::{
    EnforcementHandle, EnforcementRequest, EnforcementService, EnforcementSettings, Tunnel,
    UsageForegroundProbe,
};
use crate::error::Error;
use crate::firewall::{FirewallController, FirewallPreferences, FirewallTimings, ScheduleOutcome};
use crate::notify::{Notification, NotificationAction, Notifier, dispatch_action};
use crate::persistence::{
    AppSettings, KeyValueStore, MemoryKeyValueStore, MemoryTrackedAppStore, SettingsPreferences,
    SqliteKeyValueStore, SqliteTrackedAppStore, TrackedAppStore, open_database,
};
use crate::scheduler::{AUTO_BLOCK_JOB, TokioScheduler, UNBLOCK_EXPIRY_PREFIX};
use crate::sync::BlockListSynchronizer;
use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use usage::{AppStatus, UsageClassifier, UsagePolicy, UsageSource};

const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Platform collaborators.
pub struct Services {
    pub usage: Arc<dyn UsageSource>,
    pub tunnel: Arc<dyn Tunnel>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Backing storage for tracked apps, firewall state and settings.
pub struct Stores {
    pub tracked_apps: Arc<dyn TrackedAppStore>,
    pub firewall: Arc<dyn KeyValueStore>,
    pub settings: Arc<dyn KeyValueStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            tracked_apps: Arc::new(MemoryTrackedAppStore::new()),
            firewall: Arc::new(MemoryKeyValueStore::default()),
            settings: Arc::new(MemoryKeyValueStore::default()),
        }
    }

    /// SQLite-backed stores when a state path is configured, memory otherwise.
    pub async fn open(config: &config::Persistence) -> Result<Self, Error> {
        let Some(path) = &config.state_path else {
            debug!("no state path, keeping state in memory");
            return Ok(Self::memory());
        };
        let pool = open_database(path).await?;
        Ok(Self {
            tracked_apps: Arc::new(SqliteTrackedAppStore::open(pool.clone()).await?),
            firewall: Arc::new(SqliteKeyValueStore::new(pool.clone(), "firewall")),
            settings: Arc::new(SqliteKeyValueStore::new(pool, "settings")),
        })
    }
}

#[derive(Debug)]
pub enum ControlEvent {
    Reload(Config),
    DumpState,
    Action(NotificationAction),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub updated: usize,
    pub removed: usize,
    pub reminders: usize,
    pub recommendations: usize,
    pub pushed: bool,
}

pub struct SilentPort {
    config: Config,
    services: Services,
    classifier: UsageClassifier,
    tracked_apps: Arc<dyn TrackedAppStore>,
    settings: Arc<SettingsPreferences>,
    controller: Arc<FirewallController>,
    synchronizer: BlockListSynchronizer,
    jobs: flume::Receiver<String>,
    enforcement: Option<(EnforcementService, flume::Receiver<EnforcementRequest>)>,
}

impl SilentPort {
    /// Wire every component. Must be called from within a tokio runtime.
    pub async fn build(config: Config, services: Services, stores: Stores) -> Result<Self, Error> {
        let settings = Arc::new(
            SettingsPreferences::open(stores.settings, config.firewall.default_allow_duration)
                .await,
        );
        let policy = Arc::new(UsagePolicy::new(&config.policy));
        policy.update_thresholds(settings.current().allow_duration);
        let classifier = UsageClassifier::new(policy, &config);

        let (scheduler, jobs) = TokioScheduler::new();
        let (handle, requests) = EnforcementHandle::channel();
        let controller = Arc::new(FirewallController::new(
            FirewallPreferences::open(stores.firewall).await,
            Arc::new(scheduler),
            Arc::new(handle),
            Arc::clone(&services.clock),
            FirewallTimings::from(&config.firewall),
        ));

        let probe = UsageForegroundProbe::new(
            Arc::clone(&services.usage),
            Arc::clone(&services.clock),
            config.firewall.foreground_lookback,
            tokio::runtime::Handle::current(),
        );
        let service = EnforcementService::new(
            EnforcementSettings::from(&config.firewall),
            Arc::clone(&services.tunnel),
            Arc::new(probe),
            Arc::clone(&services.notifier),
            Arc::clone(&services.clock),
        );

        let synchronizer = BlockListSynchronizer::new(
            Arc::clone(&controller),
            Arc::clone(&services.clock),
            &config.firewall,
        );

        Ok(Self {
            config,
            services,
            classifier,
            tracked_apps: stores.tracked_apps,
            settings,
            controller,
            synchronizer,
            jobs,
            enforcement: Some((service, requests)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &Arc<FirewallController> {
        &self.controller
    }

    pub fn settings(&self) -> &Arc<SettingsPreferences> {
        &self.settings
    }

    pub fn tracked_apps(&self) -> &Arc<dyn TrackedAppStore> {
        &self.tracked_apps
    }

    pub fn policy(&self) -> &Arc<UsagePolicy> {
        self.classifier.policy()
    }

    /// Re-read durable state and re-apply it: thresholds, enforcement and timers.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<Option<ScheduleOutcome>, Error> {
        let settings = self.settings.refresh().await;
        self.policy().update_thresholds(settings.allow_duration);
        self.controller.restore().await
    }

    /// One classification pass followed by a block-list sync.
    #[instrument(skip_all)]
    pub async fn refresh_usage(&self) -> Result<PassReport, Error> {
        let source = self.services.usage.as_ref();
        if !source.has_usage_access().await {
            return Err(usage::Error::PermissionMissing.into());
        }

        let now = self.services.clock.now();
        let previous = self.tracked_apps.all().await?;
        let evaluation = self.classifier.evaluate(source, &previous, now).await?;
        self.tracked_apps.apply(&evaluation).await?;

        let thresholds = self.policy().thresholds();
        for app in &evaluation.apps_to_notify {
            self.services
                .notifier
                .notify(Notification::disable_reminder(app, thresholds.warning));
        }
        for app in &evaluation.apps_for_disable_recommendation {
            self.services
                .notifier
                .notify(Notification::disable_recommendation(app, thresholds.disable));
        }

        let pushed = self.sync_block_list().await?;
        let report = PassReport {
            updated: evaluation.updates.len(),
            removed: evaluation.packages_to_remove.len(),
            reminders: evaluation.apps_to_notify.len(),
            recommendations: evaluation.apps_for_disable_recommendation.len(),
            pushed,
        };
        info!(?report, "usage pass complete");
        Ok(report)
    }

    pub async fn sync_block_list(&self) -> Result<bool, Error> {
        let apps = self.tracked_apps.all().await?;
        self.synchronizer
            .sync(&apps, &self.settings.current())
            .await
    }

    /// Route a fired job to its handler.
    #[instrument(skip(self))]
    pub async fn handle_job(&self, name: &str) -> Result<(), Error> {
        if name == AUTO_BLOCK_JOB {
            self.controller.auto_block().await?;
        } else if let Some(package) = name.strip_prefix(UNBLOCK_EXPIRY_PREFIX) {
            debug!(%package, "temporary unblock expired");
            self.synchronizer.invalidate().await;
            self.sync_block_list().await?;
        } else {
            warn!("unknown job");
        }
        Ok(())
    }

    pub async fn dispatch(&self, action: NotificationAction) -> Result<(), Error> {
        dispatch_action(&self.controller, &self.settings.current(), action).await
    }

    /// Run periodic passes and react to jobs, settings and state changes
    /// until the cancellation token is triggered.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<(), Error> {
        if let Some((service, requests)) = self.enforcement.take() {
            tokio::spawn(service.run_until(cancel.child_token(), requests));
        }
        if let Some(outcome) = self.restore().await? {
            debug!(?outcome, "auto block re-armed");
        }

        let mut period = self.sync_period();
        let mut interval = self.interval(period).await;
        let jobs = self.jobs.clone();
        let mut settings_rx = self.settings.subscribe();
        let mut tracked_rx = self.tracked_apps.subscribe();
        let mut firewall_rx = self.controller.subscribe();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                Some(event) = control_rx.recv() => {
                    self.handle_control(event).await;
                    if self.sync_period() != period {
                        period = self.sync_period();
                        interval = self.interval(period).await;
                    }
                }
                _ = interval.tick() => {
                    log_pass(self.refresh_usage().await);
                }
                Ok(name) = jobs.recv_async() => {
                    if let Err(err) = self.handle_job(&name).await {
                        error!(job = %name, %err, "job failed");
                    }
                }
                Ok(()) = settings_rx.changed() => {
                    let settings = *settings_rx.borrow_and_update();
                    self.on_settings_changed(settings).await;
                }
                Ok(()) = tracked_rx.changed() => {
                    let apps = Arc::clone(&tracked_rx.borrow_and_update());
                    self.sync_with(&apps).await;
                }
                Ok(()) = firewall_rx.changed() => {
                    firewall_rx.mark_unchanged();
                    let apps = Arc::clone(&tracked_rx.borrow());
                    self.sync_with(&apps).await;
                }
            }
        }

        Ok(())
    }

    fn sync_period(&self) -> Duration {
        self.config.engine.sync_interval.max(MIN_SYNC_INTERVAL)
    }

    async fn interval(&self, period: Duration) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.engine.run_on_start {
            interval.tick().await;
        }
        interval
    }

    async fn sync_with(&self, apps: &[usage::TrackedApp]) {
        if let Err(err) = self.synchronizer.sync(apps, &self.settings.current()).await {
            error!(%err, "block list sync failed");
        }
    }

    async fn on_settings_changed(&self, settings: AppSettings) {
        if self.policy().update_thresholds(settings.allow_duration) {
            info!(allow = ?settings.allow_duration, "thresholds follow new allow duration");
            log_pass(self.refresh_usage().await);
        } else if let Err(err) = self.sync_block_list().await {
            error!(%err, "block list sync failed");
        }
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Reload(config) => self.reload(config).await,
            ControlEvent::DumpState => self.dump_state().await,
            ControlEvent::Action(action) => {
                if let Err(err) = self.dispatch(action).await {
                    error!(%err, "notification action failed");
                }
            }
        }
    }

    async fn reload(&mut self, mut config: Config) {
        if config.persistence != self.config.persistence {
            warn!(
                current = ?self.config.persistence.state_path,
                requested = ?config.persistence.state_path,
                "ignoring state_path change during reload"
            );
            config.persistence = self.config.persistence.clone();
        }
        if config.firewall != self.config.firewall {
            warn!("firewall settings change takes effect after restart");
            config.firewall = self.config.firewall.clone();
        }

        let policy = Arc::new(UsagePolicy::new(&config.policy));
        policy.update_thresholds(self.settings.current().allow_duration);
        self.classifier = UsageClassifier::new(policy, &config);
        self.config = config;
        info!("config reloaded");

        // another process may have edited the state
        if let Err(err) = self.restore().await {
            error!(%err, "failed to restore state after reload");
        }
    }

    async fn dump_state(&self) {
        let firewall = self.controller.state();
        let settings = self.settings.current();
        let thresholds = self.policy().thresholds();
        let apps = self.tracked_apps.subscribe().borrow().clone();
        let count = |status: AppStatus| apps.iter().filter(|app| app.status == status).count();
        info!(
            phase = ?firewall.phase(),
            blocked = ?firewall.blocked_packages,
            whitelisted = ?firewall.whitelisted_packages,
            unblocks = ?firewall.temporary_unblocks,
            allow = ?settings.allow_duration,
            manual_unblock = settings.manual_firewall_unblock,
            ?thresholds,
            recent = count(AppStatus::Recent),
            rare = count(AppStatus::Rare),
            disabled = count(AppStatus::Disabled),
            "state dump"
        );
    }
}

fn log_pass(result: Result<PassReport, Error>) {
    match result {
        Ok(_) => {}
        Err(err) if err.is_permission_missing() => {
            warn!("usage access not granted, pass skipped");
        }
        Err(err) => error!(%err, "usage pass failed, retrying next interval"),
    }
}
