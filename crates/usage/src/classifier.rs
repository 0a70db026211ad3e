#![forbid(unsafe_code)]

use crate::source::last_foreground;
use crate::{
    AppStatus, Error, Evaluation, InstalledApp, Thresholds, Timestamp, TrackedApp, UsagePolicy,
    UsageSource, millis,
};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};

#[derive(Debug)]
pub struct UsageClassifier {
    policy: Arc<UsagePolicy>,
    self_package: String,
    lookback: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classified {
    pub(crate) app: TrackedApp,
    pub(crate) notify: bool,
    pub(crate) recommend: bool,
}

impl UsageClassifier {
    pub fn new(policy: Arc<UsagePolicy>, config: &config::Config) -> Self {
        Self {
            policy,
            self_package: config.firewall.self_package.clone(),
            lookback: config.policy.usage_lookback,
        }
    }

    pub fn policy(&self) -> &Arc<UsagePolicy> {
        &self.policy
    }

    /// Whether `package_name` takes part in classification at all.
    pub fn accepts(&self, package_name: &str) -> bool {
        package_name != self.self_package && self.policy.is_eligible(package_name)
    }

    /// Run one classification pass against `previous` rows.
    ///
    /// The caller is responsible for checking usage access first. A failed
    /// lookup of a single package leaves its row untouched.
    #[instrument(skip_all, fields(previous = previous.len()))]
    pub async fn evaluate(
        &self,
        source: &dyn UsageSource,
        previous: &[TrackedApp],
        now: Timestamp,
    ) -> Result<Evaluation, Error> {
        let thresholds = self.policy.thresholds();

        let mut candidates: BTreeMap<String, InstalledApp> = source
            .installed_applications()
            .await?
            .into_iter()
            .filter(|app| self.accepts(&app.package_name))
            .map(|app| (app.package_name.clone(), app))
            .collect();

        let mut removed = Vec::new();
        for row in previous {
            let name = &row.package_name;
            if candidates.contains_key(name) {
                continue;
            }
            if !self.accepts(name) {
                removed.push(name.clone());
                continue;
            }
            // not in the visible listing; disabled packages usually land here
            match source.package_info(name).await {
                Ok(Some(info)) => {
                    candidates.insert(name.clone(), info);
                }
                Ok(None) => removed.push(name.clone()),
                Err(err) => warn!(package = %name, %err, "package lookup failed, skipping"),
            }
        }

        let window = self.lookback.max(thresholds.disable);
        let events = source
            .foreground_events(now.saturating_sub(millis(window)), now)
            .await?;
        let last_seen = last_foreground(&events);
        let previous: HashMap<&str, &TrackedApp> = previous
            .iter()
            .map(|row| (row.package_name.as_str(), row))
            .collect();

        let mut evaluation = Evaluation {
            packages_to_remove: removed.into_iter().sorted().dedup().collect(),
            ..Default::default()
        };
        for (name, app) in &candidates {
            let classified = Self::classify(
                thresholds,
                now,
                app,
                last_seen.get(name).copied(),
                previous.get(name.as_str()).copied(),
            );
            if classified.notify {
                evaluation.apps_to_notify.push(classified.app.clone());
            }
            if classified.recommend {
                evaluation
                    .apps_for_disable_recommendation
                    .push(classified.app.clone());
            }
            evaluation.updates.push(classified.app);
        }

        debug!(
            updates = evaluation.updates.len(),
            removed = evaluation.packages_to_remove.len(),
            notify = evaluation.apps_to_notify.len(),
            recommend = evaluation.apps_for_disable_recommendation.len(),
            "usage evaluated"
        );
        Ok(evaluation)
    }

    pub(crate) fn classify(
        thresholds: Thresholds,
        now: Timestamp,
        app: &InstalledApp,
        last_seen: Option<Timestamp>,
        previous: Option<&TrackedApp>,
    ) -> Classified {
        let last_used_at = last_seen.max(previous.and_then(|row| row.last_used_at));
        // a package that was never used ages from its install time
        let idle = last_used_at
            .or(app.installed_at)
            .map(|since| Duration::from_millis(now.saturating_sub(since)));

        let status = if app.is_disabled {
            AppStatus::Disabled
        } else if idle.is_some_and(|idle| idle <= thresholds.recent) {
            AppStatus::Recent
        } else {
            AppStatus::Rare
        };

        let app_label = app
            .label
            .clone()
            .or_else(|| previous.map(|row| row.app_label.clone()))
            .unwrap_or_else(|| app.package_name.clone());

        let mut notified_at = previous.and_then(|row| row.notified_at);
        let mut scheduled_disable_at = previous.and_then(|row| row.scheduled_disable_at);
        let mut notify = false;
        let mut recommend = false;

        if let (false, Some(idle)) = (app.is_disabled, idle) {
            if idle <= thresholds.warning {
                notified_at = None;
                scheduled_disable_at = None;
            } else if idle <= thresholds.disable {
                let was_recent = previous.is_none_or(|row| row.status == AppStatus::Recent);
                let cooled_down = notified_at
                    .is_none_or(|at| now.saturating_sub(at) > millis(thresholds.warning));
                if was_recent && cooled_down {
                    notify = true;
                    notified_at = Some(now);
                }
            } else if scheduled_disable_at.is_none() {
                recommend = true;
                scheduled_disable_at = Some(now);
            }
        }

        Classified {
            app: TrackedApp {
                package_name: app.package_name.clone(),
                app_label,
                last_used_at,
                status,
                is_disabled: app.is_disabled,
                scheduled_disable_at,
                notified_at,
            },
            notify,
            recommend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HOUR: u64 = 60 * 60 * 1000;
    const DAY: u64 = 24 * HOUR;
    const NOW: Timestamp = 100 * DAY;

    fn thresholds() -> Thresholds {
        Thresholds::derive(Duration::from_millis(4 * DAY))
    }

    #[test]
    fn recently_used_is_recent() {
        let app = InstalledApp::new("org.example.mail");
        let out = UsageClassifier::classify(thresholds(), NOW, &app, Some(NOW - HOUR), None);
        assert_eq!(out.app.status, AppStatus::Recent);
        assert_eq!(out.app.last_used_at, Some(NOW - HOUR));
        assert_eq!(out.app.app_label, "org.example.mail");
        assert!(!out.notify && !out.recommend);
    }

    #[test]
    fn fresh_install_without_use_is_recent() {
        let app = InstalledApp::new("org.example.new").installed_at(NOW - DAY);
        let out = UsageClassifier::classify(thresholds(), NOW, &app, None, None);
        assert_eq!(out.app.status, AppStatus::Recent);
        assert_eq!(out.app.last_used_at, None);
    }

    #[test]
    fn unknown_history_is_rare_without_reminders() {
        let app = InstalledApp::new("org.example.old");
        let out = UsageClassifier::classify(thresholds(), NOW, &app, None, None);
        assert_eq!(out.app.status, AppStatus::Rare);
        assert!(!out.notify && !out.recommend);
    }

    #[test]
    fn disabled_wins_over_usage() {
        let app = InstalledApp::new("org.example.off").disabled();
        let out = UsageClassifier::classify(thresholds(), NOW, &app, Some(NOW - 10 * DAY), None);
        assert_eq!(out.app.status, AppStatus::Disabled);
        assert!(out.app.is_disabled);
        assert!(!out.recommend);
    }

    #[test]
    fn falls_back_to_tracked_last_use() {
        let app = InstalledApp::new("org.example.maps");
        let previous = TrackedApp::new("org.example.maps", AppStatus::Recent)
            .with_label("Maps")
            .with_last_used(NOW - 2 * HOUR);
        let out = UsageClassifier::classify(thresholds(), NOW, &app, None, Some(&previous));
        assert_eq!(out.app.last_used_at, Some(NOW - 2 * HOUR));
        assert_eq!(out.app.app_label, "Maps");

        // an older event never moves the timestamp backwards
        let out =
            UsageClassifier::classify(thresholds(), NOW, &app, Some(NOW - DAY), Some(&previous));
        assert_eq!(out.app.last_used_at, Some(NOW - 2 * HOUR));
    }

    #[test]
    fn warning_fires_once_per_window() {
        let app = InstalledApp::new("org.example.game");
        let previous =
            TrackedApp::new("org.example.game", AppStatus::Recent).with_last_used(NOW - 3 * DAY - HOUR);
        let first = UsageClassifier::classify(thresholds(), NOW, &app, None, Some(&previous));
        assert!(first.notify);
        assert_eq!(first.app.notified_at, Some(NOW));
        assert_eq!(first.app.status, AppStatus::Recent);

        let second =
            UsageClassifier::classify(thresholds(), NOW + HOUR, &app, None, Some(&first.app));
        assert!(!second.notify);
        assert_eq!(second.app.notified_at, Some(NOW));
    }

    #[test]
    fn warning_needs_recent_or_unknown_previous_status() {
        let app = InstalledApp::new("org.example.game");
        let previous =
            TrackedApp::new("org.example.game", AppStatus::Rare).with_last_used(NOW - 3 * DAY - HOUR);
        let out = UsageClassifier::classify(thresholds(), NOW, &app, None, Some(&previous));
        assert!(!out.notify);
    }

    #[test]
    fn disable_recommendation_is_stamped_once() {
        let app = InstalledApp::new("org.example.game");
        let previous =
            TrackedApp::new("org.example.game", AppStatus::Recent).with_last_used(NOW - 5 * DAY);
        let first = UsageClassifier::classify(thresholds(), NOW, &app, None, Some(&previous));
        assert!(first.recommend);
        assert!(!first.notify);
        assert_eq!(first.app.status, AppStatus::Rare);
        assert_eq!(first.app.scheduled_disable_at, Some(NOW));

        let second =
            UsageClassifier::classify(thresholds(), NOW + DAY, &app, None, Some(&first.app));
        assert!(!second.recommend);
        assert_eq!(second.app.scheduled_disable_at, Some(NOW));
    }

    #[test]
    fn use_resets_reminders() {
        let app = InstalledApp::new("org.example.game");
        let mut previous =
            TrackedApp::new("org.example.game", AppStatus::Rare).with_last_used(NOW - 5 * DAY);
        previous.notified_at = Some(NOW - 2 * DAY);
        previous.scheduled_disable_at = Some(NOW - DAY);
        let out = UsageClassifier::classify(thresholds(), NOW, &app, Some(NOW), Some(&previous));
        assert_eq!(out.app.status, AppStatus::Recent);
        assert_eq!(out.app.notified_at, None);
        assert_eq!(out.app.scheduled_disable_at, None);
    }
}
