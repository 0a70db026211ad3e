#![forbid(unsafe_code)]

use async_trait::async_trait;
use config::Config;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use usage::{
    AppStatus, Error, ForegroundEvent, InstalledApp, StaticUsageSource, Timestamp, TrackedApp,
    UsageClassifier, UsagePolicy, UsageSnapshot, UsageSource,
};

const HOUR: u64 = 60 * 60 * 1000;
const DAY: u64 = 24 * HOUR;
const NOW: u64 = 200 * DAY;

fn event(package: &str, timestamp: u64) -> ForegroundEvent {
    ForegroundEvent {
        package_name: package.into(),
        timestamp,
    }
}

fn classifier() -> UsageClassifier {
    let config = Config::default();
    UsageClassifier::new(Arc::new(UsagePolicy::new(&config.policy)), &config)
}

#[tokio::test]
async fn pass_classifies_filters_and_removes() {
    let config = Config::default();
    let source = StaticUsageSource::new(UsageSnapshot {
        usage_access: true,
        apps: vec![
            InstalledApp::new("org.example.chat"),
            InstalledApp::new("org.example.game"),
            InstalledApp::new("org.example.off").disabled(),
            InstalledApp::new("org.telegram.messenger"),
            InstalledApp::new(config.firewall.self_package.clone()),
        ],
        events: vec![
            event("org.example.chat", NOW - HOUR),
            event("org.example.game", NOW - 10 * DAY),
            event(&config.firewall.self_package, NOW),
        ],
    });
    let previous = vec![
        TrackedApp::new("org.example.gone", AppStatus::Rare),
        TrackedApp::new("org.telegram.messenger", AppStatus::Recent),
    ];

    let evaluation = classifier().evaluate(&source, &previous, NOW).await.unwrap();

    let statuses: Vec<_> = evaluation
        .updates
        .iter()
        .map(|app| (app.package_name.as_str(), app.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("org.example.chat", AppStatus::Recent),
            ("org.example.game", AppStatus::Rare),
            ("org.example.off", AppStatus::Disabled),
        ]
    );
    assert_eq!(
        evaluation.packages_to_remove,
        vec!["org.example.gone".to_string(), "org.telegram.messenger".to_string()]
    );
    let recommended: Vec<_> = evaluation
        .apps_for_disable_recommendation
        .iter()
        .map(|app| app.package_name.as_str())
        .collect();
    assert_eq!(recommended, vec!["org.example.game"]);
}

#[tokio::test]
async fn events_outside_lookback_fall_back_to_tracked_value() {
    let source = StaticUsageSource::new(UsageSnapshot {
        usage_access: true,
        apps: vec![InstalledApp::new("org.example.notes")],
        events: vec![event("org.example.notes", NOW - 100 * DAY)],
    });
    let previous =
        vec![TrackedApp::new("org.example.notes", AppStatus::Rare).with_last_used(NOW - 30 * DAY)];

    let evaluation = classifier().evaluate(&source, &previous, NOW).await.unwrap();
    assert_eq!(evaluation.updates[0].last_used_at, Some(NOW - 30 * DAY));
    assert_eq!(evaluation.updates[0].status, AppStatus::Rare);
}

#[tokio::test]
async fn hidden_but_tracked_package_is_looked_up() {
    let source = StaticUsageSource::new(UsageSnapshot {
        usage_access: true,
        apps: vec![],
        events: vec![],
    });
    let classifier = classifier();
    let previous = vec![TrackedApp::new("org.example.hidden", AppStatus::Recent)];

    let evaluation = classifier.evaluate(&source, &previous, NOW).await.unwrap();
    assert_eq!(evaluation.packages_to_remove, vec!["org.example.hidden".to_string()]);

    source.update(|snapshot| {
        snapshot
            .apps
            .push(InstalledApp::new("org.example.hidden").disabled())
    });
    let evaluation = classifier.evaluate(&source, &previous, NOW).await.unwrap();
    assert!(evaluation.packages_to_remove.is_empty());
    assert_eq!(evaluation.updates[0].status, AppStatus::Disabled);
}

#[tokio::test]
async fn allow_list_restricts_eligibility() {
    let mut config = Config::default();
    config.policy.allow_list = Some(vec!["org.example.only".into()]);
    let classifier = UsageClassifier::new(Arc::new(UsagePolicy::new(&config.policy)), &config);
    let source = StaticUsageSource::new(UsageSnapshot {
        usage_access: true,
        apps: vec![
            InstalledApp::new("org.example.only"),
            InstalledApp::new("org.example.other"),
        ],
        events: vec![],
    });

    let evaluation = classifier.evaluate(&source, &[], NOW).await.unwrap();
    assert_eq!(evaluation.updates.len(), 1);
    assert_eq!(evaluation.updates[0].package_name, "org.example.only");
}

/// Fails every lookup of one package.
struct FailingLookup {
    inner: StaticUsageSource,
    failing: &'static str,
}

#[async_trait]
impl UsageSource for FailingLookup {
    async fn has_usage_access(&self) -> bool {
        self.inner.has_usage_access().await
    }

    async fn installed_applications(&self) -> Result<Vec<InstalledApp>, Error> {
        self.inner.installed_applications().await
    }

    async fn package_info(&self, package_name: &str) -> Result<Option<InstalledApp>, Error> {
        if package_name == self.failing {
            return Err(Error::Lookup {
                package: package_name.into(),
                reason: "package manager busy".into(),
            });
        }
        self.inner.package_info(package_name).await
    }

    async fn foreground_events(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<ForegroundEvent>, Error> {
        self.inner.foreground_events(since, until).await
    }
}

#[tokio::test]
async fn failed_lookup_skips_only_that_package() {
    let source = FailingLookup {
        inner: StaticUsageSource::new(UsageSnapshot {
            usage_access: true,
            apps: vec![
                InstalledApp::new("org.example.chat"),
                InstalledApp::new("org.example.game"),
            ],
            events: vec![
                event("org.example.chat", NOW - HOUR),
                event("org.example.game", NOW - 10 * DAY),
            ],
        }),
        failing: "org.example.hidden",
    };
    let previous = vec![
        TrackedApp::new("org.example.hidden", AppStatus::Recent),
        TrackedApp::new("org.example.gone", AppStatus::Rare),
    ];

    let evaluation = classifier().evaluate(&source, &previous, NOW).await.unwrap();

    let statuses: Vec<_> = evaluation
        .updates
        .iter()
        .map(|app| (app.package_name.as_str(), app.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("org.example.chat", AppStatus::Recent),
            ("org.example.game", AppStatus::Rare),
        ]
    );
    assert_eq!(evaluation.packages_to_remove, vec!["org.example.gone".to_string()]);
}
