#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

/// Smallest threshold the policy will ever apply.
pub const MIN_THRESHOLD: Duration = Duration::from_secs(60);

const DAY: u64 = 24 * 60 * 60;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Policy {
    /// Packages used within this window are classified as recent.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub recent_threshold: Duration,

    /// Idle time after which a disable reminder is raised.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub warning_threshold: Duration,

    /// Idle time after which disabling the package is recommended.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub disable_threshold: Duration,

    /// How far back foreground events are queried on every pass.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub usage_lookback: Duration,

    /// When set, only these packages are ever classified.
    pub allow_list: Option<Vec<String>>,

    pub deny_list: Vec<String>,

    pub deny_prefixes: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            recent_threshold: Duration::from_secs(2 * DAY),
            warning_threshold: Duration::from_secs(3 * DAY),
            disable_threshold: Duration::from_secs(4 * DAY),
            usage_lookback: Duration::from_secs(14 * DAY),
            allow_list: None,
            deny_list: [
                "com.google.android.apps.authenticator2",
                "proton.android.authenticator",
                "com.starfinanz.mobile.android.pushtan",
                "com.starfinanz.mobile.android.sparkasseplus",
                "com.google.android.apps.walletnfcrel",
                "com.google.android.apps.wallet",
                "com.google.android.apps.security.securityhub",
                "com.google.android.apps.work.clouddpc",
            ]
            .map(String::from)
            .to_vec(),
            deny_prefixes: [
                "com.starfinanz.",
                "com.bank",
                "ch.threema",
                "de.starface",
                "org.telegram",
                "com.google.android.safety",
                "cz.mobilesoft.appblock",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Policy {
    /// Raise every threshold to [`MIN_THRESHOLD`] and pull the warning
    /// threshold down to the disable threshold if a file inverted them.
    pub fn sanitize(self) -> Self {
        let recent_threshold = self.recent_threshold.max(MIN_THRESHOLD);
        let disable_threshold = self.disable_threshold.max(MIN_THRESHOLD);
        let warning_threshold = self
            .warning_threshold
            .max(MIN_THRESHOLD)
            .min(disable_threshold);
        Self {
            recent_threshold,
            warning_threshold,
            disable_threshold,
            usage_lookback: self.usage_lookback.max(disable_threshold),
            ..self
        }
    }
}
