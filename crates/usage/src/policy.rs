#![forbid(unsafe_code)]

//! Rules deciding which packages are tracked and when they count as idle.
//!
//! Critical apps (banking, authenticators, messengers, device management) are
//! kept out of the automation pipeline entirely.

use config::MIN_THRESHOLD;
use parking_lot::RwLock;
use std::{collections::HashSet, time::Duration};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub recent: Duration,
    pub warning: Duration,
    pub disable: Duration,
}

impl Thresholds {
    /// Derive all three thresholds from the user-facing grace duration.
    ///
    /// `disable == recent == max(allow, MIN_THRESHOLD)` and
    /// `warning == max(3/4 * disable, MIN_THRESHOLD)`.
    pub fn derive(allow_duration: Duration) -> Self {
        let sanitized = allow_duration.max(MIN_THRESHOLD);
        let three_quarters = crate::millis(sanitized).saturating_mul(3) / 4;
        let warning = Duration::from_millis(three_quarters).max(MIN_THRESHOLD);
        Self {
            recent: sanitized,
            warning,
            disable: sanitized,
        }
    }
}

impl From<&config::Policy> for Thresholds {
    fn from(policy: &config::Policy) -> Self {
        Self {
            recent: policy.recent_threshold,
            warning: policy.warning_threshold,
            disable: policy.disable_threshold,
        }
    }
}

#[derive(Debug)]
pub struct UsagePolicy {
    thresholds: RwLock<Thresholds>,
    allow_list: Option<HashSet<String>>,
    deny_list: HashSet<String>,
    deny_prefixes: Vec<String>,
}

impl UsagePolicy {
    pub fn new(config: &config::Policy) -> Self {
        let config = config.clone().sanitize();
        Self {
            thresholds: RwLock::new(Thresholds::from(&config)),
            allow_list: config.allow_list.map(|list| list.into_iter().collect()),
            deny_list: config.deny_list.into_iter().collect(),
            deny_prefixes: config.deny_prefixes,
        }
    }

    pub fn with_allow_list(mut self, allow_list: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_list = Some(allow_list.into_iter().map(Into::into).collect());
        self
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    /// Returns true when the package must never be tracked or targeted.
    ///
    /// An explicit allow-list entry always wins over the deny rules.
    pub fn should_skip(&self, package_name: &str) -> bool {
        if self
            .allow_list
            .as_ref()
            .is_some_and(|allow| allow.contains(package_name))
        {
            return false;
        }
        self.deny_list.contains(package_name)
            || self
                .deny_prefixes
                .iter()
                .any(|prefix| package_name.starts_with(prefix.as_str()))
    }

    /// Whether the package may be classified at all.
    ///
    /// With an allow list present, only its members are eligible.
    pub fn is_eligible(&self, package_name: &str) -> bool {
        if self.should_skip(package_name) {
            return false;
        }
        self.allow_list
            .as_ref()
            .is_none_or(|allow| allow.contains(package_name))
    }

    /// Tie every threshold to `allow_duration`. Returns whether anything changed.
    pub fn update_thresholds(&self, allow_duration: Duration) -> bool {
        let next = Thresholds::derive(allow_duration);
        let mut current = self.thresholds.write();
        if *current == next {
            return false;
        }
        debug!(?next, previous = ?*current, "usage thresholds updated");
        *current = next;
        true
    }
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self::new(&config::Policy::default())
    }
}
