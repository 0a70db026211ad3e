#![forbid(unsafe_code)]

use crate::{Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Recent,
    Rare,
    Disabled,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Recent => "RECENT",
            AppStatus::Rare => "RARE",
            AppStatus::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECENT" => Ok(AppStatus::Recent),
            "RARE" => Ok(AppStatus::Rare),
            "DISABLED" => Ok(AppStatus::Disabled),
            other => Err(Error::InvalidStatus(other.to_owned())),
        }
    }
}

/// Tracking state of one package, one row per package ever observed.
///
/// `status` is [`AppStatus::Disabled`] exactly when `is_disabled` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedApp {
    pub package_name: String,
    pub app_label: String,
    /// `None` means the package was never seen in the foreground.
    pub last_used_at: Option<Timestamp>,
    pub status: AppStatus,
    pub is_disabled: bool,
    /// When a disable recommendation was first raised.
    pub scheduled_disable_at: Option<Timestamp>,
    /// Last time a reminder fired, used as a cooldown.
    pub notified_at: Option<Timestamp>,
}

impl TrackedApp {
    pub fn new(package_name: impl Into<String>, status: AppStatus) -> Self {
        let package_name = package_name.into();
        Self {
            app_label: package_name.clone(),
            package_name,
            last_used_at: None,
            status,
            is_disabled: status == AppStatus::Disabled,
            scheduled_disable_at: None,
            notified_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.app_label = label.into();
        self
    }

    pub fn with_last_used(mut self, last_used_at: Timestamp) -> Self {
        self.last_used_at = Some(last_used_at);
        self
    }
}
