#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Firewall {
    /// Grace window used by `enable` when the caller does not pass one.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub default_allow_duration: Duration,

    /// Length of a per-app exception when none is configured.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub temporary_unblock: Duration,

    /// A re-block timer missed by more than this is dropped.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub stale_grace: Duration,

    /// Rare apps idle for longer than this are blocked automatically.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub block_eligibility: Duration,

    /// Minimum spacing between two "app is blocked" prompts.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub notification_cooldown: Duration,

    /// Window queried to find the foreground app when traffic is drained.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub foreground_lookback: Duration,

    /// Our own package; never blocked.
    pub self_package: String,

    /// IPv4 address assigned to the tunnel interface.
    pub address: String,

    /// IPv6 address assigned to the tunnel interface.
    pub address_v6: Option<String>,

    pub session_name: String,
}

impl Default for Firewall {
    fn default() -> Self {
        Self {
            default_allow_duration: Duration::from_secs(4 * 24 * 60 * 60),
            temporary_unblock: Duration::from_secs(10 * 60),
            stale_grace: Duration::from_secs(60 * 60),
            block_eligibility: Duration::from_secs(4 * 24 * 60 * 60),
            notification_cooldown: Duration::from_secs(5),
            foreground_lookback: Duration::from_secs(24 * 60 * 60),
            self_package: "com.silentport.silentport".into(),
            address: "10.100.0.2/32".into(),
            address_v6: Some("fd00:1:fd00::1/128".into()),
            session_name: "SilentPort firewall".into(),
        }
    }
}
