#![forbid(unsafe_code)]

//! Turns firewall state into a running packet sink.

mod monitor;
mod service;
mod tunnel;

pub use monitor::{ForegroundProbe, UsageForegroundProbe};
pub use service::{EnforcementService, EnforcementSettings, IDLE_BACKOFF, READ_BUFFER_SIZE};
pub use tunnel::{RouteMode, Tunnel, TunnelConfig, TunnelHandle};

use crate::firewall::{FirewallState, PackageSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementRequest {
    /// Route `packages` (selective) or everything (global) into the sink.
    Apply { blocking: bool, packages: PackageSet },
    Stop,
}

impl EnforcementRequest {
    pub fn from_state(state: &FirewallState) -> Self {
        if state.is_enabled {
            EnforcementRequest::Apply {
                blocking: state.is_blocking,
                packages: state.blocked_packages.clone(),
            }
        } else {
            EnforcementRequest::Stop
        }
    }
}

/// Fire-and-forget delivery of enforcement instructions.
pub trait Enforcement: Send + Sync {
    fn submit(&self, request: EnforcementRequest);
}

/// Sending half of an [`EnforcementService`].
#[derive(Debug, Clone)]
pub struct EnforcementHandle(flume::Sender<EnforcementRequest>);

impl EnforcementHandle {
    pub fn channel() -> (Self, flume::Receiver<EnforcementRequest>) {
        let (tx, rx) = flume::unbounded();
        (Self(tx), rx)
    }
}

impl Enforcement for EnforcementHandle {
    fn submit(&self, request: EnforcementRequest) {
        if self.0.send(request).is_err() {
            warn!("enforcement service is gone, request dropped");
        }
    }
}
