#![forbid(unsafe_code)]

use crate::error::Error;
use crate::firewall::PackageSet;
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMode {
    /// Every app's traffic enters the sink except these.
    AllExcept(PackageSet),
    /// Only these apps' traffic enters the sink.
    Only(PackageSet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub session_name: String,
    /// Interface addresses in CIDR notation.
    pub addresses: Vec<String>,
    /// Default routes in CIDR notation.
    pub routes: Vec<String>,
    pub mode: RouteMode,
}

/// The platform facility that captures per-app traffic.
pub trait Tunnel: Send + Sync {
    fn establish(&self, config: &TunnelConfig) -> Result<Arc<dyn TunnelHandle>, Error>;
}

/// An established interface. Reads block for at most a short while.
pub trait TunnelHandle: Send + Sync {
    /// Read one packet. `Ok(0)` means nothing was pending; an error ends the session.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&self);
}
