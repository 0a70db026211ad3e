//! Stand-ins for the device facilities the daemon talks to.

use crate::error::Error;
use orchestrator::enforcement::{IDLE_BACKOFF, Tunnel, TunnelConfig, TunnelHandle};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use usage::UsageSnapshot;

pub fn load_snapshot(path: &Path) -> Result<UsageSnapshot, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::ReadSnapshot {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| Error::ParseSnapshot {
        path: path.to_owned(),
        source,
    })
}

/// Logs tunnel sessions instead of capturing traffic.
#[derive(Debug, Default)]
pub struct LoggingTunnel;

impl Tunnel for LoggingTunnel {
    fn establish(
        &self,
        config: &TunnelConfig,
    ) -> Result<Arc<dyn TunnelHandle>, orchestrator::Error> {
        info!(
            session = %config.session_name,
            addresses = ?config.addresses,
            routes = ?config.routes,
            mode = ?config.mode,
            "tunnel session opened"
        );
        Ok(Arc::new(LoggingHandle::default()))
    }
}

#[derive(Debug, Default)]
struct LoggingHandle {
    closed: AtomicBool,
}

impl TunnelHandle for LoggingHandle {
    fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        std::thread::sleep(IDLE_BACKOFF);
        Ok(0)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("tunnel session closed");
        }
    }
}
