#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::enforcement::monitor::ForegroundProbe;
use crate::enforcement::tunnel::{RouteMode, Tunnel, TunnelConfig, TunnelHandle};
use crate::enforcement::EnforcementRequest;
use crate::firewall::PackageSet;
use crate::notify::{Notification, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use usage::{Timestamp, millis};

/// Large enough for any IP packet the interface hands over.
pub const READ_BUFFER_SIZE: usize = 32_767;

/// Pause between reads when the interface had nothing pending.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementSettings {
    pub session_name: String,
    pub address: String,
    pub address_v6: Option<String>,
    pub self_package: String,
    pub notification_cooldown: Duration,
}

impl From<&config::Firewall> for EnforcementSettings {
    fn from(config: &config::Firewall) -> Self {
        Self {
            session_name: config.session_name.clone(),
            address: config.address.clone(),
            address_v6: config.address_v6.clone(),
            self_package: config.self_package.clone(),
            notification_cooldown: config.notification_cooldown,
        }
    }
}

impl EnforcementSettings {
    pub fn tunnel_config(&self, blocking: bool, packages: &PackageSet) -> TunnelConfig {
        let mut addresses = vec![self.address.clone()];
        let mut routes = vec!["0.0.0.0/0".to_owned()];
        if let Some(v6) = &self.address_v6 {
            addresses.push(v6.clone());
            routes.push("::/0".to_owned());
        }
        let mode = if blocking {
            RouteMode::AllExcept(PackageSet::from([self.self_package.clone()]))
        } else {
            RouteMode::Only(packages.clone())
        };
        TunnelConfig {
            session_name: self.session_name.clone(),
            addresses,
            routes,
            mode,
        }
    }
}

struct Session {
    handle: Arc<dyn TunnelHandle>,
    cancel: CancellationToken,
    drain: JoinHandle<()>,
}

/// Owns the tunnel. Every request tears the current session down before
/// anything new is established, so at most one session exists.
pub struct EnforcementService {
    settings: EnforcementSettings,
    tunnel: Arc<dyn Tunnel>,
    probe: Arc<dyn ForegroundProbe>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    session: Option<Session>,
}

impl EnforcementService {
    pub fn new(
        settings: EnforcementSettings,
        tunnel: Arc<dyn Tunnel>,
        probe: Arc<dyn ForegroundProbe>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            tunnel,
            probe,
            notifier,
            clock,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.drain.is_finished())
    }

    /// Serve requests until cancelled or every sender is gone.
    pub async fn run_until(
        mut self,
        cancel: CancellationToken,
        requests: flume::Receiver<EnforcementRequest>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv_async() => match request {
                    Ok(request) => self.apply(request),
                    Err(_) => break,
                },
            }
        }
        self.teardown();
        debug!("enforcement service stopped");
    }

    #[instrument(skip(self))]
    pub fn apply(&mut self, request: EnforcementRequest) {
        self.teardown();
        match request {
            EnforcementRequest::Stop => info!("enforcement stopped"),
            EnforcementRequest::Apply { blocking, packages } => {
                if !blocking && packages.is_empty() {
                    info!("nothing to block, enforcement stopped");
                    return;
                }
                self.establish(blocking, packages);
            }
        }
    }

    fn establish(&mut self, blocking: bool, packages: PackageSet) {
        let config = self.settings.tunnel_config(blocking, &packages);
        let handle = match self.tunnel.establish(&config) {
            Ok(handle) => handle,
            Err(err) => {
                error!(%err, "failed to establish tunnel, enforcement stopped");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let drain = Drain {
            handle: Arc::clone(&handle),
            cancel: cancel.clone(),
            blocked: packages,
            probe: Arc::clone(&self.probe),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
            cooldown: millis(self.settings.notification_cooldown),
        };
        let drain = tokio::task::spawn_blocking(move || drain.run());
        info!(blocking, mode = ?config.mode, "tunnel established");
        self.session = Some(Session {
            handle,
            cancel,
            drain,
        });
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            session.handle.close();
            debug!("tunnel closed");
        }
    }
}

/// Reads and discards captured packets, noticing when a blocked app is in
/// the foreground.
struct Drain {
    handle: Arc<dyn TunnelHandle>,
    cancel: CancellationToken,
    blocked: PackageSet,
    probe: Arc<dyn ForegroundProbe>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cooldown: u64,
}

impl Drain {
    fn run(self) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut last_notified: Option<Timestamp> = None;
        while !self.cancel.is_cancelled() {
            match self.handle.read(&mut buf) {
                Ok(0) => std::thread::sleep(IDLE_BACKOFF),
                Ok(_) => {
                    let now = self.clock.now();
                    if last_notified.is_some_and(|at| now.saturating_sub(at) <= self.cooldown) {
                        continue;
                    }
                    let Some(package) = self.probe.foreground_package() else {
                        continue;
                    };
                    if self.blocked.contains(&package) {
                        trace!(%package, "blocked app in foreground");
                        info!("blocked app in foreground, notifying");
                        self.notifier.notify(Notification::blocked_app(&package));
                        last_notified = Some(now);
                    }
                }
                Err(err) => {
                    if !self.cancel.is_cancelled() {
                        warn!(%err, "tunnel read failed, drain stopped");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EnforcementSettings {
        EnforcementSettings::from(&config::Firewall::default())
    }

    #[test]
    fn global_mode_exempts_self() {
        let s = settings();
        let config = s.tunnel_config(true, &PackageSet::from(["a".to_string()]));
        assert_eq!(
            config.mode,
            RouteMode::AllExcept(PackageSet::from([s.self_package.clone()]))
        );
        assert_eq!(config.addresses.len(), 2);
        assert_eq!(config.routes, vec!["0.0.0.0/0".to_string(), "::/0".to_string()]);
    }

    #[test]
    fn selective_mode_routes_block_set() {
        let packages = PackageSet::from(["a".to_string(), "b".to_string()]);
        let config = settings().tunnel_config(false, &packages);
        assert_eq!(config.mode, RouteMode::Only(packages));
    }
}
