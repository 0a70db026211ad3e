#![forbid(unsafe_code)]

//! User-facing notices and the actions they offer.

use crate::error::Error;
use crate::firewall::FirewallController;
use crate::persistence::AppSettings;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument};
use usage::TrackedApp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NotificationAction {
    DisableFirewall,
    AllowApp(String),
    OpenAppSettings(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Notices with the same key replace each other.
    pub key: String,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// A blocked app was brought to the foreground.
    pub fn blocked_app(package: &str) -> Self {
        Self {
            key: format!("blocked:{package}"),
            title: "Network blocked".into(),
            body: format!("{package} is blocked by the firewall"),
            actions: vec![
                NotificationAction::DisableFirewall,
                NotificationAction::AllowApp(package.to_owned()),
            ],
        }
    }

    pub fn disable_reminder(app: &TrackedApp, idle: Duration) -> Self {
        Self {
            key: format!("reminder:{}", app.package_name),
            title: format!("{} is rarely used", app.app_label),
            body: format!(
                "{} has not been used for {}",
                app.app_label,
                human_duration(idle)
            ),
            actions: vec![NotificationAction::OpenAppSettings(app.package_name.clone())],
        }
    }

    pub fn disable_recommendation(app: &TrackedApp, idle: Duration) -> Self {
        Self {
            key: format!("recommendation:{}", app.package_name),
            title: format!("Consider disabling {}", app.app_label),
            body: format!(
                "{} has been idle for more than {}",
                app.app_label,
                human_duration(idle)
            ),
            actions: vec![NotificationAction::OpenAppSettings(app.package_name.clone())],
        }
    }
}

/// Rounded down to the coarsest whole unit, so "3days" rather than "3days 4h 12m".
fn human_duration(duration: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    let secs = duration.as_secs();
    let unit = if secs >= DAY {
        DAY
    } else if secs >= HOUR {
        HOUR
    } else {
        MINUTE
    };
    humantime::format_duration(Duration::from_secs(secs / unit * unit)).to_string()
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notices to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            key = %notification.key,
            title = %notification.title,
            body = %notification.body,
            actions = ?notification.actions,
            "notification"
        );
    }
}

/// Carry out a notification action chosen by the user.
///
/// Opening settings is a platform concern and only logged here.
#[instrument(skip(controller, settings))]
pub async fn dispatch_action(
    controller: &FirewallController,
    settings: &AppSettings,
    action: NotificationAction,
) -> Result<(), Error> {
    match action {
        NotificationAction::DisableFirewall => {
            controller.disable().await?;
        }
        NotificationAction::AllowApp(package) => {
            controller
                .temporarily_unblock(&package, Some(settings.allow_duration))
                .await?;
        }
        NotificationAction::OpenAppSettings(package) => {
            info!(%package, "open app settings requested");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use usage::AppStatus;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(human_duration(Duration::from_secs(4 * 24 * 3600)), "4days");
        assert_eq!(human_duration(Duration::from_secs(4 * 24 * 3600 + 7200)), "4days");
        assert_eq!(human_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(human_duration(Duration::from_secs(90)), "1m");
    }

    #[test]
    fn blocked_app_offers_both_actions() {
        let n = Notification::blocked_app("org.example.game");
        assert_eq!(n.key, "blocked:org.example.game");
        // one pending prompt per app
        assert_ne!(n.key, Notification::blocked_app("org.example.chat").key);
        assert_eq!(
            n.actions,
            vec![
                NotificationAction::DisableFirewall,
                NotificationAction::AllowApp("org.example.game".into()),
            ]
        );
        let app = TrackedApp::new("org.example.game", AppStatus::Rare).with_label("Game");
        let reminder = Notification::disable_reminder(&app, Duration::from_secs(3 * 24 * 3600));
        assert_eq!(reminder.body, "Game has not been used for 3days");
    }
}
