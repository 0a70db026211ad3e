#![forbid(unsafe_code)]

use crate::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;
use usage::{UsageSource, current_foreground, millis};

/// Which app is on screen right now, if that can be known.
pub trait ForegroundProbe: Send + Sync {
    fn foreground_package(&self) -> Option<String>;
}

/// Answers from the most recent foreground event in the usage history.
///
/// Called from the blocking drain thread, so it drives the async source on
/// the runtime handle it was built with.
pub struct UsageForegroundProbe {
    source: Arc<dyn UsageSource>,
    clock: Arc<dyn Clock>,
    lookback: Duration,
    runtime: Handle,
}

impl UsageForegroundProbe {
    pub fn new(
        source: Arc<dyn UsageSource>,
        clock: Arc<dyn Clock>,
        lookback: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            source,
            clock,
            lookback,
            runtime,
        }
    }
}

impl ForegroundProbe for UsageForegroundProbe {
    fn foreground_package(&self) -> Option<String> {
        self.runtime.block_on(async {
            if !self.source.has_usage_access().await {
                trace!("no usage access, foreground unknown");
                return None;
            }
            let now = self.clock.now();
            let since = now.saturating_sub(millis(self.lookback));
            let events = self.source.foreground_events(since, now).await.ok()?;
            current_foreground(&events).map(str::to_owned)
        })
    }
}
