//! Runtime tuning knobs for the core engine.

use std::time::Duration;

use url::Url;

/// Default hold time for a motion sensor after the last positive signal.
pub const DEFAULT_MOTION_OFF_DELAY: Duration = Duration::from_secs(60);

/// Default number of months of recordings exposed through the catalog.
pub const DEFAULT_PLAYBACK_MONTHS: u32 = 2;

/// Default cadence of the subscription renewal scheduler.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(60);

/// Default cadence of the fallback state poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default cadence of the recording summary sweep.
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(3600);

/// Prefix for event topics fired on the bus.
pub const DEFAULT_NAMESPACE: &str = "reowatch";

/// Engine-wide settings, shared by the coordinator, router, and catalog.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    /// Topic prefix for bus events.
    pub namespace: String,
    /// How long a motion sensor stays on after the last positive signal.
    pub motion_off_delay: Duration,
    /// Month span of the VoD catalog window.
    pub playback_months: u32,
    /// How often the renewal scheduler wakes up.
    pub renew_interval: Duration,
    /// Fallback poll cadence. `None` disables polling entirely, leaving
    /// push notifications as the only motion source.
    pub poll_interval: Option<Duration>,
    /// Recording summary sweep cadence. `None` disables the sweep; the
    /// status API then never reports a last recording and aged
    /// thumbnails are only pruned when a summary is requested.
    pub summary_interval: Option<Duration>,
    /// Base URL cameras can reach on the local network, used for webhook
    /// callbacks. Preferred over [`Self::external_url`].
    pub internal_url: Option<Url>,
    /// Base URL reachable from outside the local network.
    pub external_url: Option<Url>,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            motion_off_delay: DEFAULT_MOTION_OFF_DELAY,
            playback_months: DEFAULT_PLAYBACK_MONTHS,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            summary_interval: Some(DEFAULT_SUMMARY_INTERVAL),
            internal_url: None,
            external_url: None,
        }
    }
}

impl CoreSettings {
    /// The base URL webhooks should be registered under, preferring the
    /// internal network address.
    pub fn callback_base(&self) -> Option<&Url> {
        self.internal_url.as_ref().or(self.external_url.as_ref())
    }
}
