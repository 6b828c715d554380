// -
// Fetch pacing

/// Starting duration of a background poll cycle
pub(crate) const DEFAULT_FETCH_CYCLE_SECS: u64 = 30;

// -
// Notification channel

/// Buffer of the push-notification channel handed out by consoles
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

// -
// Self-monitoring

pub(crate) const SELF_METRICS_PREFIX: &str = "zhmc_exporter";
