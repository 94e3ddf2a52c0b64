//! Liveness deadlines and the ping schedule.
//!
//! The read side gives up when no frame (data, ping, or pong) arrives within
//! `idle_timeout`. The write side pings every `ping_interval`, which is half
//! the idle timeout, so a responsive peer's pong always lands in time.

use std::time::Duration;

use relay_settings::ConnectionSettings;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Timing policy shared by a connection's read and write pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    /// Maximum silence before the read side disconnects.
    pub idle_timeout: Duration,
    /// Maximum time to write one frame.
    pub write_timeout: Duration,
    /// Period between server pings.
    pub ping_interval: Duration,
}

impl Deadlines {
    /// Build deadlines from an idle and a write timeout. The ping interval is
    /// half the idle timeout, never zero.
    pub fn new(idle_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            write_timeout,
            ping_interval: (idle_timeout / 2).max(Duration::from_millis(1)),
        }
    }
}

impl From<&ConnectionSettings> for Deadlines {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            write_timeout: settings.write_timeout(),
            ping_interval: settings.heartbeat_interval(),
        }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

/// Ping ticker. The first tick fires one full period from now rather than
/// immediately, and a late tick is not followed by a burst of catch-up pings.
pub fn ping_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
