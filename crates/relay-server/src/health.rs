//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"shutting_down"` once draining.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Messages currently held in the shared history.
    pub history_size: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    history_size: usize,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        history_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_while_shutting_down() {
        let resp = health_check(Instant::now(), 3, 0, true);
        assert_eq!(resp.status, "shutting_down");
        assert_eq!(resp.connections, 3);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, 4, false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["history_size"], 4);
        assert!(parsed["uptime_secs"].is_number());
    }
}
