//! Liveness Inference
//!
//! Online/offline status of controllers and devices is never stored. It is
//! recomputed on every read from the last heartbeat timestamp the gateway
//! produced, so there is a single source of truth.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Silence longer than this marks a controller or device offline
pub const LIVENESS_WINDOW_MS: i64 = 30_000;

/// Heartbeat interval assumed when a controller did not announce one
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: i64 = 30_000;

/// Recency classification used by the admin/topology views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
    Unknown,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Online => write!(f, "online"),
            Liveness::Offline => write!(f, "offline"),
            Liveness::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify an entity as online (seen within 30s), offline or unknown
pub fn liveness(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Liveness {
    match last_seen {
        None => Liveness::Unknown,
        Some(seen) if now - seen < Duration::milliseconds(LIVENESS_WINDOW_MS) => Liveness::Online,
        Some(_) => Liveness::Offline,
    }
}

/// Heartbeat-interval aware health used by the controller listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatHealth {
    /// Silent for less than two heartbeat intervals
    Online,
    /// Missed a few heartbeats (two to five intervals)
    Warning,
    Offline,
    /// Never reported in
    Waiting,
}

impl fmt::Display for HeartbeatHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatHealth::Online => write!(f, "online"),
            HeartbeatHealth::Warning => write!(f, "warning"),
            HeartbeatHealth::Offline => write!(f, "offline"),
            HeartbeatHealth::Waiting => write!(f, "waiting"),
        }
    }
}

/// Classify a controller against its own announced heartbeat interval
pub fn heartbeat_health(
    last_seen: Option<DateTime<Utc>>,
    heartbeat_interval_ms: Option<i64>,
    now: DateTime<Utc>,
) -> HeartbeatHealth {
    let Some(seen) = last_seen else {
        return HeartbeatHealth::Waiting;
    };

    let interval = heartbeat_interval_ms
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
    let silence = now - seen;

    if silence < Duration::milliseconds(interval * 2) {
        HeartbeatHealth::Online
    } else if silence < Duration::milliseconds(interval * 5) {
        HeartbeatHealth::Warning
    } else {
        HeartbeatHealth::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_recent_is_online() {
        let now = Utc::now();
        assert_eq!(liveness(Some(now - Duration::seconds(10)), now), Liveness::Online);
    }

    #[test]
    fn test_liveness_stale_is_offline() {
        let now = Utc::now();
        assert_eq!(liveness(Some(now - Duration::seconds(45)), now), Liveness::Offline);
    }

    #[test]
    fn test_liveness_never_seen_is_unknown() {
        assert_eq!(liveness(None, Utc::now()), Liveness::Unknown);
    }

    #[test]
    fn test_liveness_boundary_is_offline() {
        let now = Utc::now();
        assert_eq!(liveness(Some(now - Duration::seconds(30)), now), Liveness::Offline);
    }

    #[test]
    fn test_liveness_clock_skew_counts_as_online() {
        // Hardware clocks can run ahead of ours
        let now = Utc::now();
        assert_eq!(liveness(Some(now + Duration::seconds(5)), now), Liveness::Online);
    }

    #[test]
    fn test_heartbeat_health_bands() {
        let now = Utc::now();
        let interval = Some(10_000);

        assert_eq!(
            heartbeat_health(Some(now - Duration::seconds(15)), interval, now),
            HeartbeatHealth::Online
        );
        assert_eq!(
            heartbeat_health(Some(now - Duration::seconds(35)), interval, now),
            HeartbeatHealth::Warning
        );
        assert_eq!(
            heartbeat_health(Some(now - Duration::seconds(60)), interval, now),
            HeartbeatHealth::Offline
        );
        assert_eq!(heartbeat_health(None, interval, now), HeartbeatHealth::Waiting);
    }

    #[test]
    fn test_heartbeat_health_default_interval() {
        let now = Utc::now();
        assert_eq!(
            heartbeat_health(Some(now - Duration::seconds(50)), None, now),
            HeartbeatHealth::Online
        );
        assert_eq!(
            heartbeat_health(Some(now - Duration::seconds(50)), Some(0), now),
            HeartbeatHealth::Online
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Liveness::Unknown.to_string(), "unknown");
        assert_eq!(HeartbeatHealth::Warning.to_string(), "warning");
    }
}
