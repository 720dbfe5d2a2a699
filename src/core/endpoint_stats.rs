//! Per-(model, endpoint) request statistics
//!
//! Health and weight are derived on read from the counters, relative to a
//! caller-supplied `now` so the failure window can be tested without sleeping.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Consecutive failures at which an endpoint is considered down.
pub const UNHEALTHY_CONSECUTIVE_FAILURES: u64 = 3;

/// How long a burst of failures keeps an endpoint out of rotation.
pub const FAILURE_WINDOW_SECS: i64 = 5 * 60;

/// Floor for the weight of a healthy endpoint.
pub const MIN_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct EndpointStats {
    host: String,
    port: u16,
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

impl EndpointStats {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            active_connections: 0,
            total_requests: 0,
            total_failures: 0,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    /// The `host:port` key this entry is stored under.
    pub fn endpoint(&self) -> String {
        endpoint_key(&self.host, self.port)
    }

    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        if self.consecutive_failures < UNHEALTHY_CONSECUTIVE_FAILURES {
            return true;
        }
        match self.last_failure {
            Some(last) => now - last >= Duration::seconds(FAILURE_WINDOW_SECS),
            None => true,
        }
    }

    pub fn weight(&self, now: DateTime<Utc>) -> f64 {
        if !self.is_healthy(now) {
            return 0.0;
        }
        if self.total_requests == 0 {
            return 1.0;
        }
        let failure_rate = self.total_failures as f64 / self.total_requests as f64;
        (1.0 - failure_rate).max(MIN_WEIGHT)
    }

    pub(crate) fn record_start(&mut self) {
        self.active_connections += 1;
        self.total_requests += 1;
    }

    pub(crate) fn record_end(&mut self, success: bool, now: DateTime<Utc>) {
        self.active_connections = self.active_connections.saturating_sub(1);
        if success {
            self.consecutive_failures = 0;
        } else {
            self.total_failures += 1;
            self.consecutive_failures += 1;
            self.last_failure = Some(now);
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EndpointStatsSnapshot {
        EndpointStatsSnapshot {
            active_connections: self.active_connections,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            consecutive_failures: self.consecutive_failures,
            is_healthy: self.is_healthy(now),
            weight: self.weight(now),
            last_failure: self.last_failure.map(|t| t.to_rfc3339()),
        }
    }
}

#[inline]
pub(crate) fn endpoint_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Point-in-time view of an endpoint, as reported by the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatsSnapshot {
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub is_healthy: bool,
    pub weight: f64,
    pub last_failure: Option<String>,
}
