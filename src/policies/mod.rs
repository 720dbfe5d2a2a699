//! Endpoint selection strategies
//!
//! Each strategy picks one endpoint out of the candidates configured for a
//! model. Strategies run inside the load balancer's critical section, so
//! they are synchronous and must not perform I/O.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::EndpointStats;

mod factory;
mod least_connections;
mod random;
mod round_robin;
mod weighted;

pub use factory::PolicyFactory;
pub use least_connections::LeastConnectionsPolicy;
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;
pub use weighted::WeightedRoundRobinPolicy;

/// State handed to a policy for a single selection.
#[derive(Debug)]
pub struct SelectionContext<'a> {
    pub model: &'a str,
    pub now: DateTime<Utc>,
    /// Per-model rotation counter, owned by the balancer's stats table.
    pub counter: &'a mut usize,
}

/// Core trait for endpoint selection strategies
pub trait LoadBalancingPolicy: Send + Sync + Debug {
    /// Select an endpoint from the candidates, returning its index.
    ///
    /// `candidates` is in configuration order and never empty.
    fn select_endpoint(
        &self,
        candidates: &[&EndpointStats],
        ctx: &mut SelectionContext<'_>,
    ) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Indices of the healthy candidates, or of all candidates when none are
/// healthy. Availability wins over strict health isolation.
pub(crate) fn get_healthy_endpoint_indices(
    candidates: &[&EndpointStats],
    ctx: &SelectionContext<'_>,
) -> Vec<usize> {
    let healthy: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, stats)| stats.is_healthy(ctx.now))
        .map(|(idx, _)| idx)
        .collect();

    if healthy.is_empty() {
        warn!(
            "No healthy endpoints for {}, using all endpoints",
            ctx.model
        );
        return (0..candidates.len()).collect();
    }

    healthy
}

#[cfg(test)]
pub(crate) mod test_utils {
    use chrono::{DateTime, Utc};

    use crate::core::EndpointStats;

    pub fn endpoints(hosts: &[&str]) -> Vec<EndpointStats> {
        hosts.iter().map(|h| EndpointStats::new(*h, 80)).collect()
    }

    pub fn mark_down(stats: &mut EndpointStats, now: DateTime<Utc>) {
        for _ in 0..3 {
            stats.record_start();
            stats.record_end(false, now);
        }
    }

    pub fn refs(stats: &[EndpointStats]) -> Vec<&EndpointStats> {
        stats.iter().collect()
    }

    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::{test_utils::*, *};

    #[test]
    fn test_healthy_indices_skip_failed_endpoints() {
        let now = now();
        let mut stats = endpoints(&["a", "b", "c"]);
        mark_down(&mut stats[1], now);

        let mut counter = 0;
        let ctx = SelectionContext {
            model: "m",
            now,
            counter: &mut counter,
        };
        assert_eq!(get_healthy_endpoint_indices(&refs(&stats), &ctx), vec![0, 2]);
    }

    #[test]
    fn test_healthy_indices_fall_back_to_all() {
        let now = now();
        let mut stats = endpoints(&["a", "b"]);
        mark_down(&mut stats[0], now);
        mark_down(&mut stats[1], now);

        let mut counter = 0;
        let ctx = SelectionContext {
            model: "m",
            now,
            counter: &mut counter,
        };
        assert_eq!(get_healthy_endpoint_indices(&refs(&stats), &ctx), vec![0, 1]);
    }
}
