//! Round-robin selection policy

use super::{get_healthy_endpoint_indices, LoadBalancingPolicy, SelectionContext};
use crate::core::EndpointStats;

/// Round-robin selection policy
///
/// Cycles through the healthy endpoints of a model using the model's
/// rotation counter. With a stable healthy set of size N, N consecutive
/// selections return every endpoint exactly once.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy;

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn select_endpoint(
        &self,
        candidates: &[&EndpointStats],
        ctx: &mut SelectionContext<'_>,
    ) -> Option<usize> {
        let healthy_indices = get_healthy_endpoint_indices(candidates, ctx);
        if healthy_indices.is_empty() {
            return None;
        }

        let count = *ctx.counter;
        *ctx.counter = count.wrapping_add(1);
        let selected_idx = count % healthy_indices.len();

        tracing::debug!(
            "Round-robin selected {} for {} (index {}/{})",
            candidates[healthy_indices[selected_idx]].endpoint(),
            ctx.model,
            selected_idx,
            healthy_indices.len()
        );

        Some(healthy_indices[selected_idx])
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::test_utils::*;

    #[test]
    fn test_round_robin_selection() {
        let policy = RoundRobinPolicy::new();
        let stats = endpoints(&["w1", "w2", "w3"]);
        let candidates = refs(&stats);

        let mut counter = 0;
        let mut ctx = SelectionContext {
            model: "m",
            now: now(),
            counter: &mut counter,
        };
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(0));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(1));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(2));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(0));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(1));
    }

    #[test]
    fn test_round_robin_with_unhealthy_endpoints() {
        let policy = RoundRobinPolicy::new();
        let now = now();
        let mut stats = endpoints(&["w1", "w2", "w3"]);
        mark_down(&mut stats[1], now);
        let candidates = refs(&stats);

        let mut counter = 0;
        let mut ctx = SelectionContext {
            model: "m",
            now,
            counter: &mut counter,
        };
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(0));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(2));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(0));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(2));
    }

    #[test]
    fn test_round_robin_resumes_from_counter() {
        let policy = RoundRobinPolicy::new();
        let stats = endpoints(&["w1", "w2"]);
        let candidates = refs(&stats);

        let mut counter = 5;
        let mut ctx = SelectionContext {
            model: "m",
            now: now(),
            counter: &mut counter,
        };
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(1));
        assert_eq!(policy.select_endpoint(&candidates, &mut ctx), Some(0));
        assert_eq!(counter, 7);
    }
}
