//! Factory for creating selection policies

use std::sync::Arc;

use super::{
    LeastConnectionsPolicy, LoadBalancingPolicy, RandomPolicy, RoundRobinPolicy,
    WeightedRoundRobinPolicy,
};

/// Factory for creating policy instances
pub struct PolicyFactory;

impl PolicyFactory {
    /// Names accepted by `create_by_name`.
    pub const STRATEGIES: [&'static str; 4] = [
        "round_robin",
        "random",
        "least_connections",
        "weighted_round_robin",
    ];

    /// Create a policy by exact strategy name
    pub fn create_by_name(name: &str) -> Option<Arc<dyn LoadBalancingPolicy>> {
        match name {
            "round_robin" => Some(Arc::new(RoundRobinPolicy::new())),
            "random" => Some(Arc::new(RandomPolicy::new())),
            "least_connections" => Some(Arc::new(LeastConnectionsPolicy::new())),
            "weighted_round_robin" => Some(Arc::new(WeightedRoundRobinPolicy::new())),
            _ => None,
        }
    }
}
