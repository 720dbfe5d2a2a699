//! Load balancer owning the per-(model, endpoint) statistics table
//!
//! One mutex guards the whole table. `get_endpoint` creates any missing
//! entries and runs the selection policy inside a single critical section,
//! so a concurrent reset can never interleave between the two.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    endpoint::{ModelEndpoint, DEFAULT_PORT},
    endpoint_stats::{endpoint_key, EndpointStats, EndpointStatsSnapshot},
    Clock, GatewayError, GatewayResult, SystemClock,
};
use crate::policies::{LoadBalancingPolicy, PolicyFactory, RoundRobinPolicy, SelectionContext};

#[derive(Debug, Default)]
struct ModelTable {
    endpoints: HashMap<String, EndpointStats>,
    rr_counter: usize,
}

#[derive(Debug)]
pub struct LoadBalancer {
    strategy: String,
    policy: Arc<dyn LoadBalancingPolicy>,
    fallback: bool,
    clock: Arc<dyn Clock>,
    tables: Mutex<HashMap<String, ModelTable>>,
}

impl LoadBalancer {
    pub fn new(strategy: &str) -> Self {
        Self::with_clock(strategy, Arc::new(SystemClock))
    }

    pub fn with_clock(strategy: &str, clock: Arc<dyn Clock>) -> Self {
        let (policy, fallback) = match PolicyFactory::create_by_name(strategy) {
            Some(policy) => (policy, false),
            None => {
                warn!(
                    "Unknown strategy '{}', falling back to round_robin",
                    strategy
                );
                (
                    Arc::new(RoundRobinPolicy::new()) as Arc<dyn LoadBalancingPolicy>,
                    true,
                )
            }
        };

        info!("Initialized load balancer with strategy: {}", strategy);

        Self {
            strategy: strategy.to_string(),
            policy,
            fallback,
            clock,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// The strategy name this balancer was configured with.
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Name of the policy actually used for selection.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Select an endpoint for `model_name` from the configured candidates.
    ///
    /// A single host is returned directly without touching the stats table.
    /// When every candidate is unhealthy one is still returned.
    pub fn get_endpoint(
        &self,
        hosts: &[String],
        ports: &[u16],
        model_name: &str,
    ) -> GatewayResult<(String, u16)> {
        if hosts.is_empty() {
            return Err(GatewayError::InvalidInput {
                reason: "No hosts provided for load balancing".to_string(),
            });
        }

        if hosts.len() == 1 {
            let port = ports.first().copied().unwrap_or(DEFAULT_PORT);
            return Ok((hosts[0].clone(), port));
        }

        let ports = normalize_ports(hosts.len(), ports);

        if self.fallback {
            warn!(
                "Unknown strategy '{}', falling back to round_robin",
                self.strategy
            );
        }

        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let ModelTable {
            endpoints,
            rr_counter,
        } = tables.entry(model_name.to_string()).or_default();

        for (host, port) in hosts.iter().zip(ports.iter()) {
            endpoints
                .entry(endpoint_key(host, *port))
                .or_insert_with(|| EndpointStats::new(host.as_str(), *port));
        }

        let endpoints = &*endpoints;
        let candidates: Vec<&EndpointStats> = hosts
            .iter()
            .zip(ports.iter())
            .filter_map(|(host, port)| endpoints.get(&endpoint_key(host, *port)))
            .collect();

        let mut ctx = SelectionContext {
            model: model_name,
            now,
            counter: rr_counter,
        };
        let selected = self
            .policy
            .select_endpoint(&candidates, &mut ctx)
            .unwrap_or(0);

        Ok((hosts[selected].clone(), ports[selected]))
    }

    /// Select an endpoint and bind it to the model it was selected for.
    pub fn select_endpoint(
        &self,
        hosts: &[String],
        ports: &[u16],
        model_name: &str,
    ) -> GatewayResult<ModelEndpoint> {
        let (host, port) = self.get_endpoint(hosts, ports, model_name)?;
        Ok(ModelEndpoint {
            model: model_name.to_string(),
            host,
            port,
        })
    }

    /// Record a request start. A no-op for endpoints never selected.
    pub fn mark_request_start(&self, host: &str, port: u16, model_name: &str) {
        let mut tables = self.tables.lock();
        if let Some(stats) = tables
            .get_mut(model_name)
            .and_then(|table| table.endpoints.get_mut(&endpoint_key(host, port)))
        {
            stats.record_start();
            debug!(
                "Request start: {} ({} active)",
                stats.endpoint(),
                stats.active_connections
            );
        }
    }

    /// Record a request end. A no-op for endpoints never selected.
    pub fn mark_request_end(&self, host: &str, port: u16, model_name: &str, success: bool) {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        if let Some(stats) = tables
            .get_mut(model_name)
            .and_then(|table| table.endpoints.get_mut(&endpoint_key(host, port)))
        {
            stats.record_end(success, now);
            if !success {
                warn!(
                    "Request failed: {} ({} consecutive failures)",
                    stats.endpoint(),
                    stats.consecutive_failures
                );
            }
            debug!(
                "Request end: {} ({} active, success={})",
                stats.endpoint(),
                stats.active_connections,
                success
            );
        }
    }

    /// Snapshot of every endpoint tracked for `model_name`, keyed by `host:port`.
    pub fn get_stats(&self, model_name: &str) -> BTreeMap<String, EndpointStatsSnapshot> {
        let now = self.clock.now();
        let tables = self.tables.lock();
        tables
            .get(model_name)
            .map(|table| {
                table
                    .endpoints
                    .iter()
                    .map(|(key, stats)| (key.clone(), stats.snapshot(now)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every tracked model.
    pub fn get_all_stats(&self) -> BTreeMap<String, BTreeMap<String, EndpointStatsSnapshot>> {
        let now = self.clock.now();
        let tables = self.tables.lock();
        tables
            .iter()
            .map(|(model, table)| {
                let endpoints = table
                    .endpoints
                    .iter()
                    .map(|(key, stats)| (key.clone(), stats.snapshot(now)))
                    .collect();
                (model.clone(), endpoints)
            })
            .collect()
    }

    /// Clear statistics and the rotation counter for one model, or for all
    /// models when `model_name` is `None`.
    pub fn reset_stats(&self, model_name: Option<&str>) {
        let mut tables = self.tables.lock();
        match model_name {
            Some(model) => {
                if let Some(table) = tables.get_mut(model) {
                    table.endpoints.clear();
                    table.rr_counter = 0;
                    info!("Reset stats for {}", model);
                }
            }
            None => {
                tables.clear();
                info!("Reset all stats");
            }
        }
    }
}

/// Stretch `ports` to one entry per host.
fn normalize_ports(host_count: usize, ports: &[u16]) -> Vec<u16> {
    match ports {
        [] => vec![DEFAULT_PORT; host_count],
        [port] => vec![*port; host_count],
        _ if ports.len() == host_count => ports.to_vec(),
        _ => {
            warn!(
                "Ports length ({}) doesn't match hosts length ({}), using first port",
                ports.len(),
                host_count
            );
            vec![ports[0]; host_count]
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::core::ManualClock;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fail(lb: &LoadBalancer, host: &str, port: u16, model: &str, times: usize) {
        for _ in 0..times {
            lb.mark_request_start(host, port, model);
            lb.mark_request_end(host, port, model, false);
        }
    }

    #[test]
    fn test_empty_hosts_is_invalid_input() {
        let lb = LoadBalancer::new("round_robin");
        let err = lb.get_endpoint(&[], &[80], "m").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn test_single_host_shortcut() {
        let lb = LoadBalancer::new("round_robin");
        assert_eq!(
            lb.get_endpoint(&hosts(&["h"]), &[80], "m").unwrap(),
            ("h".to_string(), 80)
        );
        assert_eq!(
            lb.get_endpoint(&hosts(&["h"]), &[], "m").unwrap(),
            ("h".to_string(), DEFAULT_PORT)
        );
        assert!(lb.get_stats("m").is_empty());
    }

    #[test]
    fn test_round_robin_covers_every_endpoint() {
        let lb = LoadBalancer::new("round_robin");
        let hosts = hosts(&["a", "b", "c"]);
        let picked: Vec<String> = (0..3)
            .map(|_| lb.get_endpoint(&hosts, &[80], "m").unwrap().0)
            .collect();
        assert_eq!(picked, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ports_are_paired_or_broadcast() {
        let lb = LoadBalancer::new("round_robin");
        let two = hosts(&["a", "b"]);
        assert_eq!(lb.get_endpoint(&two, &[1, 2], "m").unwrap(), ("a".to_string(), 1));
        assert_eq!(lb.get_endpoint(&two, &[1, 2], "m").unwrap(), ("b".to_string(), 2));

        let lb = LoadBalancer::new("round_robin");
        let three = hosts(&["a", "b", "c"]);
        lb.get_endpoint(&three, &[7, 8], "m").unwrap();
        let stats = lb.get_stats("m");
        assert!(stats.contains_key("a:7"));
        assert!(stats.contains_key("b:7"));
        assert!(stats.contains_key("c:7"));
    }

    #[test]
    fn test_models_do_not_share_stats() {
        let lb = LoadBalancer::new("round_robin");
        let hosts = hosts(&["a", "b"]);
        lb.get_endpoint(&hosts, &[80], "m1").unwrap();
        lb.get_endpoint(&hosts, &[80], "m2").unwrap();

        fail(&lb, "a", 80, "m1", 3);

        assert!(!lb.get_stats("m1")["a:80"].is_healthy);
        assert!(lb.get_stats("m2")["a:80"].is_healthy);
    }

    #[test]
    fn test_accounting_on_unknown_endpoint_is_noop() {
        let lb = LoadBalancer::new("round_robin");
        lb.mark_request_start("ghost", 1, "m");
        lb.mark_request_end("ghost", 1, "m", false);
        assert!(lb.get_stats("m").is_empty());
        assert!(lb.get_all_stats().is_empty());
    }

    #[test]
    fn test_least_connections_tracks_active_requests() {
        let lb = LoadBalancer::new("least_connections");
        let hosts = hosts(&["a", "b", "c"]);
        lb.get_endpoint(&hosts, &[80], "m").unwrap();

        for _ in 0..3 {
            lb.mark_request_start("a", 80, "m");
        }
        lb.mark_request_start("c", 80, "m");

        let (host, _) = lb.get_endpoint(&hosts, &[80], "m").unwrap();
        assert_eq!(host, "b");

        lb.mark_request_start("b", 80, "m");
        lb.mark_request_start("b", 80, "m");
        let (host, _) = lb.get_endpoint(&hosts, &[80], "m").unwrap();
        assert_eq!(host, "c");
    }

    #[test]
    fn test_success_restores_failed_endpoint() {
        let lb = LoadBalancer::new("round_robin");
        let hosts = hosts(&["a", "b"]);
        lb.get_endpoint(&hosts, &[80], "m").unwrap();

        fail(&lb, "b", 80, "m", 3);
        assert!(!lb.get_stats("m")["b:80"].is_healthy);

        lb.mark_request_start("b", 80, "m");
        lb.mark_request_end("b", 80, "m", true);

        let stats = lb.get_stats("m");
        assert!(stats["b:80"].is_healthy);
        assert_eq!(stats["b:80"].consecutive_failures, 0);
        assert_eq!(stats["b:80"].total_failures, 3);
    }

    #[test]
    fn test_failure_window_heals_with_time() {
        let clock = Arc::new(ManualClock::default());
        let lb = LoadBalancer::with_clock("round_robin", clock.clone());
        let hosts = hosts(&["a", "b"]);
        lb.get_endpoint(&hosts, &[80], "m").unwrap();

        fail(&lb, "a", 80, "m", 3);
        assert!(!lb.get_stats("m")["a:80"].is_healthy);

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(lb.get_stats("m")["a:80"].is_healthy);
    }

    #[test]
    fn test_all_unhealthy_still_returns_endpoint() {
        for strategy in PolicyFactory::STRATEGIES {
            let lb = LoadBalancer::new(strategy);
            let hosts = hosts(&["a", "b"]);
            lb.get_endpoint(&hosts, &[80], "m").unwrap();
            fail(&lb, "a", 80, "m", 3);
            fail(&lb, "b", 80, "m", 3);

            let (host, port) = lb.get_endpoint(&hosts, &[80], "m").unwrap();
            assert!(host == "a" || host == "b", "{strategy} returned {host}");
            assert_eq!(port, 80);
        }
    }

    #[test]
    fn test_active_connections_floor_at_zero() {
        let lb = LoadBalancer::new("round_robin");
        let hosts = hosts(&["a", "b"]);
        lb.get_endpoint(&hosts, &[80], "m").unwrap();

        lb.mark_request_start("a", 80, "m");
        for _ in 0..3 {
            lb.mark_request_end("a", 80, "m", true);
        }
        assert_eq!(lb.get_stats("m")["a:80"].active_connections, 0);
    }

    #[test]
    fn test_unknown_strategy_behaves_as_round_robin() {
        let lb = LoadBalancer::new("fastest_first");
        assert_eq!(lb.strategy(), "fastest_first");
        assert_eq!(lb.policy_name(), "round_robin");

        let hosts = hosts(&["a", "b"]);
        assert_eq!(lb.get_endpoint(&hosts, &[80], "m").unwrap().0, "a");
        assert_eq!(lb.get_endpoint(&hosts, &[80], "m").unwrap().0, "b");
    }

    #[test]
    fn test_reset_stats_per_model_and_global() {
        let lb = LoadBalancer::new("round_robin");
        let hosts = hosts(&["a", "b"]);
        lb.get_endpoint(&hosts, &[80], "m1").unwrap();
        lb.get_endpoint(&hosts, &[80], "m2").unwrap();

        lb.reset_stats(Some("m1"));
        assert!(lb.get_stats("m1").is_empty());
        assert_eq!(lb.get_stats("m2").len(), 2);
        // Counter restarts from the first endpoint
        assert_eq!(lb.get_endpoint(&hosts, &[80], "m1").unwrap().0, "a");

        lb.reset_stats(None);
        assert!(lb.get_all_stats().is_empty());
    }
}
