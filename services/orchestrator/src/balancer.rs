//! Load balancer: strategy-driven worker selection and stat accounting
//!
//! Cursors for round-robin are per-key and survive candidate churn; after a
//! worker leaves, a recorded cursor may land on a different worker, which is
//! acceptable drift. The in-flight counter lives here too: the router
//! increments it before dispatch and a guard decrements on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;

use infermesh_core::protocol::{Strategy, WorkerInfo, WorkerStats};

#[derive(Default)]
struct BalancerInner {
    stats: HashMap<String, WorkerStats>,
    cursors: HashMap<String, usize>,
}

/// Strategy-driven selection plus per-worker stats
pub struct LoadBalancer {
    strategy: Strategy,
    inner: Mutex<BalancerInner>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            inner: Mutex::new(BalancerInner::default()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick one worker from a non-empty candidate list
    ///
    /// `key` scopes the round-robin cursor (normally the model id).
    pub fn pick(&self, candidates: &[WorkerInfo], key: &str) -> WorkerInfo {
        assert!(!candidates.is_empty(), "pick requires candidates");
        if candidates.len() == 1 {
            return candidates[0].clone();
        }
        match self.strategy {
            Strategy::RoundRobin => self.pick_round_robin(candidates, key),
            Strategy::LeastConnections => self.pick_least_connections(candidates),
            Strategy::Weighted => self.pick_weighted(candidates),
            Strategy::Random => {
                candidates[rand::thread_rng().gen_range(0..candidates.len())].clone()
            }
        }
    }

    fn pick_round_robin(&self, candidates: &[WorkerInfo], key: &str) -> WorkerInfo {
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        let cursor = inner.cursors.entry(key.to_string()).or_insert(0);
        let chosen = candidates[*cursor % candidates.len()].clone();
        *cursor = (*cursor + 1) % candidates.len();
        chosen
    }

    fn pick_least_connections(&self, candidates: &[WorkerInfo]) -> WorkerInfo {
        let inner = self.inner.lock().expect("balancer lock poisoned");
        candidates
            .iter()
            .min_by_key(|w| {
                inner
                    .stats
                    .get(&w.id)
                    .map(|s| s.current_load)
                    .unwrap_or(0)
            })
            .expect("candidates checked non-empty")
            .clone()
    }

    fn pick_weighted(&self, candidates: &[WorkerInfo]) -> WorkerInfo {
        let inner = self.inner.lock().expect("balancer lock poisoned");
        let weights: Vec<f64> = candidates
            .iter()
            .map(|w| match inner.stats.get(&w.id) {
                Some(stats) if stats.request_count > 0 => {
                    let avg = stats.average_processing_ms.max(1.0);
                    stats.success_rate() * (1000.0 / avg)
                }
                // No traffic yet: neutral weight
                _ => 1.0,
            })
            .collect();
        drop(inner);

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
        }
        let mut point = rand::thread_rng().gen_range(0.0..total);
        for (worker, weight) in candidates.iter().zip(&weights) {
            if point < *weight {
                return worker.clone();
            }
            point -= weight;
        }
        candidates[candidates.len() - 1].clone()
    }

    /// Claim an in-flight slot for a worker; released when the guard drops
    pub fn begin_request(self: &Arc<Self>, worker_id: &str) -> InFlightGuard {
        {
            let mut inner = self.inner.lock().expect("balancer lock poisoned");
            let stats = inner.stats.entry(worker_id.to_string()).or_default();
            stats.current_load += 1;
        }
        InFlightGuard {
            balancer: Arc::clone(self),
            worker_id: worker_id.to_string(),
        }
    }

    /// Record a completed request
    pub fn complete(&self, worker_id: &str, processing_ms: u64, success: bool) {
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        let stats = inner.stats.entry(worker_id.to_string()).or_default();
        stats.request_count += 1;
        if success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.total_processing_ms += processing_ms;
        stats.average_processing_ms =
            stats.total_processing_ms as f64 / stats.request_count as f64;
        stats.last_request_at = Some(Utc::now());
    }

    /// Stats for one worker
    pub fn stats_for(&self, worker_id: &str) -> Option<WorkerStats> {
        self.inner
            .lock()
            .expect("balancer lock poisoned")
            .stats
            .get(worker_id)
            .cloned()
    }

    /// Stats for every tracked worker
    pub fn all_stats(&self) -> HashMap<String, WorkerStats> {
        self.inner
            .lock()
            .expect("balancer lock poisoned")
            .stats
            .clone()
    }

    /// Forget a worker's stats and cursor bookkeeping
    pub fn forget(&self, worker_id: &str) {
        let mut inner = self.inner.lock().expect("balancer lock poisoned");
        inner.stats.remove(worker_id);
    }
}

/// RAII in-flight slot; decrements the worker's load on drop
pub struct InFlightGuard {
    balancer: Arc<LoadBalancer>,
    worker_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut inner = self
            .balancer
            .inner
            .lock()
            .expect("balancer lock poisoned");
        if let Some(stats) = inner.stats.get_mut(&self.worker_id) {
            stats.current_load = stats.current_load.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infermesh_core::protocol::{WorkerCapabilities, WorkerCapacity, WorkerState};

    fn worker(id: &str) -> WorkerInfo {
        let now = Utc::now();
        WorkerInfo {
            id: id.to_string(),
            address: format!("http://workers/{}", id),
            capabilities: WorkerCapabilities::default(),
            capacity: WorkerCapacity::default(),
            registered_at: now,
            last_seen: now,
            status: WorkerState::Active,
        }
    }

    #[test]
    fn test_round_robin_cycles_per_key() {
        let balancer = LoadBalancer::new(Strategy::RoundRobin);
        let candidates = vec![worker("w1"), worker("w2"), worker("w3")];

        let picks: Vec<String> = (0..6)
            .map(|_| balancer.pick(&candidates, "m1").id)
            .collect();
        assert_eq!(picks, vec!["w1", "w2", "w3", "w1", "w2", "w3"]);

        // A different key starts its own cursor
        assert_eq!(balancer.pick(&candidates, "m2").id, "w1");
    }

    #[test]
    fn test_round_robin_cursor_survives_candidate_changes() {
        let balancer = LoadBalancer::new(Strategy::RoundRobin);
        let three = vec![worker("w1"), worker("w2"), worker("w3")];
        balancer.pick(&three, "m1");
        balancer.pick(&three, "m1");

        // Candidate set shrank; the cursor may drift but must stay in range
        let two = vec![worker("w1"), worker("w2")];
        let pick = balancer.pick(&two, "m1");
        assert!(pick.id == "w1" || pick.id == "w2");
    }

    #[test]
    fn test_single_candidate_short_circuits() {
        let balancer = LoadBalancer::new(Strategy::Weighted);
        let candidates = vec![worker("only")];
        assert_eq!(balancer.pick(&candidates, "m1").id, "only");
    }

    #[test]
    fn test_least_connections_prefers_idle_worker() {
        let balancer = Arc::new(LoadBalancer::new(Strategy::LeastConnections));
        let candidates = vec![worker("w1"), worker("w2")];

        let _guard = balancer.begin_request("w1");
        assert_eq!(balancer.pick(&candidates, "m1").id, "w2");
    }

    #[test]
    fn test_least_connections_tie_breaks_by_encounter_order() {
        let balancer = LoadBalancer::new(Strategy::LeastConnections);
        let candidates = vec![worker("w2"), worker("w1")];
        assert_eq!(balancer.pick(&candidates, "m1").id, "w2");
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let balancer = Arc::new(LoadBalancer::new(Strategy::LeastConnections));
        {
            let _guard = balancer.begin_request("w1");
            assert_eq!(balancer.stats_for("w1").unwrap().current_load, 1);
        }
        assert_eq!(balancer.stats_for("w1").unwrap().current_load, 0);
    }

    #[test]
    fn test_complete_updates_averages() {
        let balancer = LoadBalancer::new(Strategy::RoundRobin);
        balancer.complete("w1", 100, true);
        balancer.complete("w1", 200, false);

        let stats = balancer.stats_for("w1").unwrap();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.total_processing_ms, 300);
        assert!((stats.average_processing_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_prefers_fast_reliable_worker() {
        let balancer = LoadBalancer::new(Strategy::Weighted);
        // w1: fast and reliable; w2: slow and failing
        for _ in 0..20 {
            balancer.complete("w1", 10, true);
            balancer.complete("w2", 1000, false);
        }
        let candidates = vec![worker("w1"), worker("w2")];

        let mut w1_picks = 0;
        for _ in 0..200 {
            if balancer.pick(&candidates, "m1").id == "w1" {
                w1_picks += 1;
            }
        }
        // w1's weight is ~100, w2's is 0; a handful of w2 picks would mean
        // the sampling is wrong
        assert!(w1_picks > 190, "w1 picked only {} times", w1_picks);
    }

    #[test]
    fn test_weighted_unknown_stats_get_neutral_weight() {
        let balancer = LoadBalancer::new(Strategy::Weighted);
        let candidates = vec![worker("w1"), worker("w2")];

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(balancer.pick(&candidates, "m1").id);
        }
        // Equal weights: both should appear
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_random_stays_within_candidates() {
        let balancer = LoadBalancer::new(Strategy::Random);
        let candidates = vec![worker("w1"), worker("w2"), worker("w3")];
        for _ in 0..50 {
            let pick = balancer.pick(&candidates, "m1");
            assert!(candidates.iter().any(|w| w.id == pick.id));
        }
    }
}
