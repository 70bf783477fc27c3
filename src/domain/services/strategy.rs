//! Balancing Strategies
//!
//! Pure selection logic over the backend registry. Two variants: round
//! robin (atomic cursor, strict rotation) and least connections (minimum
//! scan with occupancy tracking). The dispatcher checks the occupancy
//! capability once at construction, not per request.

use crate::domain::registry::BackendRegistry;
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Selection failure: every backend in the pool is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no available backends")]
    NoAvailableBackend,
}

/// Round-robin selector.
///
/// The cursor holds the next position to inspect. A call walks at most N
/// positions from the cursor, selects the first healthy backend at
/// position p, and commits the cursor to `(p + 1) % N` with a CAS so that
/// concurrent callers observe a strict rotation.
pub struct RoundRobin {
    registry: Arc<BackendRegistry>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Result<Url, SelectError> {
        let backends = self.registry.all();
        let n = backends.len();
        if n == 0 {
            return Err(SelectError::NoAvailableBackend);
        }

        'rescan: loop {
            let start = self.cursor.load(Ordering::Acquire);
            for step in 0..n {
                let pos = (start + step) % n;
                let backend = &backends[pos];
                if !backend.is_healthy() {
                    continue;
                }
                if self
                    .cursor
                    .compare_exchange(
                        start,
                        (pos + 1) % n,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return Ok(backend.url().clone());
                }
                // Lost the race to another caller; restart from the
                // committed cursor to keep the rotation strict.
                continue 'rescan;
            }
            tracing::warn!("all backends are unavailable");
            return Err(SelectError::NoAvailableBackend);
        }
    }

    #[cfg(test)]
    fn seed_cursor(&self, pos: usize) {
        self.cursor.store(pos, Ordering::Release);
    }
}

/// Least-connections selector.
///
/// Scans healthy backends for the smallest active-connection count; ties
/// go to the first backend in registry order. The counter is incremented
/// before the URL is returned, and the caller must release exactly once
/// per successful selection.
pub struct LeastConnections {
    registry: Arc<BackendRegistry>,
}

impl LeastConnections {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    pub fn next(&self) -> Result<Url, SelectError> {
        let mut selected = None;
        let mut min_connections = i64::MAX;

        for backend in self.registry.all() {
            if !backend.is_healthy() {
                continue;
            }
            let connections = backend.active_connections();
            if connections < min_connections {
                min_connections = connections;
                selected = Some(backend);
            }
        }

        let Some(backend) = selected else {
            tracing::warn!("all backends are unavailable");
            return Err(SelectError::NoAvailableBackend);
        };

        backend.acquire_connection();
        Ok(backend.url().clone())
    }

    pub fn release(&self, url: &str) {
        self.registry.adjust_connections(url, -1);
    }
}

/// The configured balancing strategy.
pub enum Strategy {
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
}

impl Strategy {
    pub fn round_robin(registry: Arc<BackendRegistry>) -> Self {
        Self::RoundRobin(RoundRobin::new(registry))
    }

    pub fn least_connections(registry: Arc<BackendRegistry>) -> Self {
        Self::LeastConnections(LeastConnections::new(registry))
    }

    /// Select a backend for the next request.
    pub fn next(&self) -> Result<Url, SelectError> {
        match self {
            Strategy::RoundRobin(rr) => rr.next(),
            Strategy::LeastConnections(lc) => lc.next(),
        }
    }

    /// Return the connection slot claimed by `next`. No-op for strategies
    /// that do not track occupancy.
    pub fn release(&self, url: &str) {
        if let Strategy::LeastConnections(lc) = self {
            lc.release(url);
        }
    }

    /// Whether `next` claims a slot that must be released per dispatch.
    pub fn tracks_occupancy(&self) -> bool {
        matches!(self, Strategy::LeastConnections(_))
    }

    /// The registry this strategy selects from.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        match self {
            Strategy::RoundRobin(rr) => &rr.registry,
            Strategy::LeastConnections(lc) => &lc.registry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn registry(urls: &[&str]) -> Arc<BackendRegistry> {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        Arc::new(BackendRegistry::new(&urls).unwrap())
    }

    #[test]
    fn test_round_robin_strict_rotation() {
        let reg = registry(&["http://b1", "http://b2"]);
        let rr = RoundRobin::new(reg);

        let picks: Vec<String> = (0..4).map(|_| rr.next().unwrap().into()).collect();
        assert_eq!(
            picks,
            vec!["http://b1/", "http://b2/", "http://b1/", "http://b2/"]
        );
    }

    #[test]
    fn test_round_robin_seeded_to_second_backend() {
        let reg = registry(&["http://b1", "http://b2"]);
        let rr = RoundRobin::new(reg);
        rr.seed_cursor(1);

        assert_eq!(rr.next().unwrap().host_str(), Some("b2"));
        assert_eq!(rr.next().unwrap().host_str(), Some("b1"));
        assert_eq!(rr.next().unwrap().host_str(), Some("b2"));
    }

    #[test]
    fn test_round_robin_skips_unhealthy_backend() {
        let reg = registry(&["http://b1", "http://b2", "http://b3"]);
        reg.mark_status("http://b2", false);
        let rr = RoundRobin::new(reg);

        let hosts: Vec<&str> = (0..4)
            .map(|_| match rr.next().unwrap().host_str().unwrap() {
                "b1" => "b1",
                "b2" => "b2",
                _ => "b3",
            })
            .collect();
        assert_eq!(hosts, vec!["b1", "b3", "b1", "b3"]);
    }

    #[test]
    fn test_round_robin_all_unhealthy() {
        let reg = registry(&["http://b1", "http://b2"]);
        reg.mark_status("http://b1", false);
        reg.mark_status("http://b2", false);
        let rr = RoundRobin::new(reg.clone());

        assert_eq!(rr.next(), Err(SelectError::NoAvailableBackend));

        reg.mark_status("http://b1", true);
        assert_eq!(rr.next().unwrap().host_str(), Some("b1"));
    }

    #[test]
    fn test_round_robin_fair_split() {
        let reg = registry(&["http://b1", "http://b2", "http://b3"]);
        let rr = RoundRobin::new(reg);

        let mut counts: HashMap<String, usize> = HashMap::new();
        let m = 100;
        for _ in 0..m {
            let host = rr.next().unwrap().host_str().unwrap().to_string();
            *counts.entry(host).or_default() += 1;
        }

        // Each backend is selected either floor(M/N) or ceil(M/N) times.
        for count in counts.values() {
            assert!(*count == 33 || *count == 34, "uneven split: {counts:?}");
        }
    }

    #[test]
    fn test_round_robin_concurrent_fairness() {
        use std::sync::Mutex;
        use std::thread;

        let reg = registry(&["http://b1", "http://b2", "http://b3", "http://b4"]);
        let rr = Arc::new(RoundRobin::new(reg));
        let counts = Arc::new(Mutex::new(HashMap::<String, usize>::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let rr = rr.clone();
            let counts = counts.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let host = rr.next().unwrap().host_str().unwrap().to_string();
                    *counts.lock().unwrap().entry(host).or_default() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 400 selections over 4 backends: exactly 100 each.
        let counts = counts.lock().unwrap();
        for count in counts.values() {
            assert_eq!(*count, 100, "unfair split: {counts:?}");
        }
    }

    #[test]
    fn test_least_connections_picks_minimum() {
        let reg = registry(&["http://b1", "http://b2", "http://b3"]);
        reg.get("http://b1").unwrap().acquire_connection();
        reg.get("http://b1").unwrap().acquire_connection();
        reg.get("http://b3").unwrap().acquire_connection();
        let lc = LeastConnections::new(reg.clone());

        let url = lc.next().unwrap();
        assert_eq!(url.host_str(), Some("b2"));
        assert_eq!(reg.get("http://b2").unwrap().active_connections(), 1);
    }

    #[test]
    fn test_least_connections_tie_breaks_by_order() {
        let reg = registry(&["http://b1", "http://b2"]);
        let lc = LeastConnections::new(reg);

        assert_eq!(lc.next().unwrap().host_str(), Some("b1"));
        // b1 now has one connection, so b2 is the new minimum.
        assert_eq!(lc.next().unwrap().host_str(), Some("b2"));
    }

    #[test]
    fn test_least_connections_skips_unhealthy() {
        let reg = registry(&["http://b1", "http://b2"]);
        reg.mark_status("http://b1", false);
        let lc = LeastConnections::new(reg);

        assert_eq!(lc.next().unwrap().host_str(), Some("b2"));
    }

    #[test]
    fn test_least_connections_all_unhealthy() {
        let reg = registry(&["http://b1"]);
        reg.mark_status("http://b1", false);
        let lc = LeastConnections::new(reg);

        assert_eq!(lc.next(), Err(SelectError::NoAvailableBackend));
    }

    #[test]
    fn test_least_connections_release_balances_to_zero() {
        let reg = registry(&["http://b1", "http://b2", "http://b3"]);
        let lc = LeastConnections::new(reg.clone());

        let picked: Vec<Url> = (0..9).map(|_| lc.next().unwrap()).collect();
        for url in &picked {
            lc.release(url.as_str());
        }

        let total: i64 = reg.all().iter().map(|b| b.active_connections()).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_strategy_capability_marker() {
        let reg = registry(&["http://b1"]);
        assert!(!Strategy::round_robin(reg.clone()).tracks_occupancy());
        assert!(Strategy::least_connections(reg).tracks_occupancy());
    }

    #[test]
    fn test_strategy_exposes_its_registry() {
        let reg = registry(&["http://b1", "http://b2"]);
        let rr = Strategy::round_robin(reg.clone());
        let lc = Strategy::least_connections(reg.clone());

        assert_eq!(rr.registry().len(), 2);
        assert!(Arc::ptr_eq(rr.registry(), &reg));
        assert!(Arc::ptr_eq(lc.registry(), &reg));

        // Mutations through the accessor are visible to the strategy.
        rr.registry().mark_status("http://b1", false);
        assert_eq!(rr.next().unwrap().host_str(), Some("b2"));
    }

    #[test]
    fn test_strategy_release_is_noop_for_round_robin() {
        let reg = registry(&["http://b1"]);
        let strategy = Strategy::round_robin(reg.clone());
        let url = strategy.next().unwrap();
        strategy.release(url.as_str());
        assert_eq!(reg.get("http://b1").unwrap().active_connections(), 0);
    }

    #[test]
    fn test_strategy_dispatches_to_variant() {
        let reg = registry(&["http://b1", "http://b2"]);
        let strategy = Strategy::least_connections(reg.clone());

        let url = strategy.next().unwrap();
        assert_eq!(reg.get(url.as_str()).unwrap().active_connections(), 1);
        strategy.release(url.as_str());
        assert_eq!(reg.get(url.as_str()).unwrap().active_connections(), 0);
    }
}
