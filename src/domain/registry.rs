//! Backend Registry
//!
//! Sole source of truth for pool composition and health. The pool is an
//! ordered sequence of backends (configuration order) plus a URL-to-index
//! map for O(1) status updates. Membership is fixed after construction, so
//! the list itself needs no synchronization; per-backend fields are atomic.

use crate::domain::entities::Backend;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a registry from configured URLs.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid backend URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("duplicate backend URL {0:?}")]
    DuplicateUrl(String),
    #[error("no backends configured")]
    Empty,
}

/// The shared backend pool.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
    index: HashMap<String, usize>,
}

impl BackendRegistry {
    /// Build a registry from configured URL strings, preserving order.
    pub fn new(urls: &[String]) -> Result<Self, RegistryError> {
        if urls.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut backends = Vec::with_capacity(urls.len());
        let mut index = HashMap::with_capacity(urls.len());

        for raw in urls {
            let url = Url::parse(raw).map_err(|e| RegistryError::InvalidUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            if !url.has_host() {
                return Err(RegistryError::InvalidUrl {
                    url: raw.clone(),
                    reason: "missing host".to_string(),
                });
            }

            let key = url.as_str().trim_end_matches('/').to_string();
            if index.contains_key(&key) {
                return Err(RegistryError::DuplicateUrl(raw.clone()));
            }
            index.insert(key, backends.len());
            backends.push(Arc::new(Backend::new(url)));
        }

        Ok(Self { backends, index })
    }

    /// All backends in configuration order, including unhealthy ones.
    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Look up a backend by URL string.
    pub fn get(&self, url: &str) -> Option<&Arc<Backend>> {
        self.index
            .get(url.trim_end_matches('/'))
            .map(|&i| &self.backends[i])
    }

    /// Backends currently marked healthy, in configuration order.
    pub fn healthy(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect()
    }

    /// Set the liveness flag on the backend with the given URL.
    ///
    /// Unknown URLs are a no-op. Transitions are logged at info level.
    pub fn mark_status(&self, url: &str, alive: bool) {
        if let Some(backend) = self.get(url) {
            let was = backend.set_healthy(alive);
            if was != alive {
                tracing::info!(backend = %backend.url(), alive, "backend status changed");
            }
        }
    }

    /// Adjust the active-connection counter on the backend with the given
    /// URL by +1 or -1. The counter never goes negative: an unmatched
    /// release is clamped and logged, since it indicates a
    /// release-without-acquire bug in the caller.
    pub fn adjust_connections(&self, url: &str, delta: i64) {
        let Some(backend) = self.get(url) else {
            return;
        };
        if delta >= 0 {
            backend.acquire_connection();
        } else if !backend.release_connection() {
            tracing::warn!(
                backend = %backend.url(),
                "connection released without matching acquire"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(urls: &[&str]) -> BackendRegistry {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        BackendRegistry::new(&urls).unwrap()
    }

    #[test]
    fn test_new_preserves_order() {
        let r = registry(&["http://b1:8080", "http://b2:8080", "http://b3:8080"]);
        assert_eq!(r.len(), 3);
        let hosts: Vec<_> = r
            .all()
            .iter()
            .map(|b| b.url().host_str().unwrap().to_string())
            .collect();
        assert_eq!(hosts, vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_new_rejects_empty() {
        assert!(matches!(
            BackendRegistry::new(&[]),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let err = BackendRegistry::new(&["not a url".to_string()]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidUrl { .. }));
    }

    #[test]
    fn test_new_rejects_duplicates() {
        let urls = vec!["http://b1:8080".to_string(), "http://b1:8080".to_string()];
        assert!(matches!(
            BackendRegistry::new(&urls),
            Err(RegistryError::DuplicateUrl(_))
        ));
    }

    #[test]
    fn test_get_by_url() {
        let r = registry(&["http://b1:8080", "http://b2:8080"]);
        assert!(r.get("http://b2:8080").is_some());
        assert!(r.get("http://b2:8080/").is_some());
        assert!(r.get("http://unknown:8080").is_none());
    }

    #[test]
    fn test_mark_status() {
        let r = registry(&["http://b1:8080", "http://b2:8080"]);
        r.mark_status("http://b1:8080", false);

        assert!(!r.get("http://b1:8080").unwrap().is_healthy());
        assert!(r.get("http://b2:8080").unwrap().is_healthy());

        r.mark_status("http://b1:8080", true);
        assert!(r.get("http://b1:8080").unwrap().is_healthy());
    }

    #[test]
    fn test_mark_status_unknown_url_is_noop() {
        let r = registry(&["http://b1:8080"]);
        r.mark_status("http://ghost:8080", false);
        assert!(r.get("http://b1:8080").unwrap().is_healthy());
    }

    #[test]
    fn test_healthy_filters_and_keeps_order() {
        let r = registry(&["http://b1:8080", "http://b2:8080", "http://b3:8080"]);
        r.mark_status("http://b2:8080", false);

        let healthy = r.healthy();
        assert_eq!(healthy.len(), 2);
        assert_eq!(healthy[0].url().host_str(), Some("b1"));
        assert_eq!(healthy[1].url().host_str(), Some("b3"));
    }

    #[test]
    fn test_adjust_connections() {
        let r = registry(&["http://b1:8080"]);
        r.adjust_connections("http://b1:8080", 1);
        r.adjust_connections("http://b1:8080", 1);
        assert_eq!(r.get("http://b1:8080").unwrap().active_connections(), 2);

        r.adjust_connections("http://b1:8080", -1);
        assert_eq!(r.get("http://b1:8080").unwrap().active_connections(), 1);
    }

    #[test]
    fn test_adjust_connections_never_negative() {
        let r = registry(&["http://b1:8080"]);
        r.adjust_connections("http://b1:8080", -1);
        assert_eq!(r.get("http://b1:8080").unwrap().active_connections(), 0);
    }

    #[test]
    fn test_adjust_connections_unknown_url_is_noop() {
        let r = registry(&["http://b1:8080"]);
        r.adjust_connections("http://ghost:8080", 1);
        assert_eq!(r.get("http://b1:8080").unwrap().active_connections(), 0);
    }
}
