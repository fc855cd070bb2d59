//! Short-lived caches of quota objects, keyed by project.

use k8s_openapi::api::core::v1::{LimitRange, ResourceQuota};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Thread-safe map from project name to an object list snapshot with
/// per-entry expiry. Readers get a snapshot or nothing; racing writers after
/// a miss simply overwrite each other, which is fine because every stored
/// value is a freshly listed snapshot.
pub struct ProjectObjectListCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

struct CacheEntry<T> {
    value: Arc<T>,
    expires_at: Instant,
}

impl<T> ProjectObjectListCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached snapshot for the project, dropping it when it has
    /// expired.
    pub fn get(&self, project: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(project) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(project);
                None
            }
            None => None,
        }
    }

    pub fn add(&self, project: &str, value: Arc<T>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            project.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Caches of quota objects shared by every admission check of the process.
/// Both caches stay disabled when no TTL is configured.
pub struct QuotaEnforcingCaches {
    pub resource_quotas: Option<ProjectObjectListCache<Vec<ResourceQuota>>>,
    pub limit_ranges: Option<ProjectObjectListCache<Vec<LimitRange>>>,
}

impl QuotaEnforcingCaches {
    pub fn new(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) if !ttl.is_zero() => {
                debug!("Caching project quota objects with TTL {:?}", ttl);
                Self {
                    resource_quotas: Some(ProjectObjectListCache::new(ttl)),
                    limit_ranges: Some(ProjectObjectListCache::new(ttl)),
                }
            }
            _ => {
                debug!("Not using project caches for quota objects");
                Self {
                    resource_quotas: None,
                    limit_ranges: None,
                }
            }
        }
    }
}
