use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::worker::handler::Handler;
use crate::worker::limiter::RateLimiter;

#[derive(Clone)]
struct Entry {
    handler: Arc<dyn Handler>,
    limiter: Arc<RateLimiter>,
}

/// Thread-safe mapping of job type to (handler, rate limiter).
///
/// This is the seam between the core, which knows nothing about emails or
/// PDFs, and the handler catalog. Lookups are the hot path; registration
/// happens once at startup.
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Install a handler for `job_type`. A positive `events_per_second`
    /// attaches a token bucket with rate and burst equal to that value;
    /// zero or negative means unlimited. Re-registering overwrites.
    pub fn register(&self, job_type: &str, handler: Arc<dyn Handler>, events_per_second: i32) {
        let limiter = if events_per_second > 0 {
            RateLimiter::per_second(events_per_second as u32)
        } else {
            RateLimiter::unlimited()
        };

        self.entries.write().unwrap().insert(
            job_type.to_string(),
            Entry {
                handler,
                limiter: Arc::new(limiter),
            },
        );
    }

    pub fn get(&self, job_type: &str) -> Option<(Arc<dyn Handler>, Arc<RateLimiter>)> {
        self.entries
            .read()
            .unwrap()
            .get(job_type)
            .map(|e| (e.handler.clone(), e.limiter.clone()))
    }

    /// Existence check used by the submission API to reject unknown types
    /// at ingress.
    pub fn has(&self, job_type: &str) -> bool {
        self.entries.read().unwrap().contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.read().unwrap().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
