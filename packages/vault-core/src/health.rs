//! Health collaborator with a cached-result policy

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Reports whether the remote service is reachable
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Health caching policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthConfig {
    /// How long a probe result stays valid; `None` keeps it until replaced
    pub ttl_ms: Option<u64>,
    /// Probe on every call, ignoring any cached result
    pub check_every_time: bool,
}

/// Caches probe results according to [`HealthConfig`].
///
/// - `check_every_time` → always probe
/// - nothing known yet → probe and remember
/// - no TTL → last known value
/// - TTL elapsed → probe again
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    last: Mutex<Option<(bool, Instant)>>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, config: HealthConfig) -> Self {
        Self {
            probe,
            config,
            last: Mutex::new(None),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        if self.config.check_every_time {
            return self.refresh().await;
        }

        let last = *self.last.lock();
        match (last, self.config.ttl_ms) {
            (None, _) => self.refresh().await,
            (Some((healthy, _)), None) => healthy,
            (Some((_, at)), Some(ttl)) if at.elapsed() >= Duration::from_millis(ttl) => {
                self.refresh().await
            }
            (Some((healthy, _)), Some(_)) => healthy,
        }
    }

    /// Probe now and remember the result
    pub async fn refresh(&self) -> bool {
        let healthy = self.probe.probe().await;
        debug!("Health probe: {}", if healthy { "healthy" } else { "unhealthy" });
        *self.last.lock() = Some((healthy, Instant::now()));
        healthy
    }

    /// Override the cached value (e.g. from a connectivity event)
    pub fn set(&self, healthy: bool) {
        *self.last.lock() = Some((healthy, Instant::now()));
    }

    pub fn last_known(&self) -> Option<bool> {
        self.last.lock().map(|(healthy, _)| healthy)
    }
}

/// Probe whose answer is switched by the application
#[derive(Debug)]
pub struct ManualProbe {
    healthy: AtomicBool,
    probes: AtomicUsize,
}

impl ManualProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of times the probe was consulted
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Default for ManualProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl HealthProbe for ManualProbe {
    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}
