//! Secure-session cache and acquisition coordinator
//!
//! Serves the `{ security, identityKey }` pair some ISAPI services require,
//! caching it per device for a fixed TTL and collapsing concurrent
//! acquisitions for the same device into one network call.
//!
//! ## Invariants
//!
//! - At most one acquisition in flight per device id; every caller arriving
//!   while it runs receives the same result.
//! - The in-flight record is removed as soon as the acquisition settles,
//!   whatever the outcome, so a failure never blocks the next attempt.
//! - Expired or structurally invalid cache entries are deleted on sight and
//!   never returned.
//! - Cache failures degrade to misses. Metrics never steer decisions.

use crate::cache::SessionCache;
use crate::client::{IsapiClient, RequestOptions};
use crate::config::SessionConfig;
use crate::device::DeviceTarget;
use crate::{Error, Result};
use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Security token pair returned by the security-key endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureSession {
    pub security: String,
    #[serde(rename = "identityKey")]
    pub identity_key: String,
}

impl SecureSession {
    /// Both fields present and non-empty
    pub fn is_valid(&self) -> bool {
        !self.security.is_empty() && !self.identity_key.is_empty()
    }
}

/// Cache representation of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    #[serde(flatten)]
    pub session: SecureSession,
    /// Epoch milliseconds
    pub expires_at: i64,
}

impl CachedSession {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Wire shape of the security-key response; fields are checked after decoding
#[derive(Debug, Deserialize)]
struct SecurityKeyPayload {
    #[serde(default)]
    security: Option<String>,
    #[serde(default, rename = "identityKey")]
    identity_key: Option<String>,
}

/// Per-device counters, advisory only
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub acquisitions: u64,
    /// Epoch milliseconds of the last successful acquisition
    pub last_acquired_at: Option<i64>,
    /// Running mean over successful acquisitions
    pub avg_acquisition_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Skip both the cache and any in-flight acquisition
    pub force_refresh: bool,
    /// Passed through to the HTTP call
    pub timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            timeout: None,
        }
    }
}

/// Outcome of [`SessionService::preload_sessions`]
#[derive(Debug, Default)]
pub struct PreloadSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

type SharedAcquisition = Shared<BoxFuture<'static, Result<SecureSession>>>;

struct PendingAcquisition {
    /// Distinguishes a forced refresh from the acquisition it replaced
    generation: u64,
    future: SharedAcquisition,
}

struct Inner {
    client: Arc<IsapiClient>,
    cache: Arc<dyn SessionCache>,
    config: SessionConfig,
    pending: Mutex<HashMap<String, PendingAcquisition>>,
    metrics: RwLock<HashMap<String, SessionMetrics>>,
    generation: AtomicU64,
}

/// Session coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

impl SessionService {
    pub fn new(client: Arc<IsapiClient>, cache: Arc<dyn SessionCache>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                cache,
                config,
                pending: Mutex::new(HashMap::new()),
                metrics: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache_key(&self, device_id: &str) -> String {
        self.inner.cache_key(device_id)
    }

    /// Get a session for `device`, from cache, from an in-flight
    /// acquisition, or by acquiring a new one
    pub async fn get_session(&self, device: &DeviceTarget, options: SessionOptions) -> Result<SecureSession> {
        let device_id = &device.device_id;

        if !options.force_refresh {
            let in_flight = self
                .inner
                .pending
                .lock()
                .await
                .get(device_id)
                .map(|p| p.future.clone());
            if let Some(acquisition) = in_flight {
                debug!(device_id = %device_id, "Joining in-flight session acquisition");
                return acquisition.await;
            }

            if let Some(session) = self.inner.read_cached(device_id).await {
                self.inner.record_hit(device_id).await;
                debug!(device_id = %device_id, "Session served from cache");
                return Ok(session);
            }
        }

        let acquisition = {
            let mut pending = self.inner.pending.lock().await;
            // another caller may have registered while we were reading the cache
            let existing = if options.force_refresh {
                None
            } else {
                pending.get(device_id).map(|p| p.future.clone())
            };
            match existing {
                Some(future) => future,
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    // runs to completion even if every waiter gives up
                    let task = tokio::spawn(Inner::acquire(
                        Arc::clone(&self.inner),
                        device.clone(),
                        options.timeout,
                        generation,
                    ));
                    let future = async move {
                        task.await
                            .unwrap_or_else(|e| Err(Error::Acquisition(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    pending.insert(
                        device_id.clone(),
                        PendingAcquisition {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        acquisition.await
    }

    /// Forget the cached session and any in-flight acquisition record.
    ///
    /// An acquisition already running still answers its waiters but no longer
    /// writes its session to the cache.
    pub async fn clear_session(&self, device_id: &str) {
        self.inner.pending.lock().await.remove(device_id);
        if let Err(e) = self.inner.cache.del(&self.cache_key(device_id)).await {
            warn!(device_id = %device_id, error = %e, "Failed to delete cached session");
        }
        debug!(device_id = %device_id, "Session cleared");
    }

    /// Structural check only; no network call
    pub fn validate_session(&self, session: &SecureSession) -> bool {
        session.is_valid()
    }

    /// Acquire sessions for all `devices` concurrently.
    ///
    /// Failures are logged and collected; one bad device never stops the others.
    pub async fn preload_sessions(&self, devices: &[DeviceTarget]) -> PreloadSummary {
        let results = join_all(devices.iter().map(|device| async move {
            let result = self.get_session(device, SessionOptions::default()).await;
            (device.device_id.clone(), result)
        }))
        .await;

        let mut summary = PreloadSummary::default();
        for (device_id, result) in results {
            match result {
                Ok(_) => summary.succeeded.push(device_id),
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Session preload failed");
                    summary.failed.push((device_id, e));
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Session preload finished"
        );
        summary
    }

    pub async fn metrics(&self, device_id: &str) -> Option<SessionMetrics> {
        self.inner.metrics.read().await.get(device_id).cloned()
    }

    pub async fn all_metrics(&self) -> HashMap<String, SessionMetrics> {
        self.inner.metrics.read().await.clone()
    }

    pub async fn reset_metrics(&self) {
        self.inner.metrics.write().await.clear();
    }
}

impl Inner {
    fn cache_key(&self, device_id: &str) -> String {
        format!("{}{}", self.config.cache_key_prefix, device_id)
    }

    /// Spawned once per pending entry. Only the acquisition still registered
    /// under its generation may write the cache; a cleared or superseded one
    /// just hands its result to the callers already waiting on it.
    async fn acquire(
        inner: Arc<Inner>,
        device: DeviceTarget,
        timeout: Option<Duration>,
        generation: u64,
    ) -> Result<SecureSession> {
        let result = inner.fetch(&device, timeout).await;

        // the cache write happens under the pending lock so clear_session
        // cannot slip in between the ownership check and the write
        let mut pending = inner.pending.lock().await;
        let current = pending
            .get(&device.device_id)
            .map_or(false, |p| p.generation == generation);
        if current {
            if let Ok(cached) = &result {
                inner.write_cached(&device.device_id, cached).await;
            }
            pending.remove(&device.device_id);
        } else if result.is_ok() {
            debug!(device_id = %device.device_id, "Acquisition cleared or superseded, not caching");
        }
        drop(pending);

        match result {
            Ok(cached) => Ok(cached.session),
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "Session acquisition failed");
                Err(e)
            }
        }
    }

    async fn fetch(&self, device: &DeviceTarget, timeout: Option<Duration>) -> Result<CachedSession> {
        let started = Instant::now();

        let options = RequestOptions::get(self.config.security_key_path.as_str()).with_timeout(timeout);
        let payload: SecurityKeyPayload = self.client.request_json(device, options).await?;

        let session = SecureSession {
            security: payload.security.unwrap_or_default(),
            identity_key: payload.identity_key.unwrap_or_default(),
        };

        if !session.is_valid() {
            let missing = if session.security.is_empty() {
                "security"
            } else {
                "identityKey"
            };
            return Err(Error::SessionValidation(format!(
                "device {} returned a session without {}",
                device.device_id, missing
            )));
        }

        let ttl_ms = i64::try_from(self.config.ttl.as_millis()).unwrap_or(i64::MAX);
        let cached = CachedSession {
            session,
            expires_at: Utc::now().timestamp_millis().saturating_add(ttl_ms),
        };

        let elapsed = started.elapsed();
        self.record_acquisition(&device.device_id, elapsed).await;

        info!(
            device_id = %device.device_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Secure session acquired"
        );
        Ok(cached)
    }

    /// Valid unexpired session from the cache; anything else is a miss
    async fn read_cached(&self, device_id: &str) -> Option<SecureSession> {
        let key = self.cache_key(device_id);

        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Session cache read failed");
                return None;
            }
        };

        let stale_reason = match serde_json::from_str::<CachedSession>(&raw) {
            Ok(cached) if cached.is_expired_at(Utc::now().timestamp_millis()) => "expired",
            Ok(cached) if !cached.session.is_valid() => "incomplete",
            Ok(cached) => return Some(cached.session),
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Discarding unreadable cached session");
                "unreadable"
            }
        };

        debug!(device_id = %device_id, reason = stale_reason, "Evicting cached session");
        if let Err(e) = self.cache.del(&key).await {
            warn!(device_id = %device_id, error = %e, "Failed to delete stale cached session");
        }
        None
    }

    async fn write_cached(&self, device_id: &str, cached: &CachedSession) {
        let value = match serde_json::to_string(cached) {
            Ok(v) => v,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to serialize session");
                return;
            }
        };

        let ttl_secs = self.config.ttl.as_secs().max(1);
        if let Err(e) = self.cache.set(&self.cache_key(device_id), value, ttl_secs).await {
            warn!(device_id = %device_id, error = %e, "Session cache write failed");
        }
    }

    async fn record_hit(&self, device_id: &str) {
        let mut metrics = self.metrics.write().await;
        metrics.entry(device_id.to_string()).or_default().cache_hits += 1;
    }

    async fn record_acquisition(&self, device_id: &str, elapsed: Duration) {
        let mut metrics = self.metrics.write().await;
        let m = metrics.entry(device_id.to_string()).or_default();
        m.cache_misses += 1;
        m.acquisitions += 1;
        m.last_acquired_at = Some(Utc::now().timestamp_millis());
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        m.avg_acquisition_ms += (elapsed_ms - m.avg_acquisition_ms) / m.acquisitions as f64;
    }
}
