//! The ratings cache service.
//!
//! [`RatingsService`] answers rating lookups from an in-memory table and keeps
//! that table fresh in the background:
//!
//! - the table is loaded lazily from the [`RatingStore`] on first use;
//! - a lookup that finds the cache stale spawns a sweep over the whole catalog
//!   and answers immediately with what is cached;
//! - at most one sweep runs at a time, items are fetched one after another
//!   with a fixed pause between provider calls;
//! - the time of the last sweep with at least one success is mirrored to the
//!   store so freshness survives restarts.
//!
//! Nothing on the read path returns an error. Store and provider failures are
//! logged and absorbed.

use crate::catalog::default_catalog;
use crate::config::RefreshConfig;
use crate::persist::{format_timestamp, parse_timestamp, RatingStore, StoreError, LAST_REFRESH_KEY};
use crate::provider::RatingProvider;
use crate::snapshot::{ItemId, RatingSnapshot, RatingsTable};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct RefreshState {
    last_refresh: Option<OffsetDateTime>,
    /// Set after a sweep in which every item failed; cleared by any success.
    last_failed_sweep: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep was already running.
    Skipped,
    Completed(SweepReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub success: bool,
    pub message: String,
}

impl ClearOutcome {
    fn ok(message: &str) -> Self { Self { success: true, message: message.to_string() } }
    fn failed(message: &str) -> Self { Self { success: false, message: message.to_string() } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub initialized: bool,
    pub refreshing: bool,
    pub last_refresh: Option<String>,
    pub cached_items: usize,
    pub provider_configured: bool,
}

/// Holds the single-flight flag for the lifetime of one sweep.
struct SweepGuard(Arc<AtomicBool>);

impl SweepGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

pub struct RatingsService {
    store: Arc<dyn RatingStore>,
    provider: Arc<dyn RatingProvider>,
    config: RefreshConfig,
    catalog: Vec<ItemId>,
    table: RwLock<RatingsTable>,
    state: RwLock<RefreshState>,
    initialized: OnceCell<()>,
    refreshing: Arc<AtomicBool>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl RatingsService {
    pub fn new(store: Arc<dyn RatingStore>, provider: Arc<dyn RatingProvider>, config: RefreshConfig) -> Arc<Self> {
        Self::with_catalog(store, provider, config, default_catalog())
    }

    pub fn with_catalog(
        store: Arc<dyn RatingStore>,
        provider: Arc<dyn RatingProvider>,
        config: RefreshConfig,
        catalog: Vec<ItemId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            provider,
            config,
            catalog,
            table: RwLock::new(RatingsTable::new()),
            state: RwLock::new(RefreshState::default()),
            initialized: OnceCell::new(),
            refreshing: Arc::new(AtomicBool::new(false)),
            sweep_task: Mutex::new(None),
        })
    }

    pub fn catalog(&self) -> &[ItemId] { &self.catalog }

    pub fn is_initialized(&self) -> bool { self.initialized.initialized() }

    pub fn is_refreshing(&self) -> bool { self.refreshing.load(Ordering::Acquire) }

    pub fn last_refresh(&self) -> Option<OffsetDateTime> { self.state.read().last_refresh }

    /// Load the table from the store once per service lifetime.
    pub async fn ensure_initialized(&self) {
        self.initialized.get_or_init(|| async { self.load_from_store() }).await;
    }

    fn load_from_store(&self) {
        let rows = self.store.load_ratings().unwrap_or_else(|e| {
            warn!(error = %e, "could not load cached ratings, starting empty");
            Vec::new()
        });
        let cached = rows.len();
        *self.table.write() = RatingsTable::from_snapshots(rows);

        match self.store.get_setting(LAST_REFRESH_KEY) {
            Ok(Some(raw)) => match parse_timestamp(&raw) {
                Some(at) => self.state.write().last_refresh = Some(at),
                None => warn!(value = %raw, "ignoring unparseable last refresh setting"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read last refresh setting"),
        }
        info!(cached, last_refresh = ?self.last_refresh(), "ratings cache initialized");
    }

    /// Whether a sweep is due at `now`.
    pub fn should_refresh(&self, now: OffsetDateTime) -> bool {
        let (last_refresh, last_failed) = {
            let state = self.state.read();
            (state.last_refresh, state.last_failed_sweep)
        };
        if let Some(failed_at) = last_failed {
            if now - failed_at < self.config.retry_backoff {
                return false;
            }
        }
        let reference = match last_refresh {
            Some(at) => at,
            // no settings row: fall back to the oldest cached fetch
            None => match self.table.read().oldest_fetch() {
                Some(at) => at,
                None => return true,
            },
        };
        now - reference > self.config.ttl
    }

    /// Cached snapshots for `item_ids`, possibly kicking off a background sweep.
    ///
    /// `origin` is the caller's network marker (usually the client IP). Callers
    /// matching the configured denylist read the cache but never start a sweep.
    pub async fn get_ratings<S: AsRef<str>>(self: &Arc<Self>, item_ids: &[S], origin: Option<&str>) -> Vec<RatingSnapshot> {
        self.ensure_initialized().await;

        if self.provider.is_configured() && self.should_refresh(OffsetDateTime::now_utc()) {
            if self.config.blocked_origins.permits(origin) {
                if !self.is_refreshing() {
                    self.trigger_refresh();
                }
            } else {
                debug!(origin, "origin may not trigger a ratings refresh");
            }
        }

        self.table.read().select(item_ids)
    }

    /// Spawn a sweep without waiting for it. Returns false if one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_refresh(self: &Arc<Self>) -> bool {
        let Some(guard) = SweepGuard::acquire(&self.refreshing) else {
            return false;
        };
        let service = Arc::clone(self);
        let sweep = tokio::spawn(async move {
            service.run_sweep(guard).await;
        });
        let watcher = tokio::spawn(async move {
            if let Err(e) = sweep.await {
                error!(error = %e, "ratings refresh task failed");
            }
        });
        *self.sweep_task.lock() = Some(watcher);
        true
    }

    /// Wait for the most recently spawned sweep, if any, to finish.
    pub async fn wait_for_refresh(&self) {
        let handle = self.sweep_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Run a sweep inline. Returns [`SweepOutcome::Skipped`] if one is already running.
    pub async fn refresh_all(&self) -> SweepOutcome {
        self.ensure_initialized().await;
        match SweepGuard::acquire(&self.refreshing) {
            Some(guard) => SweepOutcome::Completed(self.run_sweep(guard).await),
            None => {
                info!("ratings refresh already in progress, skipping");
                SweepOutcome::Skipped
            }
        }
    }

    async fn run_sweep(&self, _guard: SweepGuard) -> SweepReport {
        info!(items = self.catalog.len(), provider = self.provider.name(), "starting ratings refresh");
        let started = Instant::now();
        let mut succeeded = 0;
        let mut failed = 0;

        for item_id in &self.catalog {
            match self.provider.fetch(item_id).await {
                Ok(fetched) => {
                    let snapshot = RatingSnapshot::new(item_id.clone(), fetched.rating, fetched.review_count, OffsetDateTime::now_utc());
                    self.table.write().upsert(snapshot.clone());
                    if let Err(e) = self.store.upsert_rating(&snapshot) {
                        warn!(item_id = %item_id, error = %e, "could not persist rating");
                    }
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "rating fetch failed");
                    failed += 1;
                }
            }
            if !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
        }

        let now = OffsetDateTime::now_utc();
        if succeeded > 0 {
            {
                let mut state = self.state.write();
                state.last_refresh = Some(now);
                state.last_failed_sweep = None;
            }
            if let Err(e) = self.persist_last_refresh(now) {
                warn!(error = %e, "could not persist last refresh time");
            }
        } else {
            self.state.write().last_failed_sweep = Some(now);
        }

        let report = SweepReport { succeeded, failed, elapsed: started.elapsed() };
        info!(succeeded, failed, elapsed_ms = report.elapsed.as_millis() as u64, "ratings refresh complete");
        report
    }

    fn persist_last_refresh(&self, at: OffsetDateTime) -> Result<(), StoreError> {
        self.store.put_setting(LAST_REFRESH_KEY, &format_timestamp(at)?)
    }

    /// Drop every cached rating, in memory and in the store.
    pub async fn clear_cache(&self) -> ClearOutcome {
        self.ensure_initialized().await;
        match self.store.clear_ratings() {
            Ok(removed) => {
                self.table.write().clear();
                info!(removed, "cleared all cached ratings");
                ClearOutcome::ok("Cache cleared successfully")
            }
            Err(StoreError::Unavailable(reason)) => {
                error!(%reason, "store unavailable, cache not cleared");
                ClearOutcome::failed("Database not available")
            }
            Err(e) => {
                error!(error = %e, "failed to clear ratings cache");
                ClearOutcome::failed("Failed to clear cache")
            }
        }
    }

    /// Every cached snapshot, sorted by item id.
    pub async fn all_ratings(&self) -> Vec<RatingSnapshot> {
        self.ensure_initialized().await;
        self.table.read().all()
    }

    pub fn status(&self) -> RefreshStatus {
        RefreshStatus {
            initialized: self.is_initialized(),
            refreshing: self.is_refreshing(),
            last_refresh: self.last_refresh().and_then(|at| format_timestamp(at).ok()),
            cached_items: self.table.read().len(),
            provider_configured: self.provider.is_configured(),
        }
    }

    /// Let a running sweep finish, then flush the store.
    pub async fn shutdown(&self) {
        self.wait_for_refresh().await;
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "could not flush ratings store");
        }
    }
}
