//! Visit Counting Service
//!
//! Absorbs page views into an in-memory write buffer and answers queries from a
//! short-lived cache, falling back to the sharded store.
//!
//! ## Responsibilities
//! - **Buffering**: `record_increment` only bumps a per-key counter; no store call.
//! - **Flushing**: a background loop pushes every buffered key to the store each
//!   `flush_interval`; a cache miss flushes its own key synchronously first.
//! - **Reading**: cache hit, or flush + store read + cache fill; either way the current
//!   buffer is merged in before answering.
//!
//! ## Locking
//! Buffer and cache state live in two `DashMap`s of per-key `Mutex`es. A task never holds
//! a buffer lock and a cache lock at the same time. The buffer lock is held across the
//! store call of a flush, so two flushes of one key can never send the same amount twice.

use super::types::{CounterSettings, FlushStats, ServedVia, VisitCount};
use crate::error::{ShardError, ShardResult};
use crate::storage::manager::ShardManager;

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Buffered state of one page.
///
/// `flushed` only grows: it is the total this slot ever pushed to the store. Cache
/// entries remember its value at fill time, which tells a later read exactly how much
/// of the buffer has moved into the store since the snapshot was taken.
#[derive(Debug, Default)]
struct PendingVisits {
    pending: i64,
    flushed: i64,
}

type BufferSlot = Arc<Mutex<PendingVisits>>;

struct CachedCount {
    count: i64,
    flushed_at_fill: i64,
    filled_at: Instant,
    /// Keeps the buffer slot alive (and un-reclaimable) while the snapshot refers to it.
    slot: BufferSlot,
}

impl CachedCount {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.filled_at.elapsed() < ttl
    }
}

type CacheSlot = Arc<Mutex<Option<CachedCount>>>;

pub struct VisitCounterService {
    store: Arc<ShardManager>,
    settings: CounterSettings,
    buffer: DashMap<String, BufferSlot>,
    cache: DashMap<String, CacheSlot>,
    shutdown_tx: watch::Sender<bool>,
    flush_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl VisitCounterService {
    /// Creates the service and starts its flush loop. Must be called inside a tokio runtime.
    pub fn start(store: Arc<ShardManager>, settings: CounterSettings) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_interval = settings.flush_interval;

        let service = Arc::new(Self {
            store,
            settings,
            buffer: DashMap::new(),
            cache: DashMap::new(),
            shutdown_tx,
            flush_task: parking_lot::Mutex::new(None),
        });

        let handle = tokio::spawn(Self::flush_loop(
            Arc::downgrade(&service),
            shutdown_rx,
            flush_interval,
        ));
        *service.flush_task.lock() = Some(handle);

        tracing::info!(
            "Visit counter started (cache ttl {:?}, flush every {:?})",
            service.settings.cache_ttl,
            flush_interval
        );
        service
    }

    pub fn store(&self) -> &Arc<ShardManager> {
        &self.store
    }

    fn validate(page_id: &str) -> ShardResult<()> {
        if page_id.is_empty() {
            return Err(ShardError::InvalidKey(page_id.to_string()));
        }
        Ok(())
    }

    fn buffer_slot(&self, page_id: &str) -> BufferSlot {
        self.buffer
            .entry(page_id.to_string())
            .or_insert_with(BufferSlot::default)
            .clone()
    }

    fn cache_slot(&self, page_id: &str) -> CacheSlot {
        self.cache
            .entry(page_id.to_string())
            .or_insert_with(CacheSlot::default)
            .clone()
    }

    /// Counts one visit. Buffered only; the store sees it on the next flush.
    pub async fn record_increment(&self, page_id: &str) -> ShardResult<()> {
        Self::validate(page_id)?;
        let slot = self.buffer_slot(page_id);
        let mut visits = slot.lock().await;
        visits.pending += 1;
        Ok(())
    }

    /// Pushes the buffered visits of one page to the store. Returns the amount applied.
    ///
    /// When the store call fails the amount stays buffered for the next attempt.
    pub async fn flush_key(&self, page_id: &str) -> ShardResult<i64> {
        let Some(slot) = self.buffer.get(page_id).map(|entry| entry.value().clone()) else {
            return Ok(0);
        };
        let mut visits = slot.lock().await;
        self.drain(page_id, &mut visits).await
    }

    async fn drain(&self, page_id: &str, visits: &mut PendingVisits) -> ShardResult<i64> {
        let amount = visits.pending;
        if amount <= 0 {
            return Ok(0);
        }
        self.store.increment(page_id, amount).await?;
        visits.pending = 0;
        visits.flushed += amount;
        tracing::debug!("Flushed {} visits for {}", amount, page_id);
        Ok(amount)
    }

    /// Current visit count of a page: cached or stored count plus everything buffered.
    pub async fn get_visit_count(&self, page_id: &str) -> ShardResult<VisitCount> {
        Self::validate(page_id)?;
        let cache_slot = self.cache_slot(page_id);

        let cached = {
            let entry = cache_slot.lock().await;
            entry
                .as_ref()
                .filter(|cached| cached.is_fresh(self.settings.cache_ttl))
                .map(|cached| (cached.count, cached.flushed_at_fill, cached.slot.clone()))
        };

        let (count, flushed_at_fill, slot, served_via) = match cached {
            Some((count, flushed_at_fill, slot)) => {
                (count, flushed_at_fill, slot, ServedVia::InMemory)
            }
            None => {
                let slot = self.buffer_slot(page_id);
                let (count, flushed) = {
                    let mut visits = slot.lock().await;
                    self.drain(page_id, &mut visits).await?;
                    let count = self.store.get(page_id).await?.unwrap_or(0);
                    (count, visits.flushed)
                };
                let node = self.store.locate_node(page_id)?;

                *cache_slot.lock().await = Some(CachedCount {
                    count,
                    flushed_at_fill: flushed,
                    filled_at: Instant::now(),
                    slot: slot.clone(),
                });
                tracing::debug!("Cache refilled for {} from {}", page_id, node);
                (count, flushed, slot, ServedVia::Node(node))
            }
        };

        // Visits that arrived (or were flushed) since the snapshot.
        let visits = {
            let current = slot.lock().await;
            count + (current.flushed - flushed_at_fill) + current.pending
        };

        Ok(VisitCount::new(page_id, visits, &served_via))
    }

    /// Visits buffered for a page and not yet in the store.
    pub async fn pending(&self, page_id: &str) -> i64 {
        let Some(slot) = self.buffer.get(page_id).map(|entry| entry.value().clone()) else {
            return 0;
        };
        let visits = slot.lock().await;
        visits.pending
    }

    /// Pages with at least one unflushed visit, sorted.
    pub async fn buffered_keys(&self) -> Vec<String> {
        let slots: Vec<(String, BufferSlot)> = self
            .buffer
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut keys = Vec::new();
        for (key, slot) in slots {
            if slot.lock().await.pending > 0 {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Number of (buffer, cache) slots currently allocated.
    pub fn tracked_slots(&self) -> (usize, usize) {
        (self.buffer.len(), self.cache.len())
    }

    /// Flushes every buffered page. A failing page is logged and skipped.
    pub async fn flush_all(&self) -> FlushStats {
        let keys: Vec<String> = self.buffer.iter().map(|entry| entry.key().clone()).collect();
        let mut stats = FlushStats::default();

        for key in keys {
            match self.flush_key(&key).await {
                Ok(0) => {}
                Ok(amount) => {
                    stats.flushed_keys += 1;
                    stats.flushed_visits += amount;
                }
                Err(e) => {
                    tracing::warn!("Failed to flush visits for {}: {}", key, e);
                    stats.failed_keys += 1;
                }
            }
        }

        stats
    }

    /// Drops expired cache entries and buffer slots nobody uses.
    ///
    /// Slots referenced from outside the maps (an in-flight call, a live cache entry)
    /// are kept, as are slots that are locked right now or still hold pending visits.
    pub fn reclaim_idle(&self) {
        let ttl = self.settings.cache_ttl;
        self.cache.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry.as_ref().is_some_and(|cached| cached.is_fresh(ttl)),
                Err(_) => true,
            }
        });

        self.buffer.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(visits) => visits.pending != 0,
                Err(_) => true,
            }
        });
    }

    async fn flush_loop(
        service: Weak<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(service) = service.upgrade() else {
                        break;
                    };
                    let stats = service.flush_all().await;
                    service.reclaim_idle();

                    if stats.failed_keys > 0 {
                        tracing::warn!(
                            "Flush pass: {} keys flushed, {} failed",
                            stats.flushed_keys,
                            stats.failed_keys
                        );
                    } else if stats.flushed_keys > 0 {
                        tracing::debug!(
                            "Flush pass: {} visits over {} keys",
                            stats.flushed_visits,
                            stats.flushed_keys
                        );
                    }
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        tracing::info!("Flush loop stopped");
    }

    /// Stops the flush loop, then flushes what is left if `flush_on_shutdown` is set.
    ///
    /// Visits still buffered after this returns are lost when the process exits.
    pub async fn shutdown(&self) -> FlushStats {
        let _ = self.shutdown_tx.send(true);

        let handle = self.flush_task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("Flush loop ended abnormally: {}", e);
        }

        if !self.settings.flush_on_shutdown {
            let left = self.buffered_keys().await.len();
            if left > 0 {
                tracing::warn!("Shutting down with {} pages of unflushed visits", left);
            }
            return FlushStats::default();
        }

        let stats = self.flush_all().await;
        tracing::info!(
            "Final flush: {} visits over {} keys ({} failed)",
            stats.flushed_visits,
            stats.flushed_keys,
            stats.failed_keys
        );
        stats
    }
}
