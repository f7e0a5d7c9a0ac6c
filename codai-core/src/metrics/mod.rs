//! Cache hit/miss accounting

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Something the content cache did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit,
    Miss,
    Eviction,
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Summed latency of every recorded read (hits and misses)
    pub total_read_latency: Duration,
}

impl CacheMetrics {
    pub const fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of reads served from cache, 0.0 when nothing was read
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        match self.reads() {
            0 => 0.0,
            reads => self.hits as f64 / reads as f64,
        }
    }

    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.reads()) {
            Ok(0) => Duration::ZERO,
            Ok(reads) => self.total_read_latency / reads,
            Err(_) => Duration::from_secs_f64(
                self.total_read_latency.as_secs_f64() / self.reads() as f64,
            ),
        }
    }
}

impl std::fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache reads:      {}", self.reads())?;
        writeln!(f, "  hits:           {}", self.hits)?;
        writeln!(f, "  misses:         {}", self.misses)?;
        writeln!(f, "Hit rate:         {:.1}%", self.hit_ratio() * 100.0)?;
        writeln!(f, "Evictions:        {}", self.evictions)?;
        write!(f, "Avg read latency: {:?}", self.average_latency())
    }
}

/// Process-lifetime counters shared by every user of one cache
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    counters: Mutex<CacheMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheMetrics> {
        // Counters stay meaningful even if a holder panicked mid-update
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: CacheEvent, latency: Duration) {
        let mut counters = self.lock();
        match event {
            CacheEvent::Hit => {
                counters.hits += 1;
                counters.total_read_latency += latency;
            }
            CacheEvent::Miss => {
                counters.misses += 1;
                counters.total_read_latency += latency;
            }
            CacheEvent::Eviction => counters.evictions += 1,
        }
    }

    pub fn snapshot(&self) -> CacheMetrics {
        *self.lock()
    }

    pub fn reset(&self) {
        *self.lock() = CacheMetrics::default();
    }
}
