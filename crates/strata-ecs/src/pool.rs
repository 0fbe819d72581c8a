//! Object pools for component instances.
//!
//! An [`ObjectPool`] hands out recycled instances on [`acquire`] and takes
//! them back on [`release`], running a reset handler so a recycled instance
//! looks freshly constructed. The pool may grow multiplicatively up to
//! [`PoolConfig::max_capacity`]; idle instances are bounded by the current
//! capacity and, optionally, expire after a time-to-live.
//!
//! [`acquire`]: ObjectPool::acquire
//! [`release`]: ObjectPool::release

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// What to do with a released instance when the idle list is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop the instance being released.
    None,
    /// Drop the least recently released idle instance to make room.
    #[default]
    Lru,
}

/// Sizing and retention settings for an [`ObjectPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity before the first growth step.
    pub initial_capacity: usize,
    /// Hard ceiling on instances managed by the pool (live + idle).
    pub max_capacity: usize,
    /// Multiplier applied to the capacity on each growth step.
    pub growth_factor: f64,
    /// Policy applied when a release would overflow the idle list.
    pub eviction: EvictionPolicy,
    /// Idle instances older than this are dropped. `None` keeps them forever.
    pub idle_ttl_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            max_capacity: 100_000,
            growth_factor: 2.0,
            eviction: EvictionPolicy::Lru,
            idle_ttl_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Counters describing pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Instances built by the factory.
    pub created: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// Instances returned to the idle list.
    pub released: u64,
    /// Idle instances dropped by the eviction policy.
    pub evicted: u64,
    /// Idle instances dropped by the time-to-live.
    pub expired: u64,
    /// Releases of instances the pool did not account for.
    pub foreign: u64,
}

// ---------------------------------------------------------------------------
// ObjectPool
// ---------------------------------------------------------------------------

struct IdleSlot<T> {
    item: T,
    released_at: Instant,
}

/// A recycling pool of `T` instances.
pub struct ObjectPool<T> {
    label: String,
    factory: Box<dyn Fn() -> T>,
    reset: Box<dyn Fn(&mut T)>,
    config: PoolConfig,
    /// Current ceiling on live + idle instances.
    capacity: usize,
    /// Idle instances, least recently released first.
    idle: VecDeque<IdleSlot<T>>,
    /// Instances handed out and not yet returned.
    in_use: usize,
    stats: PoolStats,
}

impl<T> ObjectPool<T> {
    /// Create a pool. `label` names the pool in errors and logs.
    pub fn new(
        label: impl Into<String>,
        config: PoolConfig,
        factory: impl Fn() -> T + 'static,
        reset: impl Fn(&mut T) + 'static,
    ) -> Self {
        let capacity = config.initial_capacity.clamp(1, config.max_capacity.max(1));
        Self {
            label: label.into(),
            factory: Box::new(factory),
            reset: Box::new(reset),
            config,
            capacity,
            idle: VecDeque::new(),
            in_use: 0,
            stats: PoolStats::default(),
        }
    }

    /// Take an instance: a recycled one if available, otherwise a new one.
    ///
    /// # Errors
    ///
    /// [`EcsError::PoolExhausted`] when every instance up to
    /// `max_capacity` is in use.
    pub fn acquire(&mut self) -> Result<T, EcsError> {
        self.prune_expired_at(Instant::now());

        if let Some(slot) = self.idle.pop_back() {
            self.in_use += 1;
            self.stats.reused += 1;
            return Ok(slot.item);
        }

        if self.in_use >= self.capacity {
            self.grow()?;
        }
        self.in_use += 1;
        self.stats.created += 1;
        Ok((self.factory)())
    }

    /// Return an instance for reuse.
    ///
    /// The reset handler always runs. An instance the pool has no record of
    /// handing out is reset and dropped without touching the bookkeeping.
    ///
    /// Instances carry no owner tag, so "foreign" only means a release while
    /// nothing is in use. A stranger released while the pool's own instances
    /// are out is taken in as an ordinary release and counted in
    /// `PoolStats::released`, not `PoolStats::foreign`.
    pub fn release(&mut self, mut item: T) {
        (self.reset)(&mut item);

        if self.in_use == 0 {
            self.stats.foreign += 1;
            tracing::warn!(pool = %self.label, "released an instance the pool did not hand out");
            return;
        }
        self.in_use -= 1;

        if self.in_use + self.idle.len() >= self.capacity {
            match self.config.eviction {
                EvictionPolicy::None => {
                    self.stats.evicted += 1;
                    return;
                }
                EvictionPolicy::Lru => {
                    if self.idle.pop_front().is_some() {
                        self.stats.evicted += 1;
                    }
                }
            }
        }

        self.stats.released += 1;
        self.idle.push_back(IdleSlot {
            item,
            released_at: Instant::now(),
        });
    }

    /// Account for an instance that entered from elsewhere (e.g. migrated in
    /// from another archetype). It may exceed the current capacity.
    pub fn adopt(&mut self) {
        self.in_use += 1;
    }

    /// Stop accounting for a live instance that is leaving the pool without
    /// being released.
    pub fn detach(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Drop idle instances that have outlived the configured time-to-live.
    ///
    /// Returns the number dropped.
    pub fn prune_expired_at(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.config.idle_ttl_ms.map(Duration::from_millis) else {
            return 0;
        };
        let mut dropped = 0;
        while let Some(front) = self.idle.front() {
            if now.saturating_duration_since(front.released_at) <= ttl {
                break;
            }
            self.idle.pop_front();
            dropped += 1;
        }
        self.stats.expired += dropped as u64;
        dropped
    }

    /// Drop every idle instance.
    pub fn clear(&mut self) {
        self.idle.clear();
    }

    fn grow(&mut self) -> Result<(), EcsError> {
        if self.capacity >= self.config.max_capacity {
            return Err(EcsError::PoolExhausted {
                pool: self.label.clone(),
                capacity: self.config.max_capacity,
            });
        }
        let grown = (self.capacity as f64 * self.config.growth_factor.max(1.0)).ceil() as usize;
        self.capacity = grown.max(self.capacity + 1).min(self.config.max_capacity);
        tracing::trace!(pool = %self.label, capacity = self.capacity, "pool grew");
        Ok(())
    }

    /// Pool label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current capacity (grows up to `max_capacity`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Instances handed out and not yet returned.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Idle instances ready for reuse.
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    /// Activity counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use)
            .field("idle", &self.idle.len())
            .field("stats", &self.stats)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
