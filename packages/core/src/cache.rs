//! Element cache strategies.
//!
//! Collections are configured with one of four retention names inherited
//! from garbage-collected runtimes: `none`, `weak`, `soft` and `hard`. Here
//! they map onto explicit policies. `weak` and `soft` are approximations:
//! both become bounded LRU caches, `soft` with a larger bound, and eviction
//! happens on capacity pressure rather than on memory pressure.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::element::ElementRef;
use crate::error::Error;

/// Default LRU bound for the `weak` strategy.
pub const WEAK_CAPACITY: usize = 256;

/// Default LRU bound for the `soft` strategy.
pub const SOFT_CAPACITY: usize = 4096;

/// Configured retention name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    None,
    #[default]
    Weak,
    Soft,
    Hard,
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CacheStrategy::None),
            "weak" => Ok(CacheStrategy::Weak),
            "soft" => Ok(CacheStrategy::Soft),
            "hard" => Ok(CacheStrategy::Hard),
            other => Err(Error::config(format!(
                "unknown caching strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheStrategy::None => "none",
            CacheStrategy::Weak => "weak",
            CacheStrategy::Soft => "soft",
            CacheStrategy::Hard => "hard",
        };
        f.write_str(s)
    }
}

/// Concrete eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
    BoundedLru(NonZeroUsize),
    Unbounded,
}

impl CachePolicy {
    /// Map a retention name to a policy. `capacity` overrides the LRU bound
    /// of `weak`/`soft`; a zero capacity disables caching.
    pub fn for_strategy(strategy: CacheStrategy, capacity: Option<usize>) -> Self {
        let bounded = |default: usize| match NonZeroUsize::new(capacity.unwrap_or(default)) {
            Some(n) => CachePolicy::BoundedLru(n),
            None => CachePolicy::NoCache,
        };
        match strategy {
            CacheStrategy::None => CachePolicy::NoCache,
            CacheStrategy::Weak => bounded(WEAK_CAPACITY),
            CacheStrategy::Soft => bounded(SOFT_CAPACITY),
            CacheStrategy::Hard => CachePolicy::Unbounded,
        }
    }

    pub fn build(self) -> Box<dyn ElementCache> {
        match self {
            CachePolicy::NoCache => Box::new(NoCache),
            CachePolicy::BoundedLru(capacity) => Box::new(BoundedLru::new(capacity)),
            CachePolicy::Unbounded => Box::new(Unbounded::default()),
        }
    }
}

/// Name-keyed store of materialized elements.
pub trait ElementCache: Send {
    fn get(&mut self, name: &str) -> Option<ElementRef>;

    fn insert(&mut self, name: String, element: ElementRef);

    fn remove(&mut self, name: &str) -> Option<ElementRef>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every cached element, in no particular order.
    fn values(&self) -> Vec<ElementRef>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Caches nothing.
pub struct NoCache;

impl ElementCache for NoCache {
    fn get(&mut self, _name: &str) -> Option<ElementRef> {
        None
    }

    fn insert(&mut self, _name: String, _element: ElementRef) {}

    fn remove(&mut self, _name: &str) -> Option<ElementRef> {
        None
    }

    fn clear(&mut self) {}

    fn len(&self) -> usize {
        0
    }

    fn values(&self) -> Vec<ElementRef> {
        Vec::new()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Keeps the most recently used `capacity` elements.
pub struct BoundedLru {
    entries: LruCache<String, ElementRef>,
}

impl BoundedLru {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }
}

impl ElementCache for BoundedLru {
    fn get(&mut self, name: &str) -> Option<ElementRef> {
        self.entries.get(name).cloned()
    }

    fn insert(&mut self, name: String, element: ElementRef) {
        self.entries.put(name, element);
    }

    fn remove(&mut self, name: &str) -> Option<ElementRef> {
        self.entries.pop(name)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn values(&self) -> Vec<ElementRef> {
        self.entries.iter().map(|(_, e)| e.clone()).collect()
    }
}

/// Keeps everything until explicitly evicted.
#[derive(Default)]
pub struct Unbounded {
    entries: HashMap<String, ElementRef>,
}

impl ElementCache for Unbounded {
    fn get(&mut self, name: &str) -> Option<ElementRef> {
        self.entries.get(name).cloned()
    }

    fn insert(&mut self, name: String, element: ElementRef) {
        self.entries.insert(name, element);
    }

    fn remove(&mut self, name: &str) -> Option<ElementRef> {
        self.entries.remove(name)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn values(&self) -> Vec<ElementRef> {
        self.entries.values().cloned().collect()
    }
}
