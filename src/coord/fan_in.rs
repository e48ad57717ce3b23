//! Fan-out/fan-in aggregator
//!
//! Tracks the parallel sub-tasks outstanding for each request and merges
//! their keyed results. Arrival order never matters: results are keyed, and
//! completion fires exactly once, on the result that brings the countdown
//! to zero.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use tracing::{debug, warn};

use crate::coord::types::RequestId;

#[derive(Debug)]
struct Accumulator<K, V> {
    expected: usize,
    results: BTreeMap<K, V>,
}

impl<K: Ord, V> Accumulator<K, V> {
    fn remaining(&self) -> usize {
        self.expected.saturating_sub(self.results.len())
    }
}

/// Countdown plus keyed results for every open request
#[derive(Debug)]
pub struct FanIn<K, V> {
    open: HashMap<RequestId, Accumulator<K, V>>,
}

impl<K, V> Default for FanIn<K, V> {
    fn default() -> Self {
        Self {
            open: HashMap::new(),
        }
    }
}

impl<K: Ord + Debug, V> FanIn<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accumulating for a request. Re-opening resets any previous state.
    pub fn open(&mut self, request_id: &RequestId, expected: usize) {
        if self.open.contains_key(request_id) {
            warn!(request_id = %request_id, "Re-opening fan-in, discarding previous results");
        }
        self.open.insert(
            request_id.clone(),
            Accumulator {
                expected,
                results: BTreeMap::new(),
            },
        );
    }

    /// Store one keyed result. Returns true exactly when this call completes
    /// the set.
    ///
    /// Results for an unknown request, for a key already recorded, or after
    /// completion are ignored and logged.
    pub fn record(&mut self, request_id: &RequestId, key: K, value: V) -> bool {
        let Some(acc) = self.open.get_mut(request_id) else {
            warn!(request_id = %request_id, key = ?key, "Result for unknown fan-in ignored");
            return false;
        };
        if acc.remaining() == 0 {
            warn!(request_id = %request_id, key = ?key, "Result after fan-in completion ignored");
            return false;
        }
        if acc.results.contains_key(&key) {
            warn!(request_id = %request_id, key = ?key, "Duplicate result ignored");
            return false;
        }

        acc.results.insert(key, value);
        let remaining = acc.remaining();
        debug!(request_id = %request_id, remaining, "Recorded fan-in result");
        remaining == 0
    }

    /// Number of results still awaited, or None if the request is not open
    pub fn remaining(&self, request_id: &RequestId) -> Option<usize> {
        self.open.get(request_id).map(Accumulator::remaining)
    }

    pub fn is_open(&self, request_id: &RequestId) -> bool {
        self.open.contains_key(request_id)
    }

    /// Take the accumulated results and forget the request
    pub fn drain(&mut self, request_id: &RequestId) -> BTreeMap<K, V> {
        self.open
            .remove(request_id)
            .map(|acc| acc.results)
            .unwrap_or_default()
    }
}
