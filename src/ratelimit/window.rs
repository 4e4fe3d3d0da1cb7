//! Sliding-window request tracking.
//!
//! Each key owns the instants of the requests it was admitted for, limited to
//! the trailing window. A key is counted over the half-open interval
//! `(now - window_ms, now]`.

use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Quota left in the current window after this request
    pub remaining: u64,
    /// Seconds until a slot frees up. Zero when `allowed` is true.
    #[serde(rename = "retryAfter")]
    pub retry_after_secs: u64,
}

impl Decision {
    fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_secs: 0,
        }
    }

    fn denied(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_secs,
        }
    }
}

/// Admitted instants for one key.
#[derive(Debug, Clone)]
struct WindowRecord {
    window_ms: u64,
    instants: VecDeque<u64>,
}

impl WindowRecord {
    fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            instants: VecDeque::new(),
        }
    }

    /// Never let a clock that stepped backwards reopen an older window.
    fn clamp(&self, now: u64) -> u64 {
        self.instants.back().map_or(now, |&latest| now.max(latest))
    }

    /// Drop every instant at or before `now - window_ms`.
    ///
    /// Instants are appended with a clamped `now`, so the deque is sorted and
    /// expired entries are always at the front.
    fn prune(&mut self, now: u64) {
        let Some(window_start) = now.checked_sub(self.window_ms) else {
            return;
        };
        while self.instants.front().is_some_and(|&t| t <= window_start) {
            self.instants.pop_front();
        }
    }

    fn retry_after_secs(&self, now: u64) -> u64 {
        let wait_ms = match self.instants.front() {
            Some(&oldest) => oldest.saturating_add(self.window_ms).saturating_sub(now),
            None => self.window_ms,
        };
        wait_ms.div_ceil(1000)
    }

    fn len(&self) -> u64 {
        self.instants.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }
}

/// Per-key sliding-window state.
///
/// `check_and_record` holds the key's shard lock for the whole
/// read-filter-decide-append step, so concurrent callers on one key can never
/// both take the last slot. `sweep` takes the same locks.
#[derive(Debug, Default)]
pub struct WindowStore {
    records: DashMap<String, WindowRecord>,
}

impl WindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Admit or reject one request for `key` at `now` (milliseconds).
    ///
    /// A rejected request is not recorded and consumes no quota.
    pub fn check_and_record(
        &self,
        key: &str,
        window_ms: u64,
        max_requests: u64,
        now: u64,
    ) -> Decision {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.window_ms = window_ms;
                let now = record.clamp(now);
                record.prune(now);

                if record.len() >= max_requests {
                    let retry_after_secs = record.retry_after_secs(now);
                    if record.is_empty() {
                        occupied.remove();
                        debug!(key = %key, "Removed empty window record");
                    }
                    return Decision::denied(retry_after_secs);
                }

                record.instants.push_back(now);
                let remaining = max_requests - record.len();
                trace!(key = %key, remaining = remaining, "Request admitted");
                Decision::allowed(remaining)
            }
            Entry::Vacant(vacant) => {
                if max_requests == 0 {
                    return Decision::denied(window_ms.div_ceil(1000));
                }

                let mut record = WindowRecord::new(window_ms);
                record.instants.push_back(now);
                vacant.insert(record);
                debug!(key = %key, window_ms = window_ms, "Created window record");
                Decision::allowed(max_requests - 1)
            }
        }
    }

    /// Evict expired instants from every key and drop keys left empty.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: u64) -> usize {
        let mut evicted = 0;
        self.records.retain(|_, record| {
            let now = record.clamp(now);
            record.prune(now);
            if record.is_empty() {
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of instants currently held for `key`, without pruning.
    pub fn recorded(&self, key: &str) -> Option<usize> {
        self.records.get(key).map(|r| r.instants.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.records.clear();
    }
}
