//! In-memory usage counters for rate and quota restrictions.
//!
//! Counters live for the lifetime of the process. There is no TTL sweep:
//! entries are only released by [`CounterStore::clear`], and each process
//! instance keeps its own independent store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use utoipa::ToSchema;

use super::restriction::RestrictionKind;
use crate::models::rbac::{Action, Resource, Role, UserId};

/// Time source for window bookkeeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Length of a counting window, anchored at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterWindow {
    Seconds(u64),
    Months(u32),
}

impl CounterWindow {
    pub fn end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let end = match *self {
            CounterWindow::Seconds(secs) => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|span| start.checked_add_signed(span)),
            CounterWindow::Months(months) => start.checked_add_months(Months::new(months)),
        };
        end.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterKey {
    pub role: Role,
    pub resource: Resource,
    pub action: Action,
    pub kind: RestrictionKind,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterEntry {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl CounterEntry {
    fn open(now: DateTime<Utc>, window: CounterWindow) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: window.end_from(now),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CounterStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
}

/// Process-wide counter map. All access goes through one mutex so that
/// "check, then increment" is atomic for every key.
#[derive(Debug)]
pub struct CounterStore {
    entries: Mutex<HashMap<CounterKey, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Runs `f` while holding the store lock with a single `now` snapshot.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut CounterTransaction<'_>) -> R) -> R {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let mut tx = CounterTransaction {
            entries: &mut entries,
            now,
        };
        f(&mut tx)
    }

    /// Snapshot for `key`. An expired window reads as a fresh one.
    pub fn status(&self, key: &CounterKey, limit: u32) -> Option<CounterStatus> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        let count = if entry.is_expired(now) { 0 } else { entry.count };

        Some(CounterStatus {
            count,
            limit,
            remaining: limit.saturating_sub(count),
        })
    }

    pub fn entry(&self, key: &CounterKey) -> Option<CounterEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        tracing::info!(dropped, "restriction counters cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Locked view of the store for the duration of one decision.
pub struct CounterTransaction<'a> {
    entries: &'a mut HashMap<CounterKey, CounterEntry>,
    now: DateTime<Utc>,
}

impl CounterTransaction<'_> {
    fn live_entry(&mut self, key: CounterKey, window: CounterWindow) -> &mut CounterEntry {
        let now = self.now;
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| CounterEntry::open(now, window));
        if entry.is_expired(now) {
            tracing::trace!(?key, "counter window rolled over");
            *entry = CounterEntry::open(now, window);
        }
        entry
    }

    /// Bumps the count unless it already reached `limit`, opening a new
    /// window when needed. Returns the new count, or `None` when refused.
    pub fn increment(&mut self, key: CounterKey, window: CounterWindow, limit: u32) -> Option<u32> {
        let entry = self.live_entry(key, window);
        if entry.count >= limit {
            return None;
        }
        entry.count += 1;
        Some(entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(user_id: UserId) -> CounterKey {
        CounterKey {
            role: Role::SalesRep,
            resource: Resource::Customers,
            action: Action::Create,
            kind: RestrictionKind::RateLimit,
            user_id,
        }
    }

    fn clock_at(y: i32, m: u32, d: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()))
    }

    #[test]
    fn increment_refuses_at_limit() {
        let store = CounterStore::new();
        let window = CounterWindow::Seconds(60);
        store.transaction(|tx| {
            assert_eq!(tx.increment(key(1), window, 2), Some(1));
            assert_eq!(tx.increment(key(1), window, 2), Some(2));
            assert_eq!(tx.increment(key(1), window, 2), None);
        });
        assert_eq!(store.entry(&key(1)).unwrap().count, 2);
    }

    #[test]
    fn window_is_replaced_once_expired() {
        let clock = clock_at(2024, 3, 1);
        let store = CounterStore::with_clock(clock.clone());
        let window = CounterWindow::Seconds(3600);

        store.transaction(|tx| tx.increment(key(1), window, 5));
        clock.advance(Duration::seconds(3599));
        assert_eq!(store.status(&key(1), 5).unwrap().count, 1);

        clock.advance(Duration::seconds(1));
        assert_eq!(store.status(&key(1), 5).unwrap().count, 0);
        assert_eq!(store.transaction(|tx| tx.increment(key(1), window, 5)), Some(1));
        let entry = store.entry(&key(1)).unwrap();
        assert_eq!(entry.window_start, clock.now());
    }

    #[test]
    fn monthly_window_is_anchored_at_first_use() {
        let clock = clock_at(2024, 1, 31);
        let store = CounterStore::with_clock(clock.clone());
        store.transaction(|tx| tx.increment(key(7), CounterWindow::Months(1), 3));

        let entry = store.entry(&key(7)).unwrap();
        // chrono clamps to the last day of February
        assert_eq!(entry.window_end, Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn status_is_none_until_first_use_and_after_clear() {
        let store = CounterStore::new();
        assert!(store.status(&key(3), 10).is_none());

        store.transaction(|tx| tx.increment(key(3), CounterWindow::Seconds(60), 10));
        let status = store.status(&key(3), 10).unwrap();
        assert_eq!(status, CounterStatus { count: 1, limit: 10, remaining: 9 });

        store.clear();
        assert!(store.status(&key(3), 10).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn oversized_window_saturates_instead_of_panicking() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(CounterWindow::Seconds(u64::MAX).end_from(start), DateTime::<Utc>::MAX_UTC);
    }
}
