//! Hierarchical timing wheel for bulk key expiry
//!
//! Four levels of slots cover one hour at one-second resolution, one day at
//! one-minute resolution, 30 days at one-hour resolution and a year at
//! one-day resolution. Anything further out waits in a far-future bucket.
//!
//! The wheel keeps its own notion of time, `start + ticks * 1s`, and is moved
//! forward in whole level-0 ticks by [`TimingWheel::advance_to`]. A key with
//! deadline `e` is expired on the first tick whose time is strictly after
//! `e`, so it is never early and at most one tick late relative to the
//! wheel. Coarser levels hand their keys down to finer ones as their slots
//! come due.

use crate::cache::background::Worker;
use crate::clock::SharedClock;
use crate::kv::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Level-0 tick length in nanoseconds
pub const TICK_NANOS: i64 = 1_000_000_000;
/// Default interval between background polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const LEVELS: usize = 4;
const SLOTS: [u64; LEVELS] = [3600, 1440, 720, 365];
// Level-0 ticks covered by one slot of each level
const TICKS_PER_SLOT: [u64; LEVELS] = [1, 60, 3600, 86_400];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Slot { level: usize, slot: usize },
    FarFuture,
}

#[derive(Debug)]
struct WheelState {
    levels: Vec<Vec<HashMap<String, i64>>>,
    far_future: HashMap<String, i64>,
    locations: HashMap<String, Location>,
    counts: [usize; LEVELS],
    start: i64,
    ticks: u64,
}

impl WheelState {
    fn new(start: i64) -> Self {
        Self {
            levels: SLOTS
                .iter()
                .map(|n| (0..*n).map(|_| HashMap::new()).collect())
                .collect(),
            far_future: HashMap::new(),
            locations: HashMap::new(),
            counts: [0; LEVELS],
            start,
            ticks: 0,
        }
    }

    /// First tick whose wheel time is strictly after `expires_at`
    fn due_tick(&self, expires_at: i64) -> i64 {
        (expires_at - self.start).div_euclid(TICK_NANOS) + 1
    }

    /// Where a deadline belongs given the current tick, `None` if already due
    fn locate(&self, expires_at: i64) -> Option<Location> {
        let due = self.due_tick(expires_at);
        if due <= self.ticks as i64 {
            return None;
        }
        let due = due as u64;
        for level in 0..LEVELS {
            let per_slot = TICKS_PER_SLOT[level];
            let target = due / per_slot;
            let cursor = self.ticks / per_slot;
            if target > cursor && target - cursor < SLOTS[level] {
                return Some(Location::Slot {
                    level,
                    slot: (target % SLOTS[level]) as usize,
                });
            }
        }
        Some(Location::FarFuture)
    }

    fn detach(&mut self, key: &str) -> bool {
        match self.locations.remove(key) {
            Some(Location::Slot { level, slot }) => {
                if self.levels[level][slot].remove(key).is_some() {
                    self.counts[level] -= 1;
                }
                true
            }
            Some(Location::FarFuture) => {
                self.far_future.remove(key);
                true
            }
            None => false,
        }
    }

    /// Place a key; returns false when its deadline has already passed
    fn place(&mut self, key: String, expires_at: i64) -> bool {
        match self.locate(expires_at) {
            Some(location) => {
                match location {
                    Location::Slot { level, slot } => {
                        self.levels[level][slot].insert(key.clone(), expires_at);
                        self.counts[level] += 1;
                    }
                    Location::FarFuture => {
                        self.far_future.insert(key.clone(), expires_at);
                    }
                }
                self.locations.insert(key, location);
                true
            }
            None => false,
        }
    }

    fn replace_all(&mut self, keys: HashMap<String, i64>, due: &mut Vec<String>) {
        for (key, expires_at) in keys {
            self.locations.remove(&key);
            if !self.place(key.clone(), expires_at) {
                due.push(key);
            }
        }
    }

    /// Advance one level-0 tick, collecting keys that came due
    fn step(&mut self, due: &mut Vec<String>) {
        self.ticks += 1;
        let ticks = self.ticks;

        if ticks % TICKS_PER_SLOT[LEVELS - 1] == 0 && !self.far_future.is_empty() {
            let far = std::mem::take(&mut self.far_future);
            self.replace_all(far, due);
        }
        for level in (0..LEVELS).rev() {
            let per_slot = TICKS_PER_SLOT[level];
            if ticks % per_slot != 0 {
                continue;
            }
            let slot = ((ticks / per_slot) % SLOTS[level]) as usize;
            if self.levels[level][slot].is_empty() {
                continue;
            }
            let keys = std::mem::take(&mut self.levels[level][slot]);
            self.counts[level] -= keys.len();
            self.replace_all(keys, due);
        }
    }

    /// Tick spacing at which anything can happen: the slot width of the
    /// finest non-empty level. `None` when nothing is tracked.
    fn stride(&self) -> Option<u64> {
        (0..LEVELS)
            .find(|level| self.counts[*level] > 0)
            .map(|level| TICKS_PER_SLOT[level])
            .or_else(|| (!self.far_future.is_empty()).then_some(TICKS_PER_SLOT[LEVELS - 1]))
    }

    /// Advance to tick `target`, skipping ticks where every processed slot is empty
    fn advance(&mut self, target: u64, due: &mut Vec<String>) {
        while self.ticks < target {
            let Some(stride) = self.stride() else {
                self.ticks = target;
                return;
            };
            let next = (self.ticks / stride + 1) * stride;
            if next > target {
                self.ticks = target;
                return;
            }
            self.ticks = next - 1;
            self.step(due);
        }
    }
}

/// Timing wheel that deletes keys from a [`Store`] as they expire
pub struct TimingWheel {
    state: Mutex<WheelState>,
    store: Arc<Store>,
    clock: SharedClock,
    expired_total: AtomicU64,
    worker: Mutex<Option<Worker>>,
}

impl TimingWheel {
    /// Create a wheel anchored at the store clock's current time
    pub fn new(store: Arc<Store>) -> Self {
        let clock = store.clock().clone();
        let start = clock.now_nanos();
        Self {
            state: Mutex::new(WheelState::new(start)),
            store,
            clock,
            expired_total: AtomicU64::new(0),
            worker: Mutex::new(None),
        }
    }

    /// Track `key` for expiry at `expires_at` (epoch nanoseconds)
    ///
    /// Deadlines already in the past are ignored; a deadline equal to the
    /// current time is tracked and fires on the next tick. Re-adding a key
    /// moves it.
    pub fn add(&self, key: &str, expires_at: i64) {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();
        state.detach(key);
        if expires_at >= now {
            Self::track(&mut state, key, expires_at);
        }
    }

    /// Re-read the deadline of `key` from the store and track exactly that
    ///
    /// The store is read while the wheel lock is held, so concurrent calls
    /// for one key leave the wheel agreeing with the store's latest write.
    pub fn sync(&self, key: &str) {
        let mut state = self.state.lock();
        let deadline = self.store.peek(key).map_or(0, |entry| entry.expires_at());
        state.detach(key);
        if deadline > 0 {
            Self::track(&mut state, key, deadline);
        }
    }

    fn track(state: &mut WheelState, key: &str, expires_at: i64) {
        // Deadlines behind the wheel's own time fall into the next tick
        if !state.place(key.to_string(), expires_at) {
            let next = state.start + (state.ticks as i64 + 1) * TICK_NANOS - 1;
            state.place(key.to_string(), next);
        }
    }

    /// Stop tracking `key`, returns true if it was tracked
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().detach(key)
    }

    /// Advance to `now`, deleting due keys from the store.
    /// Returns the number of keys deleted.
    pub fn advance_to(&self, now: i64) -> usize {
        let due = {
            let mut state = self.state.lock();
            let target = (now - state.start).div_euclid(TICK_NANOS);
            if target <= state.ticks as i64 {
                return 0;
            }
            let mut due = Vec::new();
            state.advance(target as u64, &mut due);
            due
        };

        let mut expired = 0;
        for key in &due {
            if self.store.delete_expired(key, now) {
                expired += 1;
            } else {
                // Deadline moved or cleared since the key was placed
                self.sync(key);
            }
        }
        if expired > 0 {
            self.expired_total
                .fetch_add(expired as u64, Ordering::Relaxed);
            tracing::trace!(target: "tidecache::expiry", expired, "Expired keys");
        }
        expired
    }

    /// Advance to the clock's current time
    pub fn tick(&self) -> usize {
        self.advance_to(self.clock.now_nanos())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.state.lock().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().locations.contains_key(key)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let (start, ticks) = (state.start, state.ticks);
        *state = WheelState::new(start);
        state.ticks = ticks;
    }

    /// Keys deleted by the wheel since creation
    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::Relaxed)
    }

    /// Start polling the clock every `interval`
    pub fn start(self: &Arc<Self>, interval: Duration) -> io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let wheel: Weak<Self> = Arc::downgrade(self);
        *worker = Some(Worker::spawn("tidecache-wheel", interval, move || {
            if let Some(wheel) = wheel.upgrade() {
                wheel.tick();
            }
        })?);
        Ok(())
    }

    /// Stop the background poll; no tick runs after this returns
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl std::fmt::Debug for TimingWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("tracked", &self.len())
            .field("expired_total", &self.expired_total())
            .finish()
    }
}
