//! Incrementally-resizable chained hash dictionary.
//!
//! The primary associative container of the engine. Collisions chain through
//! singly-linked entries; growth never stops the world. Instead the
//! dictionary keeps two tables and migrates one bucket of the old table per
//! mutating operation until the old table drains, at which point the new
//! table is promoted in place.
//!
//! Submodules:
//! - [`iter`] — guarded and fingerprinted iteration states
//! - [`scan`] — stateless reverse-bit cursor traversal
//!
//! Key behaviors:
//! - Lookup consults the old table first, then the new one while a rehash is
//!   in flight. Inserts always target the newest table.
//! - Expansion is sized to the least power of two holding `used + 1`, floor
//!   4. A process-wide policy switch can veto growth at load 1; load above
//!   [`FORCE_RESIZE_RATIO`] overrides the veto.
//! - Each rehash step skips at most 10× its bucket budget of empty buckets
//!   before yielding, bounding the latency added to any single operation.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use thiserror::Error;

pub mod iter;
pub mod scan;

pub use iter::DictIterator;

/// Smallest table size ever allocated.
pub const INITIAL_SIZE: usize = 4;

/// Load factor (`used / size`) beyond which growth proceeds even when
/// resizing is disabled process-wide.
pub const FORCE_RESIZE_RATIO: usize = 5;

/// Empty buckets a single rehash step may skip per bucket of budget before
/// yielding with work remaining.
const REHASH_EMPTY_VISITS: usize = 10;

static RESIZE_ENABLED: AtomicBool = AtomicBool::new(true);

/// Process-wide growth policy. When disabled, tables only grow once their
/// load factor exceeds [`FORCE_RESIZE_RATIO`]; used by snapshotting parents
/// to limit copy-on-write traffic.
pub fn set_resize_enabled(enabled: bool) {
    RESIZE_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Returns the current process-wide growth policy.
pub fn resize_enabled() -> bool {
    RESIZE_ENABLED.load(Ordering::Relaxed)
}

/// Errors surfaced by dictionary operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DictError {
    /// The key is already present; the entry was left untouched.
    #[error("key already present")]
    DuplicateKey,
    /// No entry carries the given key.
    #[error("key not found")]
    NotFound,
    /// The table cannot be restructured in its current state (a rehash is in
    /// flight, or the requested size is no change / below the live count).
    #[error("dictionary busy or request is a no-op")]
    Busy,
    /// The requested table would overflow addressable memory.
    #[error("table size overflows allocation limits")]
    SizeOverflow,
    /// A fallible expansion could not allocate.
    #[error("allocation failed")]
    OutOfMemory,
}

/// The polymorphic operations a dictionary needs from its caller.
///
/// `expand_allowed` may veto a proposed growth given the would-be table size
/// in bytes and the current load factor; the default accepts everything.
pub trait DictType {
    type Key;
    type Value;

    /// Placement hash. Implementations are expected to route through
    /// [`crate::hash`] so placement stays seeded and unpredictable.
    fn hash(&self, key: &Self::Key) -> u64;

    /// Key equivalence. Must agree with `hash`.
    fn key_eq(&self, a: &Self::Key, b: &Self::Key) -> bool;

    fn expand_allowed(&self, _new_bytes: usize, _load_factor: f64) -> bool {
        true
    }
}

/// Value payload for callers that mix heap objects with unboxed numbers,
/// avoiding an allocation for the numeric cases.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<T> {
    Boxed(T),
    Signed(i64),
    Unsigned(u64),
    Double(f64),
}

/// A key/value pair plus its position in a collision chain.
pub struct Entry<K, V> {
    key: K,
    val: V,
    next: Link<K, V>,
}

type Link<K, V> = Option<Box<Entry<K, V>>>;

impl<K, V> Entry<K, V> {
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.val
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.val
    }

    /// Consumes the entry into its parts.
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.val)
    }
}

struct Table<K, V> {
    buckets: Box<[Link<K, V>]>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn empty() -> Self {
        Table {
            buckets: Box::default(),
            used: 0,
        }
    }

    fn try_with_size(size: usize) -> Option<Self> {
        debug_assert!(size.is_power_of_two());
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(size).ok()?;
        buckets.resize_with(size, || None);
        Some(Table {
            buckets: buckets.into_boxed_slice(),
            used: 0,
        })
    }

    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Valid only for allocated tables.
    #[inline]
    fn sizemask(&self) -> u64 {
        debug_assert!(!self.buckets.is_empty());
        (self.buckets.len() - 1) as u64
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // Unlink chains iteratively so a long chain cannot recurse the stack.
        for bucket in self.buckets.iter_mut() {
            let mut cur = bucket.take();
            while let Some(mut e) = cur {
                cur = e.next.take();
            }
        }
    }
}

/// Chain position of an entry: table index, bucket index, depth in chain.
#[derive(Clone, Copy)]
struct Pos {
    table: usize,
    bucket: usize,
    depth: usize,
}

/// The dictionary proper. See the module docs for the resizing model.
pub struct Dict<T: DictType> {
    dtype: T,
    tables: [Table<T::Key, T::Value>; 2],
    /// Next old-table bucket to migrate; −1 when no rehash is in flight.
    rehash_idx: isize,
    /// While positive, rehash steps are suppressed (held by safe iterators
    /// and in-flight scans). Negative is a bug.
    pause_rehash: isize,
}

impl<T: DictType> Dict<T> {
    /// Creates an empty dictionary. No table is allocated until the first
    /// insert.
    pub fn with_type(dtype: T) -> Self {
        Dict {
            dtype,
            tables: [Table::empty(), Table::empty()],
            rehash_idx: -1,
            pause_rehash: 0,
        }
    }

    /// Live entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total allocated buckets across both tables.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    /// True while a safe iterator or scan is holding rehashing back.
    #[inline]
    pub fn rehash_paused(&self) -> bool {
        self.pause_rehash > 0
    }

    #[inline]
    fn unpause(&mut self) {
        self.pause_rehash -= 1;
        assert!(self.pause_rehash >= 0, "rehash pause counter went negative");
    }

    // ── Incremental rehashing ─────────────────────────────────────────────────

    /// Performs one rehash step if one is due and not suppressed.
    #[inline]
    fn rehash_step(&mut self) {
        if self.pause_rehash == 0 && self.is_rehashing() {
            self.rehash(1);
        }
    }

    /// Migrates up to `buckets` non-empty old-table buckets. Returns `true`
    /// while migration work remains.
    ///
    /// At most `10 × buckets` empty buckets are skipped before the call
    /// yields early, so a sparse old table cannot stall the caller.
    pub fn rehash(&mut self, buckets: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = buckets.saturating_mul(REHASH_EMPTY_VISITS).max(1);
        let mut remaining = buckets;

        let Self {
            dtype,
            tables,
            rehash_idx,
            ..
        } = self;
        while remaining > 0 && tables[0].used != 0 {
            remaining -= 1;
            let (front, back) = tables.split_at_mut(1);
            let t0 = &mut front[0];
            let t1 = &mut back[0];

            let mut idx = *rehash_idx as usize;
            debug_assert!(idx < t0.size());
            while t0.buckets[idx].is_none() {
                idx += 1;
                *rehash_idx = idx as isize;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
                debug_assert!(idx < t0.size());
            }

            let mask = t1.sizemask();
            let mut chain = t0.buckets[idx].take();
            while let Some(mut e) = chain {
                chain = e.next.take();
                let target = (dtype.hash(&e.key) & mask) as usize;
                e.next = t1.buckets[target].take();
                t1.buckets[target] = Some(e);
                t0.used -= 1;
                t1.used += 1;
            }
            *rehash_idx = (idx + 1) as isize;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = mem::replace(&mut self.tables[1], Table::empty());
            self.rehash_idx = -1;
            debug!(
                "incremental rehash complete: {} buckets, {} entries",
                self.tables[0].size(),
                self.tables[0].used
            );
            return false;
        }
        true
    }

    /// Migrates buckets in 100-bucket slices until `budget` elapses or the
    /// rehash completes. Returns the number of buckets migrated. A paused
    /// dictionary performs no work.
    pub fn rehash_for(&mut self, budget: std::time::Duration) -> usize {
        if self.pause_rehash > 0 {
            return 0;
        }
        let start = std::time::Instant::now();
        let mut migrated = 0;
        while self.rehash(100) {
            migrated += 100;
            if start.elapsed() >= budget {
                break;
            }
        }
        migrated
    }

    // ── Sizing ────────────────────────────────────────────────────────────────

    fn next_size(size: usize) -> Option<usize> {
        if size > usize::MAX >> 1 {
            return None;
        }
        Some(size.next_power_of_two().max(INITIAL_SIZE))
    }

    /// Grows (or initializes) the table to hold at least `size` entries,
    /// rounded up to a power of two. Allocation failure goes through the
    /// out-of-memory handler.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        match self.expand_inner(size) {
            Err(DictError::OutOfMemory) => {
                crate::alloc::handle_oom(size.saturating_mul(mem::size_of::<Link<T::Key, T::Value>>()))
            }
            other => other,
        }
    }

    /// Fallible [`expand`]: allocation failure is returned, not fatal.
    pub fn try_expand(&mut self, size: usize) -> Result<(), DictError> {
        self.expand_inner(size)
    }

    fn expand_inner(&mut self, size: usize) -> Result<(), DictError> {
        if self.is_rehashing() || self.tables[0].used > size {
            return Err(DictError::Busy);
        }
        let realsize = Self::next_size(size).ok_or(DictError::SizeOverflow)?;
        if realsize == self.tables[0].size() {
            return Err(DictError::Busy);
        }
        realsize
            .checked_mul(mem::size_of::<Link<T::Key, T::Value>>())
            .ok_or(DictError::SizeOverflow)?;

        let table = Table::try_with_size(realsize).ok_or(DictError::OutOfMemory)?;
        if self.tables[0].size() == 0 {
            // First allocation; no migration needed.
            self.tables[0] = table;
        } else {
            debug!(
                "incremental rehash start: {} -> {} buckets ({} entries)",
                self.tables[0].size(),
                realsize,
                self.tables[0].used
            );
            self.tables[1] = table;
            self.rehash_idx = 0;
        }
        Ok(())
    }

    /// Shrinks the table to the smallest power of two holding the current
    /// entries (floor [`INITIAL_SIZE`]). Fails while rehashing or while
    /// resizing is disabled process-wide.
    pub fn shrink_to_fit(&mut self) -> Result<(), DictError> {
        if !resize_enabled() || self.is_rehashing() {
            return Err(DictError::Busy);
        }
        let minimal = self.tables[0].used.max(INITIAL_SIZE);
        self.expand_inner(minimal)
    }

    /// Growth trigger consulted before every insert.
    fn expand_if_needed(&mut self) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Ok(());
        }
        if self.tables[0].size() == 0 {
            return self.expand(INITIAL_SIZE);
        }
        let used = self.tables[0].used;
        let size = self.tables[0].size();
        if used >= size && (resize_enabled() || used / size > FORCE_RESIZE_RATIO) {
            let realsize =
                Self::next_size(used + 1).ok_or(DictError::SizeOverflow)?;
            let bytes = realsize
                .checked_mul(mem::size_of::<Link<T::Key, T::Value>>())
                .ok_or(DictError::SizeOverflow)?;
            let load = used as f64 / size as f64;
            if self.dtype.expand_allowed(bytes, load) {
                return self.expand(used + 1);
            }
        }
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    fn locate_hashed(&self, h: u64, key: &T::Key) -> Option<Pos> {
        for t in 0..2 {
            let table = &self.tables[t];
            if table.size() == 0 {
                if self.is_rehashing() {
                    continue;
                }
                break;
            }
            let bucket = (h & table.sizemask()) as usize;
            let mut cur = table.buckets[bucket].as_deref();
            let mut depth = 0;
            while let Some(e) = cur {
                if self.dtype.key_eq(key, &e.key) {
                    return Some(Pos {
                        table: t,
                        bucket,
                        depth,
                    });
                }
                depth += 1;
                cur = e.next.as_deref();
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    fn entry_at(&self, p: Pos) -> Option<&Entry<T::Key, T::Value>> {
        let mut cur = self.tables[p.table].buckets.get(p.bucket)?.as_deref()?;
        for _ in 0..p.depth {
            cur = cur.next.as_deref()?;
        }
        Some(cur)
    }

    fn entry_mut_at(&mut self, p: Pos) -> Option<&mut Entry<T::Key, T::Value>> {
        let mut cur = self.tables[p.table]
            .buckets
            .get_mut(p.bucket)?
            .as_deref_mut()?;
        for _ in 0..p.depth {
            cur = cur.next.as_deref_mut()?;
        }
        Some(cur)
    }

    /// Looks a key up, advancing the rehash by one step on the way.
    pub fn get(&mut self, key: &T::Key) -> Option<&T::Value> {
        self.get_entry(key).map(|(_, v)| v)
    }

    /// As [`get`](Self::get) but also yields the stored key.
    pub fn get_entry(&mut self, key: &T::Key) -> Option<(&T::Key, &T::Value)> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();
        let h = self.dtype.hash(key);
        let pos = self.locate_hashed(h, key)?;
        let e = self.entry_at(pos)?;
        Some((&e.key, &e.val))
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &T::Key) -> Option<&mut T::Value> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();
        let h = self.dtype.hash(key);
        let pos = self.locate_hashed(h, key)?;
        Some(&mut self.entry_mut_at(pos)?.val)
    }

    pub fn contains(&mut self, key: &T::Key) -> bool {
        self.get_entry(key).is_some()
    }

    // ── Insertion ─────────────────────────────────────────────────────────────

    /// Head-inserts into the newest table. Caller has verified absence.
    fn push_new(&mut self, h: u64, key: T::Key, val: T::Value) {
        let t = if self.is_rehashing() { 1 } else { 0 };
        let table = &mut self.tables[t];
        let bucket = (h & table.sizemask()) as usize;
        let next = table.buckets[bucket].take();
        table.buckets[bucket] = Some(Box::new(Entry { key, val, next }));
        table.used += 1;
    }

    /// Inserts a fresh key. Fails with [`DictError::DuplicateKey`] if the
    /// key is already present; the dictionary is unchanged in that case.
    pub fn insert(&mut self, key: T::Key, val: T::Value) -> Result<(), DictError> {
        self.rehash_step();
        self.expand_if_needed()?;
        let h = self.dtype.hash(&key);
        if self.locate_hashed(h, &key).is_some() {
            return Err(DictError::DuplicateKey);
        }
        self.push_new(h, key, val);
        Ok(())
    }

    /// Inserts or overwrites. Returns `true` when the key was fresh. The
    /// previous value, if any, is dropped after the new one is in place.
    pub fn replace(&mut self, key: T::Key, val: T::Value) -> Result<bool, DictError> {
        self.rehash_step();
        let h = self.dtype.hash(&key);
        if let Some(pos) = self.locate_hashed(h, &key) {
            let e = self.entry_mut_at(pos).expect("located entry must exist");
            e.val = val;
            return Ok(false);
        }
        self.expand_if_needed()?;
        // Expansion may have started a rehash; the target table changed.
        let h = self.dtype.hash(&key);
        self.push_new(h, key, val);
        Ok(true)
    }

    /// Returns the value slot for `key`, inserting `default()` first if the
    /// key is absent. The flag reports whether the key already existed.
    /// Useful for payloads updated in place, e.g. [`Value::Signed`] counters.
    pub fn find_or_insert_with(
        &mut self,
        key: T::Key,
        default: impl FnOnce() -> T::Value,
    ) -> Result<(&mut T::Value, bool), DictError> {
        self.rehash_step();
        let h = self.dtype.hash(&key);
        if let Some(pos) = self.locate_hashed(h, &key) {
            let e = self.entry_mut_at(pos).expect("located entry must exist");
            return Ok((&mut e.val, true));
        }
        self.expand_if_needed()?;
        self.push_new(h, key, default());
        let t = if self.is_rehashing() { 1 } else { 0 };
        let table = &mut self.tables[t];
        let bucket = (h & table.sizemask()) as usize;
        let e = table.buckets[bucket]
            .as_deref_mut()
            .expect("entry was just inserted at the chain head");
        Ok((&mut e.val, false))
    }

    // ── Removal ───────────────────────────────────────────────────────────────

    fn unlink_hashed(&mut self, h: u64, key: &T::Key) -> Option<Box<Entry<T::Key, T::Value>>> {
        let Self { dtype, tables, rehash_idx, .. } = self;
        let rehashing = *rehash_idx != -1;
        for t in 0..2 {
            let table = &mut tables[t];
            if table.size() == 0 {
                if rehashing {
                    continue;
                }
                break;
            }
            let bucket = (h & table.sizemask()) as usize;
            let mut cur = &mut table.buckets[bucket];
            loop {
                match cur {
                    None => break,
                    Some(e) if dtype.key_eq(key, &e.key) => {
                        let mut boxed = cur.take().expect("matched entry");
                        *cur = boxed.next.take();
                        table.used -= 1;
                        return Some(boxed);
                    }
                    Some(e) => cur = &mut e.next,
                }
            }
            if !rehashing {
                break;
            }
        }
        None
    }

    /// Removes and drops the entry for `key`.
    pub fn remove(&mut self, key: &T::Key) -> Result<(), DictError> {
        self.take(key).map(|_| ()).ok_or(DictError::NotFound)
    }

    /// Removes the entry for `key` and hands its parts back instead of
    /// dropping them, letting the caller defer or offload the teardown
    /// (e.g. through the background lazy-free queue).
    pub fn take(&mut self, key: &T::Key) -> Option<(T::Key, T::Value)> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();
        let h = self.dtype.hash(key);
        self.unlink_hashed(h, key).map(|e| e.into_pair())
    }

    /// Drops every entry and returns the dictionary to its unallocated
    /// state. The type descriptor is retained.
    pub fn clear(&mut self) {
        self.tables = [Table::empty(), Table::empty()];
        self.rehash_idx = -1;
        self.pause_rehash = 0;
    }

    // ── Sampling ──────────────────────────────────────────────────────────────

    /// Returns one entry, approximately uniformly: a bucket is drawn
    /// uniformly among non-empty candidates, then one chain link uniformly.
    /// Chains of unequal length skew the result slightly; use
    /// [`fair_random_entry`](Self::fair_random_entry) when that matters.
    pub fn random_entry(&mut self) -> Option<(&T::Key, &T::Value)> {
        use rand::Rng;
        if self.is_empty() {
            return None;
        }
        self.rehash_step();
        let mut rng = rand::rng();

        let (t, bucket) = if self.is_rehashing() {
            let s0 = self.tables[0].size();
            let skip = self.rehash_idx as usize;
            let span = s0 + self.tables[1].size() - skip;
            loop {
                let h = skip + rng.random_range(0..span);
                let (t, b) = if h >= s0 { (1, h - s0) } else { (0, h) };
                if self.tables[t].buckets[b].is_some() {
                    break (t, b);
                }
            }
        } else {
            loop {
                let b = rng.random_range(0..self.tables[0].size());
                if self.tables[0].buckets[b].is_some() {
                    break (0, b);
                }
            }
        };

        let len = chain_len(&self.tables[t].buckets[bucket]);
        let depth = rng.random_range(0..len);
        let e = self
            .entry_at(Pos { table: t, bucket, depth })
            .expect("sampled chain position exists");
        Some((&e.key, &e.val))
    }

    /// Returns one entry with better uniformity than
    /// [`random_entry`](Self::random_entry): draws a batch of up to 15
    /// entries and picks among them, falling back to the cheap path when the
    /// batch comes back empty.
    pub fn fair_random_entry(&mut self) -> Option<(&T::Key, &T::Value)> {
        use rand::Rng;
        const BATCH: usize = 15;
        let positions = self.sample_positions(BATCH);
        if positions.is_empty() {
            return self.random_entry();
        }
        let pick = positions[rand::rng().random_range(0..positions.len())];
        let e = self.entry_at(pick)?;
        Some((&e.key, &e.val))
    }

    /// Collects up to `count` distinct entries by walking chains from a
    /// random starting bucket. Cheaper than `count` independent draws but
    /// not uniform; meant for eviction-candidate style sampling.
    pub fn sample(&mut self, count: usize) -> Vec<(&T::Key, &T::Value)> {
        let positions = self.sample_positions(count);
        positions
            .iter()
            .filter_map(|&p| self.entry_at(p))
            .map(|e| (&e.key, &e.val))
            .collect()
    }

    fn sample_positions(&mut self, count: usize) -> Vec<Pos> {
        use rand::Rng;
        let count = count.min(self.len());
        if count == 0 {
            return Vec::new();
        }
        // Rehash work proportional to the request, then a stable view.
        for _ in 0..count {
            if self.pause_rehash == 0 && self.is_rehashing() {
                self.rehash(1);
            } else {
                break;
            }
        }
        let tables = if self.is_rehashing() { 2 } else { 1 };
        let mut maxsizemask = self.tables[0].sizemask();
        if tables > 1 && self.tables[1].sizemask() > maxsizemask {
            maxsizemask = self.tables[1].sizemask();
        }

        let mut rng = rand::rng();
        let mut i = rng.random_range(0..=maxsizemask);
        let mut emptylen = 0usize;
        let mut out: Vec<Pos> = Vec::with_capacity(count);
        let mut maxsteps = count.saturating_mul(10);

        while out.len() < count && maxsteps > 0 {
            maxsteps -= 1;
            for t in 0..tables {
                // Buckets below the migration point of the old table were
                // drained; visit their new home instead.
                if tables == 2 && t == 0 && i < self.rehash_idx as u64 {
                    if i >= self.tables[1].size() as u64 {
                        i = self.rehash_idx as u64;
                    } else {
                        continue;
                    }
                }
                if i >= self.tables[t].size() as u64 {
                    continue;
                }
                match &self.tables[t].buckets[i as usize] {
                    None => {
                        emptylen += 1;
                        if emptylen >= 5 && emptylen > count {
                            i = rng.random_range(0..=maxsizemask);
                            emptylen = 0;
                        }
                    }
                    Some(head) => {
                        emptylen = 0;
                        // The cursor re-randomizes on long empty streaks and
                        // may land on a bucket already harvested; one call
                        // must not hand the same entry out twice.
                        if out
                            .iter()
                            .any(|p| p.table == t && p.bucket == i as usize)
                        {
                            continue;
                        }
                        let mut cur = Some(head.as_ref());
                        let mut depth = 0;
                        while let Some(e) = cur {
                            out.push(Pos {
                                table: t,
                                bucket: i as usize,
                                depth,
                            });
                            if out.len() == count {
                                return out;
                            }
                            depth += 1;
                            cur = e.next.as_deref();
                        }
                    }
                }
            }
            i = (i + 1) & maxsizemask;
        }
        out
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Renders a bucket-occupancy summary of both tables for operator
    /// diagnostics.
    pub fn stats(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (i, table) in self.tables.iter().enumerate() {
            if table.size() == 0 {
                continue;
            }
            let mut nonempty = 0usize;
            let mut longest = 0usize;
            for bucket in table.buckets.iter() {
                let len = chain_len(bucket);
                if len > 0 {
                    nonempty += 1;
                    longest = longest.max(len);
                }
            }
            let avg = if nonempty > 0 {
                table.used as f64 / nonempty as f64
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "table {i}: {} buckets, {} entries, {} non-empty, longest chain {}, avg chain {:.2}",
                table.size(),
                table.used,
                nonempty,
                longest,
                avg,
            );
        }
        if out.is_empty() {
            out.push_str("empty dictionary, no table allocated\n");
        }
        out
    }
}

fn chain_len<K, V>(bucket: &Link<K, V>) -> usize {
    let mut n = 0;
    let mut cur = bucket.as_deref();
    while let Some(e) = cur {
        n += 1;
        cur = e.next.as_deref();
    }
    n
}

// ── Provided type descriptors ─────────────────────────────────────────────────

/// `String` keys hashed as raw bytes.
pub struct StringKeys<V>(std::marker::PhantomData<V>);

impl<V> Default for StringKeys<V> {
    fn default() -> Self {
        StringKeys(std::marker::PhantomData)
    }
}

impl<V> DictType for StringKeys<V> {
    type Key = String;
    type Value = V;

    fn hash(&self, key: &String) -> u64 {
        crate::hash::hash(key.as_bytes())
    }

    fn key_eq(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// `String` keys compared and hashed without regard to ASCII case, for
/// lookup tables keyed by command or option names.
pub struct CaseInsensitiveKeys<V>(std::marker::PhantomData<V>);

impl<V> Default for CaseInsensitiveKeys<V> {
    fn default() -> Self {
        CaseInsensitiveKeys(std::marker::PhantomData)
    }
}

impl<V> DictType for CaseInsensitiveKeys<V> {
    type Key = String;
    type Value = V;

    fn hash(&self, key: &String) -> u64 {
        crate::hash::hash_nocase(key.as_bytes())
    }

    fn key_eq(&self, a: &String, b: &String) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}
