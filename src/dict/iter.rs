//! Dictionary iteration.
//!
//! Iteration state lives outside the dictionary so the borrow taken by each
//! advancement ends when the call returns, leaving the caller free to use
//! the dictionary between calls. Two flavors share the state machine:
//!
//! - **Guarded** ([`Dict::safe_iter`]): rehashing is suspended from the
//!   first advancement until release, so buckets never migrate mid-walk.
//!   The caller may insert freely and may remove the entry most recently
//!   yielded; removing any other entry invalidates the walk.
//! - **Unguarded** ([`Dict::unguarded_iter`]): no suspension and no
//!   mutation of any kind. A 64-bit fingerprint of both tables is taken at
//!   the first advancement and re-checked at release; a mismatch is a
//!   programming error and panics.
//!
//! Walk order: old table bucket by bucket, chain by chain, then the new
//! table if a rehash is in flight. The next entry is pre-read before each
//! yield, which is what makes removing the yielded entry legal.

use std::ptr::NonNull;

use super::{Dict, DictType, Entry};

/// Iteration state for either flavor. Obtain from [`Dict::safe_iter`] or
/// [`Dict::unguarded_iter`], advance with [`Dict::iter_next`], and always
/// hand back to [`Dict::release_iter`].
#[must_use = "iteration state must be released through Dict::release_iter"]
pub struct DictIterator<K, V> {
    table: usize,
    index: isize,
    safe: bool,
    entry: Option<NonNull<Entry<K, V>>>,
    next: Option<NonNull<Entry<K, V>>>,
    fingerprint: u64,
}

impl<K, V> DictIterator<K, V> {
    fn new(safe: bool) -> Self {
        DictIterator {
            table: 0,
            index: -1,
            safe,
            entry: None,
            next: None,
            fingerprint: 0,
        }
    }

    #[inline]
    fn started(&self) -> bool {
        !(self.index == -1 && self.table == 0)
    }
}

impl<T: DictType> Dict<T> {
    /// Begins a guarded walk. Rehashing is paused from the first
    /// [`iter_next`](Self::iter_next) until [`release_iter`](Self::release_iter).
    pub fn safe_iter(&self) -> DictIterator<T::Key, T::Value> {
        DictIterator::new(true)
    }

    /// Begins an unguarded walk. The dictionary must not be mutated until
    /// release; release panics if it was.
    pub fn unguarded_iter(&self) -> DictIterator<T::Key, T::Value> {
        DictIterator::new(false)
    }

    /// Yields the next entry of the walk, or `None` when exhausted.
    ///
    /// The entry yielded by the previous call may be removed through
    /// [`remove`](Self::remove)/[`take`](Self::take) before the next call;
    /// the walk pre-reads its successor.
    pub fn iter_next<'d>(
        &'d mut self,
        it: &mut DictIterator<T::Key, T::Value>,
    ) -> Option<(&'d T::Key, &'d T::Value)> {
        loop {
            match it.entry {
                None => {
                    if !it.started() {
                        if it.safe {
                            self.pause_rehash += 1;
                        } else {
                            it.fingerprint = self.fingerprint();
                        }
                    }
                    it.index += 1;
                    if it.index >= self.tables[it.table].size() as isize {
                        if self.is_rehashing() && it.table == 0 {
                            it.table = 1;
                            it.index = 0;
                        } else {
                            return None;
                        }
                    }
                    it.entry = self.tables[it.table].buckets[it.index as usize]
                        .as_deref()
                        .map(NonNull::from);
                }
                Some(_) => it.entry = it.next,
            }
            if let Some(e) = it.entry {
                // Entries are heap-pinned; the pointer stays valid under the
                // documented mutation contract for each flavor.
                let e: &'d Entry<T::Key, T::Value> = unsafe { &*e.as_ptr() };
                it.next = e.next.as_deref().map(NonNull::from);
                return Some((&e.key, &e.val));
            }
        }
    }

    /// Ends a walk: resumes rehashing (guarded flavor) or verifies the
    /// fingerprint (unguarded flavor, panicking on mutation). A walk that
    /// never advanced releases as a no-op.
    pub fn release_iter(&mut self, it: DictIterator<T::Key, T::Value>) {
        if !it.started() {
            return;
        }
        if it.safe {
            self.unpause();
        } else {
            assert!(
                it.fingerprint == self.fingerprint(),
                "dictionary mutated during unguarded iteration"
            );
        }
    }

    /// Digest of both tables' identity and occupancy, mixed through six
    /// rounds of Wang's 64-bit integer hash. Any table growth, promotion,
    /// insertion, or removal changes it.
    fn fingerprint(&self) -> u64 {
        let t0 = &self.tables[0];
        let t1 = &self.tables[1];
        let parts = [
            t0.buckets.as_ptr() as u64,
            t0.size() as u64,
            t0.used as u64,
            t1.buckets.as_ptr() as u64,
            t1.size() as u64,
            t1.used as u64,
        ];
        let mut h: u64 = 0;
        for v in parts {
            h = h.wrapping_add(v);
            h = (!h).wrapping_add(h << 21);
            h ^= h >> 24;
            h = h.wrapping_add(h << 3).wrapping_add(h << 8);
            h ^= h >> 14;
            h = h.wrapping_add(h << 2).wrapping_add(h << 4);
            h ^= h >> 28;
            h = h.wrapping_add(h << 31);
        }
        h
    }
}
