//! Stateless reverse-bit cursor traversal.
//!
//! Lets a caller walk the whole dictionary across many calls while the
//! dictionary keeps growing, shrinking, and rehashing in between. The only
//! state is an opaque cursor: pass 0 to start, pass each return value back
//! in, and a returned 0 means the traversal has covered everything.
//!
//! The cursor is incremented on its reversed bits, so the high bits vary
//! fastest. Masking such a cursor with a smaller or larger power-of-two
//! mask preserves the tail of buckets still to visit, which yields the
//! guarantee callers rely on: every key present for the whole traversal is
//! reported at least once, and keys may be reported more than once.
//! Callers must tolerate duplicates.

use super::{Dict, DictType, Link};

fn emit_bucket<K, V, F: FnMut(&K, &V)>(bucket: &Link<K, V>, f: &mut F) {
    let mut cur = bucket.as_deref();
    while let Some(e) = cur {
        f(&e.key, &e.val);
        cur = e.next.as_deref();
    }
}

/// One reverse-bit step: force the bits above the mask, then increment the
/// masked part from the high end.
#[inline]
fn next_cursor(v: u64, mask: u64) -> u64 {
    let v = v | !mask;
    v.reverse_bits().wrapping_add(1).reverse_bits()
}

impl<T: DictType> Dict<T> {
    /// Visits the bucket(s) addressed by `cursor`, feeding every entry in
    /// them to `f`, and returns the cursor for the next call. Rehashing is
    /// held off for the duration of the call.
    ///
    /// While a rehash is in flight the call covers the addressed bucket of
    /// the smaller table plus all buckets of the larger table that alias it,
    /// so no key can slip between the tables unseen.
    pub fn scan<F: FnMut(&T::Key, &T::Value)>(&mut self, cursor: u64, mut f: F) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.pause_rehash += 1;

        let mut v = cursor;
        if !self.is_rehashing() {
            let mask = self.tables[0].sizemask();
            emit_bucket(&self.tables[0].buckets[(v & mask) as usize], &mut f);
            v = next_cursor(v, mask);
        } else {
            let (small, big) = if self.tables[0].size() <= self.tables[1].size() {
                (0, 1)
            } else {
                (1, 0)
            };
            let small_mask = self.tables[small].sizemask();
            let big_mask = self.tables[big].sizemask();

            emit_bucket(&self.tables[small].buckets[(v & small_mask) as usize], &mut f);
            loop {
                emit_bucket(&self.tables[big].buckets[(v & big_mask) as usize], &mut f);
                v = next_cursor(v, big_mask);
                if v & (small_mask ^ big_mask) == 0 {
                    break;
                }
            }
        }

        self.unpause();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::next_cursor;
    use crate::dict::tests::numbered;
    use crate::dict::{Dict, StringKeys};
    use std::collections::HashSet;

    #[test]
    fn cursor_visits_every_bucket_once_per_table_size() {
        for size in [4u64, 8, 16, 32, 64, 128, 256] {
            let mask = size - 1;
            let mut seen = HashSet::new();
            let mut v = 0u64;
            loop {
                assert!(seen.insert(v & mask), "bucket revisited at size {size}");
                v = next_cursor(v, mask);
                if v == 0 {
                    break;
                }
            }
            assert_eq!(seen.len() as u64, size);
        }
    }

    #[test]
    fn full_scan_reports_every_key_exactly_once_on_stable_table() {
        let mut d = numbered(16);
        while d.is_rehashing() {
            d.rehash(16);
        }
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            cursor = d.scan(cursor, |k, _| seen.push(k.clone()));
            if cursor == 0 {
                break;
            }
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn mid_rehash_scan_covers_both_tables() {
        let mut d = numbered(17);
        assert!(d.is_rehashing());
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            cursor = d.scan(cursor, |k, _| seen.push(k.clone()));
            if cursor == 0 {
                break;
            }
        }
        assert!(d.is_rehashing(), "scan itself must not advance the rehash");
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 17);
    }

    #[test]
    fn scan_survives_growth_between_calls() {
        let mut d = Dict::with_type(StringKeys::<u64>::default());
        for i in 0..100 {
            d.insert(format!("orig-{i}"), i).unwrap();
        }
        let mut seen = HashSet::new();
        let mut cursor = 0;
        let mut grown = false;
        loop {
            cursor = d.scan(cursor, |k, _| {
                seen.insert(k.clone());
            });
            if !grown {
                // Force expansion and a long rehash right in the middle.
                for i in 0..400 {
                    d.insert(format!("extra-{i}"), i).unwrap();
                }
                grown = true;
            }
            if cursor == 0 {
                break;
            }
        }
        for i in 0..100 {
            assert!(seen.contains(&format!("orig-{i}")), "lost orig-{i}");
        }
    }

    #[test]
    fn scan_of_empty_dict_completes_immediately() {
        let mut d = Dict::with_type(StringKeys::<u64>::default());
        let mut hits = 0;
        assert_eq!(d.scan(0, |_, _| hits += 1), 0);
        assert_eq!(hits, 0);
    }
}
