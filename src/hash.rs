//! Keyed byte hashing for dictionary placement.
//!
//! All bucket placement goes through SipHash-2-4 keyed with a process-wide
//! 128-bit seed, so hash values are unpredictable across process runs and
//! chain lengths cannot be forced by an adversary choosing keys. Two entry
//! points:
//! - [`hash`]        — raw bytes
//! - [`hash_nocase`] — ASCII-case-insensitive (lowercases while feeding)

use siphasher::sip::SipHasher24;
use std::hash::Hasher;
use std::sync::OnceLock;

static SEED: OnceLock<[u8; 16]> = OnceLock::new();

/// Returns the process-wide hash seed, drawing it from the OS randomness
/// source on first use.
pub fn seed() -> [u8; 16] {
    *SEED.get_or_init(rand::random)
}

/// Installs a fixed hash seed. Returns `false` if hashing has already been
/// seeded (by an earlier call or by first use), in which case the seed is
/// unchanged. Intended for reproducible tests and debugging.
pub fn set_seed(seed: [u8; 16]) -> bool {
    SEED.set(seed).is_ok()
}

fn keys() -> (u64, u64) {
    let s = seed();
    let k0 = u64::from_le_bytes(s[..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(s[8..].try_into().unwrap());
    (k0, k1)
}

/// SipHash-2-4 of `bytes` under the process seed.
pub fn hash(bytes: &[u8]) -> u64 {
    let (k0, k1) = keys();
    let mut h = SipHasher24::new_with_keys(k0, k1);
    h.write(bytes);
    h.finish()
}

/// SipHash-2-4 of `bytes` with ASCII uppercase folded to lowercase, so
/// `"Key"` and `"key"` collide on purpose.
pub fn hash_nocase(bytes: &[u8]) -> u64 {
    let (k0, k1) = keys();
    let mut h = SipHasher24::new_with_keys(k0, k1);
    let mut buf = [0u8; 64];
    for chunk in bytes.chunks(buf.len()) {
        for (d, s) in buf.iter_mut().zip(chunk) {
            *d = s.to_ascii_lowercase();
        }
        h.write(&buf[..chunk.len()]);
    }
    h.finish()
}
