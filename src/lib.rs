//! kvcore — the in-memory engine core of a key/value server.
//!
//! Two tightly coupled subsystems and their support layer:
//!
//! - [`dict`] — an incrementally-resizable chained hash dictionary with
//!   guarded/fingerprinted iteration, reverse-bit cursor scans, and
//!   probabilistic sampling.
//! - [`event`] — a single-threaded event loop multiplexing kernel readiness
//!   (epoll / kqueue / select, chosen at build time) with a timer list.
//! - [`bio`] — background workers for deferred close / fsync / lazy free.
//! - [`alloc`] — size-tracked allocation with a process-wide used-bytes
//!   counter and an installable out-of-memory handler.
//! - [`hash`] — seeded SipHash-2-4 keyed hashing for placement.
//! - [`clock`] — the monotonic microsecond time source the timers run on.
//!
//! The core is single-threaded by design: dictionary mutation, handler
//! callbacks, and timer processing all happen on the thread driving
//! [`event::EventLoop::run`]. Only the background workers and the
//! allocation counter are shared across threads.

pub mod alloc;
pub mod bio;
pub mod clock;
pub mod dict;
pub mod event;
pub mod hash;

// ── Primary types at crate level ──────────────────────────────────────────────

pub use bio::{Bio, JobKind};
pub use dict::{Dict, DictError, DictIterator, DictType, Value};
pub use event::{EventError, EventLoop, TimerNext};
