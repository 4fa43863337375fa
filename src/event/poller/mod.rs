//! Kernel readiness demultiplexing.
//!
//! One backend is compiled in per target, chosen by `build.rs` in priority
//! order: `epoll(7)` on Linux, `kqueue(2)` on the BSD family and macOS, and
//! `select(2)` everywhere else.
//!
//! The trait contract hides backend quirks from the event loop:
//! - `poll` reports each ready fd **at most once** per call, with its
//!   readable and writable readiness merged into one mask. kqueue reports
//!   read and write filters as separate kevents; the backend is responsible
//!   for the merge.
//! - `del` of an fd the kernel no longer knows about is not an error.
//! - Error conditions on an fd (`EPOLLERR`/`EPOLLHUP` and friends) surface
//!   as both readable and writable so handlers get a chance to observe the
//!   failure from either side.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// One ready file descriptor with its merged readiness mask.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fired {
    pub fd: RawFd,
    pub mask: u32,
}

/// The operations the event loop needs from a readiness backend.
pub(crate) trait SystemPoller: Sized {
    /// Binds a backend able to track up to `capacity` descriptors.
    fn new(capacity: usize) -> io::Result<Self>;

    /// Grows or shrinks the tracking capacity.
    fn resize(&mut self, capacity: usize) -> io::Result<()>;

    /// Registers interest bits for `fd`. `old` is the interest already
    /// registered; the kernel-side interest becomes `old | added`.
    fn add(&mut self, fd: RawFd, old: u32, added: u32) -> io::Result<()>;

    /// Drops interest bits for `fd`, leaving `remaining` registered.
    /// Unknown fds are tolerated.
    fn del(&mut self, fd: RawFd, removed: u32, remaining: u32) -> io::Result<()>;

    /// Waits for readiness: `None` blocks indefinitely, `Some(0)` polls.
    /// Fills `out` with at most one entry per ready fd and returns the
    /// count. An interrupted wait reports zero events.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Fired>) -> io::Result<usize>;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Clamped millisecond conversion for backends taking `int` timeouts,
/// rounding up so a short wait never becomes a busy spin.
#[allow(dead_code)]
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d
            .as_micros()
            .div_ceil(1000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

cfg_if::cfg_if! {
    if #[cfg(use_epoll)] {
        mod epoll;
        pub(crate) use epoll::Epoll as Backend;
    } else if #[cfg(use_kqueue)] {
        mod kqueue;
        pub(crate) use kqueue::Kqueue as Backend;
    } else {
        mod select;
        pub(crate) use select::Select as Backend;
    }
}
