//! Size-tracked allocation façade.
//!
//! Every byte handed out through this module is attributed to a process-wide
//! used-memory counter, readable at any time via [`used_memory`]. Two modes
//! cover the two kinds of backend:
//!
//! - The raw API ([`alloc`], [`realloc`], [`free`], …) works against
//!   `std::alloc`, which does not report usable sizes, so each allocation
//!   carries a `usize` prefix recording the requested size. The counter
//!   includes the prefix.
//! - [`TrackingAllocator`] wraps any [`GlobalAlloc`] for deployment with
//!   `#[global_allocator]`; there the `Layout` carries the size on both the
//!   allocate and deallocate sides, so no prefix is needed and the counter
//!   tracks exactly the user-requested bytes.
//!
//! Allocation failure invokes an installable out-of-memory handler (default:
//! log and abort). The `try_*` variants return `None` instead.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Bytes prepended to every raw-API allocation to record its size.
const PREFIX: usize = std::mem::size_of::<usize>();

static USED: AtomicUsize = AtomicUsize::new(0);

type OomHandler = fn(usize);

fn default_oom_handler(size: usize) {
    log::error!("out of memory trying to allocate {size} bytes");
    eprintln!("kvcore: out of memory trying to allocate {size} bytes");
}

static OOM_HANDLER: RwLock<OomHandler> = RwLock::new(default_oom_handler as OomHandler);

/// Total bytes currently attributed to live allocations made through this
/// module (raw API and any installed [`TrackingAllocator`] combined).
pub fn used_memory() -> usize {
    USED.load(Ordering::Relaxed)
}

/// Installs `handler`, called with the failed request size before the
/// process aborts. The handler may log, flush, or dump state; allocation
/// does not continue after it returns.
pub fn set_oom_handler(handler: OomHandler) {
    *OOM_HANDLER.write().unwrap() = handler;
}

fn oom(size: usize) -> ! {
    let handler = *OOM_HANDLER.read().unwrap();
    handler(size);
    std::process::abort();
}

/// Routes an allocation failure of `size` bytes from elsewhere in the crate
/// through the installed handler. Never returns.
pub(crate) fn handle_oom(size: usize) -> ! {
    oom(size)
}

#[inline]
fn update_used(delta: isize) {
    if delta >= 0 {
        USED.fetch_add(delta as usize, Ordering::Relaxed);
    } else {
        USED.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}

#[inline]
fn prefixed_layout(size: usize) -> Option<Layout> {
    let total = size.checked_add(PREFIX)?;
    Layout::from_size_align(total, PREFIX).ok()
}

unsafe fn raw_alloc(size: usize, zeroed: bool) -> Option<NonNull<u8>> {
    let layout = prefixed_layout(size)?;
    let base = if zeroed {
        std::alloc::alloc_zeroed(layout)
    } else {
        std::alloc::alloc(layout)
    };
    let base = NonNull::new(base)?;
    (base.as_ptr() as *mut usize).write(size);
    update_used((PREFIX + size) as isize);
    Some(NonNull::new_unchecked(base.as_ptr().add(PREFIX)))
}

/// Allocates `size` bytes, aborting through the OOM handler on failure.
/// The returned pointer is aligned for `usize` and must be released with
/// [`free`].
pub fn alloc(size: usize) -> NonNull<u8> {
    try_alloc(size).unwrap_or_else(|| oom(size))
}

/// Fallible [`alloc`]: returns `None` on allocation failure or if
/// `size + PREFIX` overflows the address space.
pub fn try_alloc(size: usize) -> Option<NonNull<u8>> {
    unsafe { raw_alloc(size, false) }
}

/// Allocates `size` zeroed bytes, aborting through the OOM handler on
/// failure.
pub fn alloc_zeroed(size: usize) -> NonNull<u8> {
    try_alloc_zeroed(size).unwrap_or_else(|| oom(size))
}

/// Fallible [`alloc_zeroed`].
pub fn try_alloc_zeroed(size: usize) -> Option<NonNull<u8>> {
    unsafe { raw_alloc(size, true) }
}

/// Resizes an allocation obtained from this module, preserving contents up
/// to the smaller of the old and new sizes. Aborts through the OOM handler
/// on failure.
///
/// # Safety
/// `ptr` must have come from [`alloc`]/[`alloc_zeroed`]/[`realloc`] and not
/// yet been freed.
pub unsafe fn realloc(ptr: NonNull<u8>, size: usize) -> NonNull<u8> {
    try_realloc(ptr, size).unwrap_or_else(|| oom(size))
}

/// Fallible [`realloc`]. On failure the original allocation is untouched.
///
/// # Safety
/// As [`realloc`].
pub unsafe fn try_realloc(ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    let base = ptr.as_ptr().sub(PREFIX);
    let old_size = (base as *const usize).read();
    let old_layout = prefixed_layout(old_size).unwrap();
    let new_total = size.checked_add(PREFIX)?;
    let new_base = NonNull::new(std::alloc::realloc(base, old_layout, new_total))?;
    (new_base.as_ptr() as *mut usize).write(size);
    update_used(size as isize - old_size as isize);
    Some(NonNull::new_unchecked(new_base.as_ptr().add(PREFIX)))
}

/// Releases an allocation obtained from this module.
///
/// # Safety
/// `ptr` must have come from [`alloc`]/[`alloc_zeroed`]/[`realloc`] and not
/// yet been freed.
pub unsafe fn free(ptr: NonNull<u8>) {
    let base = ptr.as_ptr().sub(PREFIX);
    let size = (base as *const usize).read();
    update_used(-((PREFIX + size) as isize));
    std::alloc::dealloc(base, prefixed_layout(size).unwrap());
}

/// Returns the requested size recorded for a live raw-API allocation.
///
/// # Safety
/// As [`free`].
pub unsafe fn usable_size(ptr: NonNull<u8>) -> usize {
    (ptr.as_ptr().sub(PREFIX) as *const usize).read()
}

// ── Global-allocator wrapper ──────────────────────────────────────────────────

/// A [`GlobalAlloc`] wrapper that feeds the same used-memory counter as the
/// raw API. Deploy with:
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: kvcore::alloc::TrackingAllocator = TrackingAllocator::system();
/// ```
pub struct TrackingAllocator<A: GlobalAlloc = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    /// Wraps the system allocator.
    pub const fn system() -> Self {
        TrackingAllocator { inner: System }
    }
}

impl<A: GlobalAlloc> TrackingAllocator<A> {
    /// Wraps an arbitrary backend.
    pub const fn new(inner: A) -> Self {
        TrackingAllocator { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let p = self.inner.alloc(layout);
        if !p.is_null() {
            update_used(layout.size() as isize);
        }
        p
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = self.inner.alloc_zeroed(layout);
        if !p.is_null() {
            update_used(layout.size() as isize);
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        update_used(-(layout.size() as isize));
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let p = self.inner.realloc(ptr, layout, new_size);
        if !p.is_null() {
            update_used(new_size as isize - layout.size() as isize);
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The used-bytes counter is process-wide; tests asserting exact counter
    // values must not interleave.
    static COUNTER_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn alloc_free_round_trips_counter() {
        let _g = COUNTER_LOCK.lock().unwrap();
        let before = used_memory();
        let p = alloc(100);
        assert!(used_memory() >= before + 100 + PREFIX);
        unsafe { free(p) };
        assert_eq!(used_memory(), before);
    }

    #[test]
    fn usable_size_reports_requested_size() {
        let p = alloc(37);
        assert_eq!(unsafe { usable_size(p) }, 37);
        unsafe { free(p) };
    }

    #[test]
    fn alloc_zeroed_yields_zeroes() {
        let p = alloc_zeroed(64);
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { free(p) };
    }

    #[test]
    fn realloc_preserves_contents_and_counter() {
        let _g = COUNTER_LOCK.lock().unwrap();
        let before = used_memory();
        let p = alloc(8);
        unsafe {
            std::ptr::copy_nonoverlapping(b"abcdefgh".as_ptr(), p.as_ptr(), 8);
            let q = realloc(p, 1024);
            assert_eq!(usable_size(q), 1024);
            assert_eq!(std::slice::from_raw_parts(q.as_ptr(), 8), b"abcdefgh");
            free(q);
        }
        assert_eq!(used_memory(), before);
    }

    #[test]
    fn try_alloc_rejects_overflowing_size() {
        assert!(try_alloc(usize::MAX).is_none());
        assert!(try_alloc(usize::MAX - PREFIX + 1).is_none());
    }

    #[test]
    fn zero_size_allocation_is_valid() {
        let p = alloc(0);
        assert_eq!(unsafe { usable_size(p) }, 0);
        unsafe { free(p) };
    }

    #[test]
    fn tracking_allocator_counts_layout_bytes() {
        let _g = COUNTER_LOCK.lock().unwrap();
        let a = TrackingAllocator::system();
        let layout = Layout::from_size_align(256, 8).unwrap();
        let before = used_memory();
        unsafe {
            let p = a.alloc(layout);
            assert!(!p.is_null());
            assert_eq!(used_memory(), before + 256);
            a.dealloc(p, layout);
        }
        assert_eq!(used_memory(), before);
    }
}
