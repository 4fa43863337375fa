//! Single-threaded event loop.
//!
//! Multiplexes kernel readiness notifications over a timer list, firing file
//! handlers and due time handlers from one thread per iteration. The only
//! blocking point is the readiness wait, whose timeout is bounded by the
//! earliest due timer.
//!
//! - File events live in an array indexed directly by fd, each slot holding
//!   an interest mask and up to two handlers (readable / writable).
//! - Per fd and iteration, the readable handler runs before the writable
//!   one; [`mask::BARRIER`] inverts that once, which matters to callers that
//!   must flush state to disk in a before-sleep hook and only then answer.
//! - Time events sit in an unordered list scanned linearly; deletion tags a
//!   tombstone and physical removal happens on the next timer pass. The
//!   list is expected to stay small, a heap would be overkill.
//!
//! Handlers are plain closures invoked with the loop borrowed mutably, so a
//! handler can register, unregister, and resize freely; the loop re-reads
//! the fd slot between the two callbacks of one fd.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::clock;

pub(crate) mod poller;

use poller::{Backend, Fired, SystemPoller};

/// Interest and readiness bits for file events.
pub mod mask {
    pub const NONE: u32 = 0;
    pub const READABLE: u32 = 1;
    pub const WRITABLE: u32 = 2;
    /// Fire the writable handler before the readable one for this fd.
    pub const BARRIER: u32 = 4;
}

/// Flags steering one call to [`EventLoop::process_events`].
pub mod flags {
    pub const FILE_EVENTS: u32 = 1;
    pub const TIME_EVENTS: u32 = 2;
    pub const ALL_EVENTS: u32 = FILE_EVENTS | TIME_EVENTS;
    pub const DONT_WAIT: u32 = 4;
    pub const CALL_BEFORE_SLEEP: u32 = 8;
    pub const CALL_AFTER_SLEEP: u32 = 16;
}

/// Id a deleted time event carries until it is physically removed.
const TOMBSTONE_ID: u64 = u64::MAX;

/// Errors surfaced by event-loop operations.
#[derive(Debug, Error)]
pub enum EventError {
    /// The fd does not fit the configured capacity.
    #[error("fd {0} outside the configured capacity")]
    FdOutOfRange(RawFd),
    /// No live time event carries the given id.
    #[error("no time event with id {0}")]
    NoSuchTimer(u64),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What a time handler wants next: run again after a delay, or be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerNext {
    Again(Duration),
    Stop,
}

pub type FileHandler = Rc<dyn Fn(&mut EventLoop, RawFd, u32)>;
pub type TimeHandler = Rc<dyn Fn(&mut EventLoop, u64) -> TimerNext>;
pub type TimerFinalizer = Rc<dyn Fn(&mut EventLoop)>;
pub type SleepHook = Rc<dyn Fn(&mut EventLoop)>;

#[derive(Clone, Default)]
struct FileEvent {
    mask: u32,
    rfile: Option<FileHandler>,
    wfile: Option<FileHandler>,
}

struct TimeEvent {
    id: u64,
    due_us: u64,
    handler: TimeHandler,
    finalizer: Option<TimerFinalizer>,
}

pub struct EventLoop {
    events: Vec<FileEvent>,
    fired: Vec<Fired>,
    timers: Vec<TimeEvent>,
    next_timer_id: u64,
    /// Largest fd with a non-empty interest mask, or −1.
    highest_fd: RawFd,
    stop: bool,
    dont_wait: bool,
    poller: Backend,
    before_sleep: Option<SleepHook>,
    after_sleep: Option<SleepHook>,
}

fn same_handler(a: Option<&FileHandler>, b: Option<&FileHandler>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

impl EventLoop {
    /// Creates a loop able to track fds `0..setsize`.
    pub fn with_capacity(setsize: usize) -> Result<EventLoop, EventError> {
        let poller = Backend::new(setsize)?;
        debug!(
            "event loop created: backend={}, setsize={}",
            poller.name(),
            setsize
        );
        Ok(EventLoop {
            events: vec![FileEvent::default(); setsize],
            fired: Vec::with_capacity(setsize),
            timers: Vec::new(),
            next_timer_id: 0,
            highest_fd: -1,
            stop: false,
            dont_wait: false,
            poller,
            before_sleep: None,
            after_sleep: None,
        })
    }

    /// Number of fd slots.
    pub fn setsize(&self) -> usize {
        self.events.len()
    }

    /// Largest registered fd, or −1 when nothing is registered.
    pub fn highest_registered_fd(&self) -> RawFd {
        self.highest_fd
    }

    /// Name of the compiled-in readiness backend.
    pub fn backend_name(&self) -> &'static str {
        self.poller.name()
    }

    /// Re-dimensions the fd table. Fails if the currently highest registered
    /// fd would no longer fit; fresh slots start with no interest.
    pub fn resize_setsize(&mut self, setsize: usize) -> Result<(), EventError> {
        if self.highest_fd as i64 >= setsize as i64 {
            return Err(EventError::FdOutOfRange(self.highest_fd));
        }
        self.poller.resize(setsize)?;
        self.events.resize(setsize, FileEvent::default());
        debug!("event loop setsize now {setsize}");
        Ok(())
    }

    /// Makes [`run`](Self::run) return after the current iteration.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// When set, every readiness wait uses a zero timeout regardless of the
    /// per-call flags.
    pub fn set_dont_wait(&mut self, dont_wait: bool) {
        self.dont_wait = dont_wait;
    }

    pub fn set_before_sleep(&mut self, hook: Option<SleepHook>) {
        self.before_sleep = hook;
    }

    pub fn set_after_sleep(&mut self, hook: Option<SleepHook>) {
        self.after_sleep = hook;
    }

    // ── File events ───────────────────────────────────────────────────────────

    /// Registers `handler` for the interest bits in `bits` on `fd`, merging
    /// with any existing registration. A handler registered for both
    /// readable and writable serves both sides.
    pub fn register(
        &mut self,
        fd: RawFd,
        bits: u32,
        handler: FileHandler,
    ) -> Result<(), EventError> {
        if fd < 0 || fd as usize >= self.events.len() {
            return Err(EventError::FdOutOfRange(fd));
        }
        let old = self.events[fd as usize].mask;
        self.poller.add(fd, old, bits)?;

        let fe = &mut self.events[fd as usize];
        fe.mask |= bits;
        if bits & mask::READABLE != 0 {
            fe.rfile = Some(handler.clone());
        }
        if bits & mask::WRITABLE != 0 {
            fe.wfile = Some(handler);
        }
        if fd > self.highest_fd {
            self.highest_fd = fd;
        }
        Ok(())
    }

    /// Revokes the interest bits in `bits` on `fd`. Unknown fds and
    /// already-clear bits are tolerated. Dropping writable interest also
    /// drops the barrier: a later readable-only registration must not
    /// inherit inverted dispatch.
    pub fn unregister(&mut self, fd: RawFd, bits: u32) {
        if fd < 0 || fd as usize >= self.events.len() {
            return;
        }
        if self.events[fd as usize].mask == mask::NONE {
            return;
        }
        let mut bits = bits;
        if bits & mask::WRITABLE != 0 {
            bits |= mask::BARRIER;
        }
        let remaining = self.events[fd as usize].mask & !bits;
        if let Err(e) = self
            .poller
            .del(fd, bits & (mask::READABLE | mask::WRITABLE), remaining)
        {
            debug!("poller del({fd}) failed: {e}");
        }

        let fe = &mut self.events[fd as usize];
        fe.mask = remaining;
        if remaining & mask::READABLE == 0 {
            fe.rfile = None;
        }
        if remaining & mask::WRITABLE == 0 {
            fe.wfile = None;
        }
        if fd == self.highest_fd && fe.mask == mask::NONE {
            let mut j = fd - 1;
            while j >= 0 && self.events[j as usize].mask == mask::NONE {
                j -= 1;
            }
            self.highest_fd = j;
        }
    }

    /// Interest mask currently registered for `fd`.
    pub fn registered_mask(&self, fd: RawFd) -> u32 {
        if fd < 0 || fd as usize >= self.events.len() {
            return mask::NONE;
        }
        self.events[fd as usize].mask
    }

    // ── Time events ───────────────────────────────────────────────────────────

    /// Schedules `handler` to run once `delay` has elapsed. The handler's
    /// return value reschedules or retires the event. Returns the event id.
    pub fn add_timer(&mut self, delay: Duration, handler: TimeHandler) -> u64 {
        self.add_timer_with_finalizer(delay, handler, None)
    }

    /// As [`add_timer`](Self::add_timer); `finalizer` runs when the event is
    /// physically removed or the loop is dropped.
    pub fn add_timer_with_finalizer(
        &mut self,
        delay: Duration,
        handler: TimeHandler,
        finalizer: Option<TimerFinalizer>,
    ) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(TimeEvent {
            id,
            due_us: clock::monotonic_us() + delay.as_micros() as u64,
            handler,
            finalizer,
        });
        id
    }

    /// Tags the time event for deletion; it stops firing immediately and is
    /// physically removed (running its finalizer) on the next timer pass.
    pub fn cancel_timer(&mut self, id: u64) -> Result<(), EventError> {
        for te in self.timers.iter_mut() {
            if te.id == id {
                te.id = TOMBSTONE_ID;
                return Ok(());
            }
        }
        Err(EventError::NoSuchTimer(id))
    }

    /// Microseconds until the earliest live timer is due (0 when one is due
    /// already), or `None` when no live timer exists.
    fn us_until_earliest(&self, now_us: u64) -> Option<u64> {
        self.timers
            .iter()
            .filter(|te| te.id != TOMBSTONE_ID)
            .map(|te| te.due_us)
            .min()
            .map(|due| due.saturating_sub(now_us))
    }

    fn process_time_events(&mut self, now_us: u64) -> usize {
        let mut processed = 0;
        // Events registered by handlers running in this very pass must wait
        // for the next one.
        let max_id = self.next_timer_id.wrapping_sub(1);

        let mut j = 0;
        while j < self.timers.len() {
            if self.timers[j].id == TOMBSTONE_ID {
                let mut te = self.timers.swap_remove(j);
                if let Some(fin) = te.finalizer.take() {
                    (*fin)(self);
                }
                continue;
            }
            if self.timers[j].id > max_id {
                j += 1;
                continue;
            }
            if self.timers[j].due_us <= now_us {
                let id = self.timers[j].id;
                let handler = self.timers[j].handler.clone();
                let next = (*handler)(self, id);
                processed += 1;
                // The handler may have reshuffled the list; find the event
                // again by id. A handler that cancelled itself wins over its
                // own return value.
                if let Some(pos) = self.timers.iter().position(|te| te.id == id) {
                    match next {
                        TimerNext::Again(delay) => {
                            self.timers[pos].due_us = now_us + delay.as_micros() as u64;
                        }
                        TimerNext::Stop => self.timers[pos].id = TOMBSTONE_ID,
                    }
                }
            }
            j += 1;
        }
        processed
    }

    // ── Processing ────────────────────────────────────────────────────────────

    /// Runs one iteration: waits for readiness no longer than the earliest
    /// timer allows, dispatches ready file events (readable before writable
    /// unless the slot carries [`mask::BARRIER`]), then runs due time
    /// events. Returns the number of events dispatched.
    pub fn process_events(&mut self, flags: u32) -> usize {
        let mut processed = 0;
        if flags & flags::ALL_EVENTS == 0 {
            return 0;
        }

        if self.highest_fd != -1
            || (flags & flags::TIME_EVENTS != 0 && flags & flags::DONT_WAIT == 0)
        {
            let mut us_until = None;
            if flags & flags::TIME_EVENTS != 0 && flags & flags::DONT_WAIT == 0 {
                us_until = self.us_until_earliest(clock::monotonic_us());
            }
            let mut timeout = match us_until {
                Some(us) => Some(Duration::from_micros(us)),
                // No timer bounds the wait: poll if asked not to block,
                // otherwise sleep until a file event arrives.
                None if flags & flags::DONT_WAIT != 0 => Some(Duration::ZERO),
                None => None,
            };
            if self.dont_wait {
                timeout = Some(Duration::ZERO);
            }

            if flags & flags::CALL_BEFORE_SLEEP != 0 {
                if let Some(hook) = self.before_sleep.clone() {
                    (*hook)(self);
                }
            }

            let fired_count = {
                let mut buf = mem::take(&mut self.fired);
                let res = self.poller.poll(timeout, &mut buf);
                self.fired = buf;
                match res {
                    Ok(n) => n,
                    Err(e) => panic!("readiness poll failed: {e}"),
                }
            };

            if flags & flags::CALL_AFTER_SLEEP != 0 {
                if let Some(hook) = self.after_sleep.clone() {
                    (*hook)(self);
                }
            }

            for i in 0..fired_count {
                if i >= self.fired.len() {
                    break;
                }
                let Fired { fd, mask: ready } = self.fired[i];
                let idx = fd as usize;
                if idx >= self.events.len() {
                    continue;
                }
                let registered = self.events[idx].mask;
                let invert = registered & mask::BARRIER != 0;
                let mut fired_here = 0;

                if !invert && registered & ready & mask::READABLE != 0 {
                    if let Some(h) = self.events[idx].rfile.clone() {
                        (*h)(self, fd, ready);
                        fired_here += 1;
                    }
                }

                // Re-read the slot: the handler above may have changed it.
                if idx < self.events.len() {
                    let current = self.events[idx].mask;
                    if current & ready & mask::WRITABLE != 0 {
                        let w = self.events[idx].wfile.clone();
                        let r = self.events[idx].rfile.clone();
                        if let Some(w) = w {
                            if fired_here == 0 || !same_handler(Some(&w), r.as_ref()) {
                                (*w)(self, fd, ready);
                                fired_here += 1;
                            }
                        }
                    }
                }

                if invert && idx < self.events.len() {
                    let current = self.events[idx].mask;
                    if current & ready & mask::READABLE != 0 {
                        let r = self.events[idx].rfile.clone();
                        let w = self.events[idx].wfile.clone();
                        if let Some(r) = r {
                            if fired_here == 0 || !same_handler(Some(&r), w.as_ref()) {
                                (*r)(self, fd, ready);
                            }
                        }
                    }
                }
                processed += 1;
            }
        }

        if flags & flags::TIME_EVENTS != 0 {
            processed += self.process_time_events(clock::monotonic_us());
        }
        processed
    }

    /// Processes events until [`stop`](Self::stop) is called.
    pub fn run(&mut self) {
        self.stop = false;
        while !self.stop {
            self.process_events(
                flags::ALL_EVENTS | flags::CALL_BEFORE_SLEEP | flags::CALL_AFTER_SLEEP,
            );
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let timers = mem::take(&mut self.timers);
        for mut te in timers {
            if let Some(fin) = te.finalizer.take() {
                (*fin)(self);
            }
        }
    }
}

/// One-off readiness wait for a single fd, independent of any loop.
/// Returns the readiness bits observed within `timeout` (empty on timeout);
/// error and hang-up conditions report as writable.
pub fn wait_for(fd: RawFd, bits: u32, timeout: Option<Duration>) -> io::Result<u32> {
    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    if bits & mask::READABLE != 0 {
        pfd.events |= libc::POLLIN;
    }
    if bits & mask::WRITABLE != 0 {
        pfd.events |= libc::POLLOUT;
    }
    let ms = match timeout {
        None => -1,
        Some(d) => d.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, ms) };
    if n == -1 {
        return Err(io::Error::last_os_error());
    }
    let mut got = mask::NONE;
    if n == 1 {
        if pfd.revents & libc::POLLIN != 0 {
            got |= mask::READABLE;
        }
        if pfd.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0 {
            got |= mask::WRITABLE;
        }
    }
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc =
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair: {}", io::Error::last_os_error());
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    fn write_byte(fd: RawFd) {
        let n = unsafe { libc::write(fd, b".".as_ptr().cast(), 1) };
        assert_eq!(n, 1);
    }

    fn push_log(log: &Rc<RefCell<String>>, c: char) -> FileHandler {
        let log = log.clone();
        Rc::new(move |_el: &mut EventLoop, _fd, _ready| log.borrow_mut().push(c))
    }

    #[test]
    fn readable_fires_before_writable_by_default() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let log = Rc::new(RefCell::new(String::new()));
        el.register(a, mask::READABLE, push_log(&log, 'R')).unwrap();
        el.register(a, mask::WRITABLE, push_log(&log, 'W')).unwrap();
        write_byte(b);

        el.process_events(flags::FILE_EVENTS);
        assert_eq!(*log.borrow(), "RW");

        el.unregister(a, mask::READABLE | mask::WRITABLE);
        close(a);
        close(b);
    }

    #[test]
    fn barrier_inverts_dispatch_to_writable_first() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let log = Rc::new(RefCell::new(String::new()));
        el.register(a, mask::READABLE, push_log(&log, 'R')).unwrap();
        el.register(a, mask::WRITABLE | mask::BARRIER, push_log(&log, 'W'))
            .unwrap();
        write_byte(b);

        el.process_events(flags::FILE_EVENTS);
        assert_eq!(*log.borrow(), "WR");

        el.unregister(a, mask::READABLE | mask::WRITABLE);
        close(a);
        close(b);
    }

    #[test]
    fn shared_handler_runs_once_per_fd_and_iteration() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let log = Rc::new(RefCell::new(String::new()));
        let h = push_log(&log, 'x');
        el.register(a, mask::READABLE | mask::WRITABLE, h).unwrap();
        write_byte(b);

        el.process_events(flags::FILE_EVENTS);
        assert_eq!(*log.borrow(), "x", "identical handler must not run twice");

        el.unregister(a, mask::READABLE | mask::WRITABLE);
        close(a);
        close(b);
    }

    #[test]
    fn register_beyond_setsize_is_a_range_error() {
        let mut el = EventLoop::with_capacity(32).unwrap();
        let h: FileHandler = Rc::new(|_el: &mut EventLoop, _fd, _m| {});
        let err = el.register(32, mask::READABLE, h).unwrap_err();
        assert!(matches!(err, EventError::FdOutOfRange(32)));
        assert_eq!(el.highest_registered_fd(), -1);
        assert_eq!(el.registered_mask(32), mask::NONE);
    }

    #[test]
    fn highest_fd_tracks_registrations_and_unregistrations() {
        let (a, b) = socketpair();
        let (c, d) = socketpair();
        let mut el = EventLoop::with_capacity(256).unwrap();
        let h: FileHandler = Rc::new(|_el: &mut EventLoop, _fd, _m| {});

        el.register(a, mask::READABLE, h.clone()).unwrap();
        el.register(c, mask::READABLE, h.clone()).unwrap();
        let hi = a.max(c);
        let lo = a.min(c);
        assert_eq!(el.highest_registered_fd(), hi);

        el.unregister(hi, mask::READABLE);
        assert_eq!(el.highest_registered_fd(), lo);
        el.unregister(lo, mask::READABLE);
        assert_eq!(el.highest_registered_fd(), -1);

        // A second unregister of the same bits changes nothing.
        el.unregister(lo, mask::READABLE);
        assert_eq!(el.highest_registered_fd(), -1);

        close(a);
        close(b);
        close(c);
        close(d);
    }

    #[test]
    fn unregistering_writable_also_clears_the_barrier() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let h: FileHandler = Rc::new(|_el: &mut EventLoop, _fd, _m| {});
        el.register(a, mask::READABLE | mask::WRITABLE | mask::BARRIER, h)
            .unwrap();
        el.unregister(a, mask::WRITABLE);
        assert_eq!(el.registered_mask(a), mask::READABLE);
        el.unregister(a, mask::READABLE);
        close(a);
        close(b);
    }

    #[test]
    fn resize_setsize_respects_the_highest_registered_fd() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(256).unwrap();
        let h: FileHandler = Rc::new(|_el: &mut EventLoop, _fd, _m| {});
        el.register(a, mask::READABLE, h).unwrap();

        assert!(el.resize_setsize(a as usize).is_err());
        el.resize_setsize(a as usize + 1).unwrap();
        assert_eq!(el.setsize(), a as usize + 1);
        assert_eq!(el.registered_mask(a), mask::READABLE);

        el.unregister(a, mask::READABLE);
        close(a);
        close(b);
    }

    #[test]
    fn idle_loop_with_dont_wait_returns_zero_immediately() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let started = std::time::Instant::now();
        let n = el.process_events(flags::ALL_EVENTS | flags::DONT_WAIT);
        assert_eq!(n, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn global_dont_wait_forces_zero_timeout() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let h: FileHandler = Rc::new(|_el: &mut EventLoop, _fd, _m| {});
        el.register(a, mask::READABLE, h).unwrap();
        el.set_dont_wait(true);

        // Nothing readable and no timers: without the flag this would block.
        let started = std::time::Instant::now();
        let n = el.process_events(flags::ALL_EVENTS);
        assert_eq!(n, 0);
        assert!(started.elapsed() < Duration::from_secs(1));

        el.unregister(a, mask::READABLE);
        close(a);
        close(b);
    }

    #[test]
    fn sleep_hooks_bracket_the_poll() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let log = Rc::new(RefCell::new(String::new()));
        el.register(a, mask::READABLE, push_log(&log, 'R')).unwrap();
        {
            let log = log.clone();
            el.set_before_sleep(Some(Rc::new(move |_el: &mut EventLoop| {
                log.borrow_mut().push('b')
            })));
        }
        {
            let log = log.clone();
            el.set_after_sleep(Some(Rc::new(move |_el: &mut EventLoop| {
                log.borrow_mut().push('a')
            })));
        }
        write_byte(b);
        el.process_events(
            flags::FILE_EVENTS
                | flags::DONT_WAIT
                | flags::CALL_BEFORE_SLEEP
                | flags::CALL_AFTER_SLEEP,
        );
        assert_eq!(*log.borrow(), "baR");

        el.unregister(a, mask::READABLE);
        close(a);
        close(b);
    }

    #[test]
    fn handler_may_unregister_its_own_fd() {
        let (a, b) = socketpair();
        let mut el = EventLoop::with_capacity(128).unwrap();
        let hits = Rc::new(RefCell::new(0));
        let h: FileHandler = {
            let hits = hits.clone();
            Rc::new(move |el: &mut EventLoop, fd, _ready| {
                *hits.borrow_mut() += 1;
                el.unregister(fd, mask::READABLE | mask::WRITABLE);
            })
        };
        el.register(a, mask::READABLE, h.clone()).unwrap();
        el.register(a, mask::WRITABLE, h).unwrap();
        write_byte(b);

        el.process_events(flags::FILE_EVENTS);
        // The writable callback saw a cleared slot and stayed quiet.
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(el.highest_registered_fd(), -1);

        close(a);
        close(b);
    }

    // ── Time events ───────────────────────────────────────────────────────────

    #[test]
    fn timer_reschedules_then_retires() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let fired = Rc::new(RefCell::new(0));
        let handler: TimeHandler = {
            let fired = fired.clone();
            Rc::new(move |_el: &mut EventLoop, _id| {
                *fired.borrow_mut() += 1;
                if *fired.borrow() == 1 {
                    TimerNext::Again(Duration::from_millis(20))
                } else {
                    TimerNext::Stop
                }
            })
        };
        let base = clock::monotonic_us();
        el.add_timer(Duration::from_millis(10), handler);

        // Not yet due.
        assert_eq!(el.process_time_events(base), 0);
        assert_eq!(*fired.borrow(), 0);

        // Past the first deadline: fires and reschedules 20ms out.
        let now = base + 1_000_000;
        assert_eq!(el.process_time_events(now), 1);
        assert_eq!(*fired.borrow(), 1);
        assert_eq!(el.timers.len(), 1);
        assert_eq!(el.us_until_earliest(now + 20_000), Some(0));

        // Past the second deadline: fires and retires.
        assert_eq!(el.process_time_events(now + 30_000), 1);
        assert_eq!(*fired.borrow(), 2);
        assert_eq!(el.us_until_earliest(now + 30_000), None);

        // Next pass removes the tombstone physically.
        el.process_time_events(now + 30_000);
        assert!(el.timers.is_empty());
    }

    #[test]
    fn cancel_twice_reports_ok_then_err() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let id = el.add_timer(
            Duration::from_millis(50),
            Rc::new(|_el: &mut EventLoop, _id| TimerNext::Stop),
        );
        assert!(el.cancel_timer(id).is_ok());
        assert!(matches!(
            el.cancel_timer(id),
            Err(EventError::NoSuchTimer(_))
        ));
    }

    #[test]
    fn cancelled_timer_never_fires_and_finalizer_runs() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let fired = Rc::new(RefCell::new(0));
        let finalized = Rc::new(RefCell::new(0));
        let id = {
            let fired = fired.clone();
            let finalized = finalized.clone();
            el.add_timer_with_finalizer(
                Duration::from_millis(1),
                Rc::new(move |_el: &mut EventLoop, _id| {
                    *fired.borrow_mut() += 1;
                    TimerNext::Stop
                }),
                Some(Rc::new(move |_el: &mut EventLoop| {
                    *finalized.borrow_mut() += 1
                })),
            )
        };
        el.cancel_timer(id).unwrap();
        el.process_time_events(clock::monotonic_us() + 1_000_000);
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(*finalized.borrow(), 1);
        assert!(el.timers.is_empty());
    }

    #[test]
    fn timers_created_by_a_handler_wait_for_the_next_pass() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let child_fired = Rc::new(RefCell::new(0));
        let parent: TimeHandler = {
            let child_fired = child_fired.clone();
            Rc::new(move |el: &mut EventLoop, _id| {
                let child_fired = child_fired.clone();
                el.add_timer(
                    Duration::ZERO,
                    Rc::new(move |_el: &mut EventLoop, _id| {
                        *child_fired.borrow_mut() += 1;
                        TimerNext::Stop
                    }),
                );
                TimerNext::Stop
            })
        };
        el.add_timer(Duration::ZERO, parent);

        let now = clock::monotonic_us() + 1_000_000;
        assert_eq!(el.process_time_events(now), 1, "only the parent runs");
        assert_eq!(*child_fired.borrow(), 0);
        assert_eq!(el.process_time_events(now), 1, "child runs next pass");
        assert_eq!(*child_fired.borrow(), 1);
    }

    #[test]
    fn us_until_earliest_reflects_live_timers_only() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        let now = clock::monotonic_us();
        assert_eq!(el.us_until_earliest(now), None);
        let id = el.add_timer(
            Duration::from_millis(100),
            Rc::new(|_el: &mut EventLoop, _id| TimerNext::Stop),
        );
        let until = el.us_until_earliest(now).unwrap();
        assert!(until > 0 && until <= 200_000, "got {until}");
        el.cancel_timer(id).unwrap();
        assert_eq!(el.us_until_earliest(now), None);
    }

    #[test]
    fn drop_runs_outstanding_finalizers() {
        let finalized = Rc::new(RefCell::new(0));
        {
            let mut el = EventLoop::with_capacity(16).unwrap();
            let finalized = finalized.clone();
            el.add_timer_with_finalizer(
                Duration::from_secs(60),
                Rc::new(|_el: &mut EventLoop, _id| TimerNext::Stop),
                Some(Rc::new(move |_el: &mut EventLoop| {
                    *finalized.borrow_mut() += 1
                })),
            );
        }
        assert_eq!(*finalized.borrow(), 1);
    }

    #[test]
    fn run_terminates_when_a_timer_stops_the_loop() {
        let mut el = EventLoop::with_capacity(16).unwrap();
        el.add_timer(
            Duration::from_millis(5),
            Rc::new(|el: &mut EventLoop, _id| {
                el.stop();
                TimerNext::Stop
            }),
        );
        el.run();
    }

    #[test]
    fn wait_for_sees_single_fd_readiness() {
        let (a, b) = socketpair();
        let got = wait_for(a, mask::WRITABLE, Some(Duration::from_millis(100))).unwrap();
        assert_ne!(got & mask::WRITABLE, 0);
        let got = wait_for(a, mask::READABLE, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(got & mask::READABLE, 0);
        write_byte(b);
        let got = wait_for(a, mask::READABLE, Some(Duration::from_millis(100))).unwrap();
        assert_ne!(got & mask::READABLE, 0);
        close(a);
        close(b);
    }
}
