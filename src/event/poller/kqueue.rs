//! `kqueue(2)` backend (macOS and the BSDs).
//!
//! kqueue models readable and writable interest as two separate filters and
//! reports them as separate kevents, so a fd ready both ways would fire
//! twice per poll. A per-fd scratch mask accumulates filters first; the
//! output then carries one merged entry per fd, as the trait requires.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

use super::{Fired, SystemPoller};
use crate::event::mask;

pub(crate) struct Kqueue {
    kqfd: RawFd,
    events: Vec<libc::kevent>,
    /// Per-fd readiness accumulated while draining one poll's kevents.
    merge: Vec<u8>,
    touched: Vec<RawFd>,
}

impl Kqueue {
    fn change(&mut self, fd: RawFd, filter: libc::c_int, flags: u32) -> io::Result<()> {
        let mut kev: libc::kevent = unsafe { mem::zeroed() };
        kev.ident = fd as libc::uintptr_t;
        kev.filter = filter as _;
        kev.flags = flags as _;
        let rc = unsafe { libc::kevent(self.kqfd, &kev, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl SystemPoller for Kqueue {
    fn new(capacity: usize) -> io::Result<Self> {
        let kqfd = unsafe { libc::kqueue() };
        if kqfd == -1 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::fcntl(kqfd, libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Kqueue {
            kqfd,
            events: vec![unsafe { mem::zeroed() }; capacity.max(1)],
            merge: vec![0; capacity],
            touched: Vec::new(),
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        self.events.resize(capacity.max(1), unsafe { mem::zeroed() });
        self.merge.resize(capacity, 0);
        Ok(())
    }

    fn add(&mut self, fd: RawFd, _old: u32, added: u32) -> io::Result<()> {
        if added & mask::READABLE != 0 {
            self.change(fd, libc::EVFILT_READ as libc::c_int, libc::EV_ADD as u32)?;
        }
        if added & mask::WRITABLE != 0 {
            self.change(fd, libc::EVFILT_WRITE as libc::c_int, libc::EV_ADD as u32)?;
        }
        Ok(())
    }

    fn del(&mut self, fd: RawFd, removed: u32, _remaining: u32) -> io::Result<()> {
        for (bit, filter) in [
            (mask::READABLE, libc::EVFILT_READ as libc::c_int),
            (mask::WRITABLE, libc::EVFILT_WRITE as libc::c_int),
        ] {
            if removed & bit != 0 {
                match self.change(fd, filter, libc::EV_DELETE as u32) {
                    Err(e)
                        if matches!(
                            e.raw_os_error(),
                            Some(libc::ENOENT) | Some(libc::EBADF)
                        ) => {}
                    Err(e) => return Err(e),
                    Ok(()) => {}
                }
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Fired>) -> io::Result<usize> {
        out.clear();
        let ts_storage;
        let ts_ptr = match timeout {
            Some(d) => {
                ts_storage = libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as _,
                };
                &ts_storage as *const libc::timespec
            }
            None => ptr::null(),
        };
        let n = unsafe {
            libc::kevent(
                self.kqfd,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as _,
                ts_ptr,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            return if err.raw_os_error() == Some(libc::EINTR) {
                Ok(0)
            } else {
                Err(err)
            };
        }

        for e in &self.events[..n as usize] {
            let fd = e.ident as RawFd;
            let bit = if e.filter == libc::EVFILT_READ as _ {
                mask::READABLE
            } else if e.filter == libc::EVFILT_WRITE as _ {
                mask::WRITABLE
            } else {
                continue;
            };
            let idx = fd as usize;
            if idx >= self.merge.len() {
                continue;
            }
            if self.merge[idx] == 0 {
                self.touched.push(fd);
            }
            self.merge[idx] |= bit as u8;
        }
        for &fd in &self.touched {
            out.push(Fired {
                fd,
                mask: self.merge[fd as usize] as u32,
            });
            self.merge[fd as usize] = 0;
        }
        let fired = self.touched.len();
        self.touched.clear();
        Ok(fired)
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe { libc::close(self.kqfd) };
    }
}
