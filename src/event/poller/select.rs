//! `select(2)` fallback backend.
//!
//! Portable to any POSIX target at the cost of an `FD_SETSIZE` capacity
//! ceiling and a linear sweep of descriptors per poll. Interest is kept in
//! master fd sets that are copied before each wait, since `select`
//! overwrites its arguments.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

use super::{Fired, SystemPoller};
use crate::event::mask;

pub(crate) struct Select {
    rfds: libc::fd_set,
    wfds: libc::fd_set,
    /// Registered interest per fd; drives the post-wait sweep.
    interest: Vec<u32>,
}

fn empty_set() -> libc::fd_set {
    let mut set: libc::fd_set = unsafe { mem::zeroed() };
    unsafe { libc::FD_ZERO(&mut set) };
    set
}

fn check_capacity(capacity: usize) -> io::Result<()> {
    if capacity > libc::FD_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "select backend caps capacity at FD_SETSIZE ({})",
                libc::FD_SETSIZE
            ),
        ));
    }
    Ok(())
}

impl SystemPoller for Select {
    fn new(capacity: usize) -> io::Result<Self> {
        check_capacity(capacity)?;
        Ok(Select {
            rfds: empty_set(),
            wfds: empty_set(),
            interest: vec![mask::NONE; capacity],
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        check_capacity(capacity)?;
        self.interest.resize(capacity, mask::NONE);
        Ok(())
    }

    fn add(&mut self, fd: RawFd, old: u32, added: u32) -> io::Result<()> {
        if added & mask::READABLE != 0 {
            unsafe { libc::FD_SET(fd, &mut self.rfds) };
        }
        if added & mask::WRITABLE != 0 {
            unsafe { libc::FD_SET(fd, &mut self.wfds) };
        }
        if let Some(slot) = self.interest.get_mut(fd as usize) {
            *slot = old | added;
        }
        Ok(())
    }

    fn del(&mut self, fd: RawFd, removed: u32, remaining: u32) -> io::Result<()> {
        if removed & mask::READABLE != 0 {
            unsafe { libc::FD_CLR(fd, &mut self.rfds) };
        }
        if removed & mask::WRITABLE != 0 {
            unsafe { libc::FD_CLR(fd, &mut self.wfds) };
        }
        if let Some(slot) = self.interest.get_mut(fd as usize) {
            *slot = remaining;
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Fired>) -> io::Result<usize> {
        out.clear();
        let mut rfds = self.rfds;
        let mut wfds = self.wfds;
        let maxfd = self
            .interest
            .iter()
            .rposition(|&m| m != mask::NONE)
            .map(|i| i as libc::c_int)
            .unwrap_or(-1);

        let mut tv_storage;
        let tv_ptr = match timeout {
            Some(d) => {
                tv_storage = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv_storage as *mut libc::timeval
            }
            None => ptr::null_mut(),
        };

        let n = unsafe {
            libc::select(maxfd + 1, &mut rfds, &mut wfds, ptr::null_mut(), tv_ptr)
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            return if err.raw_os_error() == Some(libc::EINTR) {
                Ok(0)
            } else {
                Err(err)
            };
        }
        if n > 0 {
            for fd in 0..=maxfd {
                let registered = self.interest[fd as usize];
                if registered == mask::NONE {
                    continue;
                }
                let mut m = mask::NONE;
                if registered & mask::READABLE != 0 && unsafe { libc::FD_ISSET(fd, &rfds) } {
                    m |= mask::READABLE;
                }
                if registered & mask::WRITABLE != 0 && unsafe { libc::FD_ISSET(fd, &wfds) } {
                    m |= mask::WRITABLE;
                }
                if m != mask::NONE {
                    out.push(Fired { fd, mask: m });
                }
            }
        }
        Ok(out.len())
    }

    fn name(&self) -> &'static str {
        "select"
    }
}
