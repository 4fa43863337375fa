//! `epoll(7)` backend (Linux).
//!
//! epoll already reports a fd's readable and writable readiness in one
//! `epoll_event`, so no merging pass is needed here. Error and hang-up
//! conditions are widened to readable|writable per the trait contract.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::{timeout_ms, Fired, SystemPoller};
use crate::event::mask;

pub(crate) struct Epoll {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

fn blank_event() -> libc::epoll_event {
    libc::epoll_event { events: 0, u64: 0 }
}

impl Epoll {
    fn interest_bits(m: u32) -> u32 {
        let mut ev = 0;
        if m & mask::READABLE != 0 {
            ev |= libc::EPOLLIN as u32;
        }
        if m & mask::WRITABLE != 0 {
            ev |= libc::EPOLLOUT as u32;
        }
        ev
    }

    fn ctl(&mut self, op: libc::c_int, fd: RawFd, interest: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl SystemPoller for Epoll {
    fn new(capacity: usize) -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoll {
            epfd,
            events: vec![blank_event(); capacity.max(1)],
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        self.events.resize(capacity.max(1), blank_event());
        Ok(())
    }

    fn add(&mut self, fd: RawFd, old: u32, added: u32) -> io::Result<()> {
        let op = if old == mask::NONE {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        self.ctl(op, fd, Self::interest_bits(old | added))
    }

    fn del(&mut self, fd: RawFd, _removed: u32, remaining: u32) -> io::Result<()> {
        let res = if remaining & (mask::READABLE | mask::WRITABLE) == mask::NONE {
            self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
        } else {
            self.ctl(libc::EPOLL_CTL_MOD, fd, Self::interest_bits(remaining))
        };
        match res {
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => Ok(()),
            other => other,
        }
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Fired>) -> io::Result<usize> {
        out.clear();
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms(timeout),
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
            let mut m = mask::NONE;
            if e.events & libc::EPOLLIN as u32 != 0 {
                m |= mask::READABLE;
            }
            if e.events & libc::EPOLLOUT as u32 != 0 {
                m |= mask::WRITABLE;
            }
            if e.events & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0 {
                m |= mask::READABLE | mask::WRITABLE;
            }
            out.push(Fired {
                fd: e.u64 as RawFd,
                mask: m,
            });
        }
        Ok(n as usize)
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
