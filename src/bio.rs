//! Background job workers.
//!
//! Three dedicated threads take blocking or expensive work off the event
//! loop: closing file descriptors, fsyncing append-only files, and freeing
//! large object graphs. Each job kind owns one FIFO queue and one worker,
//! so jobs of a kind complete in submission order while kinds never block
//! each other.
//!
//! Submission is a channel send plus a pending-counter bump; the counter
//! and its condition variable let the main thread ask how much of a kind is
//! outstanding ([`Bio::pending_of`]) or block until the count moves
//! ([`Bio::wait_one_step`]). Workers never touch dictionary or event-loop
//! state; the queues are the only communication.

use std::os::fd::{BorrowedFd, RawFd};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use nix::errno::Errno;

/// The job families the pool accepts, one worker each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    CloseFile = 0,
    AofFsync = 1,
    LazyFree = 2,
}

impl JobKind {
    const ALL: [JobKind; 3] = [JobKind::CloseFile, JobKind::AofFsync, JobKind::LazyFree];

    fn tag(self) -> &'static str {
        match self {
            JobKind::CloseFile => "close",
            JobKind::AofFsync => "fsync",
            JobKind::LazyFree => "lazyfree",
        }
    }
}

enum Job {
    CloseFile(RawFd),
    AofFsync(RawFd),
    LazyFree(Box<dyn FnOnce() + Send>),
}

type PendingState = Arc<(Mutex<u64>, Condvar)>;

struct Lane {
    tx: Sender<Job>,
    state: PendingState,
}

/// Handle to the worker pool. Dropping it lets the workers drain their
/// queues, then joins them.
pub struct Bio {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl Bio {
    /// Spawns the three workers.
    pub fn new() -> Bio {
        let mut lanes = Vec::with_capacity(JobKind::ALL.len());
        let mut workers = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            let (tx, rx) = unbounded();
            let state: PendingState = Arc::new((Mutex::new(0), Condvar::new()));
            let worker_state = state.clone();
            let handle = std::thread::Builder::new()
                .name(format!("bio-{}", kind.tag()))
                .spawn(move || worker_loop(kind, rx, worker_state))
                .expect("failed to spawn background worker");
            lanes.push(Lane { tx, state });
            workers.push(handle);
        }
        Bio { lanes, workers }
    }

    fn submit(&self, kind: JobKind, job: Job) {
        let lane = &self.lanes[kind as usize];
        // Bump before sending so a pending_of racing the worker can never
        // observe zero while the job sits in the queue.
        {
            let (lock, _) = &*lane.state;
            *lock.lock().unwrap() += 1;
        }
        lane.tx.send(job).expect("background worker queue closed");
    }

    /// Queues a `close(2)` of `fd`. Ownership of the descriptor passes to
    /// the pool.
    pub fn submit_close(&self, fd: RawFd) {
        self.submit(JobKind::CloseFile, Job::CloseFile(fd));
    }

    /// Queues an `fsync(2)` of `fd`. The descriptor must stay open until
    /// the job completes.
    pub fn submit_fsync(&self, fd: RawFd) {
        self.submit(JobKind::AofFsync, Job::AofFsync(fd));
    }

    /// Queues a deallocation closure, typically the teardown of a large
    /// value taken out of a dictionary.
    pub fn submit_lazy_free(&self, free: impl FnOnce() + Send + 'static) {
        self.submit(JobKind::LazyFree, Job::LazyFree(Box::new(free)));
    }

    /// Jobs of `kind` submitted but not yet completed.
    pub fn pending_of(&self, kind: JobKind) -> u64 {
        *self.lanes[kind as usize].state.0.lock().unwrap()
    }

    /// Blocks until the pending count of `kind` changes, unless it is
    /// already zero. Returns the count observed on wakeup; loop until zero
    /// to wait a queue out.
    pub fn wait_one_step(&self, kind: JobKind) -> u64 {
        let (lock, done) = &*self.lanes[kind as usize].state;
        let mut n = lock.lock().unwrap();
        if *n != 0 {
            n = done.wait(n).unwrap();
        }
        *n
    }

    /// Winds the pool down: queued jobs still run, then the workers exit
    /// and are joined. Equivalent to dropping the handle.
    pub fn shutdown(self) {}
}

impl Default for Bio {
    fn default() -> Self {
        Bio::new()
    }
}

impl Drop for Bio {
    fn drop(&mut self) {
        // Closing the channels is the shutdown signal; each worker drains
        // what is queued and returns.
        self.lanes.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(kind: JobKind, rx: Receiver<Job>, state: PendingState) {
    debug!("background worker bio-{} running", kind.tag());
    while let Ok(job) = rx.recv() {
        match job {
            Job::CloseFile(fd) => {
                let _ = nix::unistd::close(fd);
            }
            Job::AofFsync(fd) => {
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                match nix::unistd::fsync(borrowed) {
                    Ok(()) => {}
                    // The fd was closed and possibly reused, or does not
                    // support fsync; both happen under fd churn.
                    Err(Errno::EBADF) | Err(Errno::EINVAL) => {}
                    Err(e) => warn!("background fsync({fd}) failed: {e}"),
                }
            }
            Job::LazyFree(free) => free(),
        }
        let (lock, done) = &*state;
        let mut n = lock.lock().unwrap();
        *n -= 1;
        done.notify_all();
    }
    debug!("background worker bio-{} exiting", kind.tag());
}
