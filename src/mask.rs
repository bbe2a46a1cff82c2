//! Signal masking discipline for state shared with signal handlers.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};

use crate::job::JobTable;

/// Blocks every signal while alive and restores the previous mask on drop.
pub struct SignalMask {
    previous: SigSet,
}

impl SignalMask {
    pub fn block_all() -> Self {
        let mut previous = SigSet::empty();
        // Only fails on an invalid `how`, which cannot happen here.
        let _ = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), Some(&mut previous));
        Self { previous }
    }

    /// Atomically reinstates the previous mask and sleeps until a signal
    /// handler has run, then blocks everything again.
    pub fn suspend(&self) {
        // EINTR is the wakeup and maps to Ok; nothing else can fail here.
        let _ = self.previous.suspend();
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// The job table shared between the main loop and the signal handlers.
///
/// Access goes only through [`SharedJobs::lock`], which blocks all signals for
/// as long as the guard lives. The shell is single threaded, so with signals
/// blocked no handler can observe the table mid-update and the guard is the
/// only live reference.
pub struct SharedJobs {
    table: UnsafeCell<JobTable>,
    held: AtomicBool,
}

// SAFETY: the shell runs one thread; handlers are serialised against it by
// the signal mask taken in `lock`.
unsafe impl Sync for SharedJobs {}

impl SharedJobs {
    pub fn new(table: JobTable) -> Self {
        Self {
            table: UnsafeCell::new(table),
            held: AtomicBool::new(false),
        }
    }

    /// Blocks all signals and hands out the table.
    ///
    /// Must not be nested: take the guard, do the read-modify-write, drop it.
    pub fn lock(&self) -> JobsGuard<'_> {
        let mask = SignalMask::block_all();
        if self.held.swap(true, Ordering::Acquire) {
            sio_eprintln!("job table locked twice");
            // SAFETY: abort is async-signal-safe and never returns.
            unsafe { libc::abort() }
        }
        JobsGuard {
            // SAFETY: signals are blocked and `held` was clear, so this is the
            // only reference until the guard drops.
            table: unsafe { &mut *self.table.get() },
            owner: self,
            _mask: mask,
        }
    }
}

pub struct JobsGuard<'a> {
    table: &'a mut JobTable,
    owner: &'a SharedJobs,
    _mask: SignalMask,
}

impl Deref for JobsGuard<'_> {
    type Target = JobTable;

    fn deref(&self) -> &JobTable {
        self.table
    }
}

impl DerefMut for JobsGuard<'_> {
    fn deref_mut(&mut self) -> &mut JobTable {
        self.table
    }
}

impl Drop for JobsGuard<'_> {
    // Runs before `_mask` is dropped, so the flag clears while signals are
    // still blocked.
    fn drop(&mut self) {
        self.owner.held.store(false, Ordering::Release);
    }
}
