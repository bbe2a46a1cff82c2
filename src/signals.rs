//! Asynchronous handlers for SIGCHLD, SIGTSTP, SIGINT and SIGQUIT.
//!
//! Handlers reach the job table through a pointer published by [`install`].
//! They save and restore `errno`, allocate nothing, and only touch the table
//! while holding [`SharedJobs::lock`].

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::job::JobState;
use crate::mask::SharedJobs;

static JOBS: AtomicPtr<SharedJobs> = AtomicPtr::new(ptr::null_mut());
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Serialises tests that fork, since `reap` collects any child of the process.
#[cfg(test)]
pub(crate) static FORKING_TESTS: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Enables handler-side diagnostics for status changes nobody is tracking.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

/// Publishes the job table to the handlers and installs them.
pub fn install(jobs: &'static SharedJobs) -> nix::Result<()> {
    JOBS.store(ptr::from_ref(jobs).cast_mut(), Ordering::Release);

    set_handler(Signal::SIGINT, SigHandler::Handler(on_interrupt))?;
    set_handler(Signal::SIGTSTP, SigHandler::Handler(on_stop))?;
    set_handler(Signal::SIGCHLD, SigHandler::Handler(on_child))?;
    set_handler(Signal::SIGQUIT, SigHandler::Handler(on_quit))?;
    set_handler(Signal::SIGTTIN, SigHandler::SigIgn)?;
    set_handler(Signal::SIGTTOU, SigHandler::SigIgn)?;
    Ok(())
}

/// Restores default dispositions and unpublishes the table. Must run before
/// the table is torn down.
pub fn uninstall() -> nix::Result<()> {
    set_handler(Signal::SIGINT, SigHandler::SigDfl)?;
    set_handler(Signal::SIGTSTP, SigHandler::SigDfl)?;
    set_handler(Signal::SIGCHLD, SigHandler::SigDfl)?;
    JOBS.store(ptr::null_mut(), Ordering::Release);
    Ok(())
}

fn set_handler(signal: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: every handler installed here is async-signal-safe.
    unsafe { sigaction(signal, &action) }.map(drop)
}

fn shared() -> Option<&'static SharedJobs> {
    let jobs = JOBS.load(Ordering::Acquire);
    // SAFETY: the pointer is either null or was derived from a `&'static`.
    unsafe { jobs.as_ref() }
}

/// Keeps `errno` intact across a handler so interrupted code never sees it
/// change.
struct SavedErrno(i32);

impl SavedErrno {
    fn save() -> Self {
        Self(Errno::last_raw())
    }
}

impl Drop for SavedErrno {
    fn drop(&mut self) {
        Errno::set_raw(self.0);
    }
}

extern "C" fn on_child(_: libc::c_int) {
    let _errno = SavedErrno::save();
    if let Some(jobs) = shared() {
        reap(jobs);
    }
}

extern "C" fn on_stop(_: libc::c_int) {
    let _errno = SavedErrno::save();
    if let Some(jobs) = shared() {
        forward_to_foreground(jobs, Signal::SIGTSTP);
    }
}

extern "C" fn on_interrupt(_: libc::c_int) {
    let _errno = SavedErrno::save();
    if let Some(jobs) = shared() {
        forward_to_foreground(jobs, Signal::SIGINT);
    }
}

extern "C" fn on_quit(_: libc::c_int) {
    sio_println!("Terminating after receipt of SIGQUIT signal");
    // SAFETY: _exit is async-signal-safe and skips all userspace cleanup.
    unsafe { libc::_exit(1) }
}

/// Collects every pending child status change and applies it to the table.
///
/// One SIGCHLD may stand for several children, so this loops until `waitpid`
/// has nothing left to report.
pub fn reap(jobs: &SharedJobs) {
    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => status,
        };

        let Some(pid) = status.pid() else { continue };
        let mut table = jobs.lock();
        let Some(id) = table.lookup_by_process_group(pid) else {
            if VERBOSE.load(Ordering::Relaxed) {
                sio_eprintln!("reap: no job for pid {}", pid);
            }
            continue;
        };

        match status {
            WaitStatus::Stopped(_, signal) => {
                if let Err(e) = table.set_state(id, JobState::Stopped) {
                    if VERBOSE.load(Ordering::Relaxed) {
                        sio_eprintln!("reap: {}", e);
                    }
                }
                sio_println!("Job [{}] ({}) stopped by signal {}", id, pid, signal as i32);
            }
            WaitStatus::Signaled(_, signal, _) => {
                table.remove(id);
                sio_println!("Job [{}] ({}) terminated by signal {}", id, pid, signal as i32);
            }
            WaitStatus::Exited(..) => {
                table.remove(id);
            }
            _ => {}
        }
    }
}

/// Sends `signal` to the foreground job's whole process group. The table is
/// left alone; the resulting status change comes back through SIGCHLD.
fn forward_to_foreground(jobs: &SharedJobs, signal: Signal) {
    let target: Option<Pid> = {
        let table = jobs.lock();
        table
            .foreground_job()
            .and_then(|id| table.get(id))
            .map(|job| job.pgid())
    };
    if let Some(pgid) = target {
        let _ = killpg(pgid, signal);
    }
}
