use crate::mask::{SharedJobs, SignalMask};

/// Blocks until no job is in the foreground.
///
/// `blocked` proves the caller has every signal blocked, so the check and the
/// suspend cannot be separated by a SIGCHLD: the handler only runs inside
/// `suspend`, after which the loop checks the table again.
pub fn wait_foreground(jobs: &SharedJobs, blocked: &SignalMask) {
    while jobs.lock().foreground_job().is_some() {
        blocked.suspend();
    }
}
