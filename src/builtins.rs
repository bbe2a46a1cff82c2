use std::fmt;
use std::fs::File;
use std::io::Write;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::ShellError;
use crate::foreground::wait_foreground;
use crate::job::{JobId, JobState};
use crate::mask::{SharedJobs, SignalMask};
use crate::parser::Builtin;
use crate::sio::RawStdout;

/// Target of `fg`/`bg`: `%N` names a job, a bare number names a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSpec {
    Job(u32),
    Process(i32),
}

impl JobSpec {
    /// Returns `None` unless the whole argument is numeric.
    pub fn parse(arg: &str) -> Option<Self> {
        match arg.strip_prefix('%') {
            Some(digits) => digits.parse().ok().map(JobSpec::Job),
            None => arg.parse().ok().map(JobSpec::Process),
        }
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSpec::Job(id) => write!(f, "%{id}"),
            JobSpec::Process(pid) => write!(f, "({pid})"),
        }
    }
}

pub fn run_builtin(
    builtin: Builtin,
    argv: &[String],
    output: Option<&mut File>,
    jobs: &SharedJobs,
) -> Result<(), ShellError> {
    match builtin {
        Builtin::Jobs => list_jobs(output, jobs),
        Builtin::Quit => quit(),
        Builtin::Fg => resume(argv, JobState::Foreground, jobs),
        Builtin::Bg => resume(argv, JobState::Background, jobs),
    }
}

fn list_jobs(output: Option<&mut File>, jobs: &SharedJobs) -> Result<(), ShellError> {
    let snapshot = jobs.lock().snapshot();
    let mut stdout = RawStdout;
    let out: &mut dyn Write = match output {
        Some(file) => file,
        None => &mut stdout,
    };
    for job in snapshot.iter() {
        writeln!(out, "{job}").map_err(ShellError::Listing)?;
    }
    Ok(())
}

/// Leaves at once: no cleanup, no waiting on running jobs.
fn quit() -> ! {
    // SAFETY: _exit never returns and touches no shell state.
    unsafe { libc::_exit(0) }
}

/// `fg`/`bg`: moves the job to `state` and continues its process group.
fn resume(argv: &[String], state: JobState, jobs: &SharedJobs) -> Result<(), ShellError> {
    let name = argv.first().map(String::as_str).unwrap_or_default();
    let arg = argv
        .get(1)
        .ok_or_else(|| ShellError::MissingJobArgument(name.to_string()))?;
    let spec = JobSpec::parse(arg).ok_or_else(|| ShellError::BadJobArgument(name.to_string()))?;

    let blocked = SignalMask::block_all();
    let pgid = {
        let mut table = jobs.lock();
        let id = match spec {
            JobSpec::Job(raw) => JobId::new(raw).filter(|&id| table.get(id).is_some()),
            JobSpec::Process(raw) => table.lookup_by_process_group(Pid::from_raw(raw)),
        }
        .ok_or(ShellError::NoSuchJob(spec))?;

        table.set_state(id, state)?;
        let job = table.get(id).ok_or(ShellError::NoSuchJob(spec))?;
        if state == JobState::Background {
            sio_println!("[{}] ({}) {}", id, job.pgid(), job.command());
        }
        debug!(job = %job.id(), pgid = %job.pgid(), state = ?state, "resuming job");
        job.pgid()
    };

    if let Err(e) = killpg(pgid, Signal::SIGCONT) {
        warn!(%pgid, "failed to continue job: {}", e.desc());
    }

    if state == JobState::Foreground {
        wait_foreground(jobs, &blocked);
    }
    Ok(())
}
