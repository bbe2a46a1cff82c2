use std::env;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::unistd::{dup2, execv, fork, setpgid, ForkResult, Pid};
use tracing::{debug, warn};

use crate::builtins::run_builtin;
use crate::error::ShellError;
use crate::foreground::wait_foreground;
use crate::job::{JobState, JobTableError};
use crate::mask::{SharedJobs, SignalMask};
use crate::parser::{parseline, Command, Parsed};

/// Files opened for `<` and `>`. Dropping this closes them, which covers
/// every exit path out of [`eval`].
struct Redirects {
    input: Option<File>,
    output: Option<File>,
}

impl Redirects {
    fn open(command: &Command) -> Result<Self, ShellError> {
        let input = command
            .infile
            .as_deref()
            .map(|path| File::open(path).map_err(|source| redirect_error(path, source)))
            .transpose()?;
        let output = command
            .outfile
            .as_deref()
            .map(|path| {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o644)
                    .open(path)
                    .map_err(|source| redirect_error(path, source))
            })
            .transpose()?;
        Ok(Self { input, output })
    }
}

fn redirect_error(path: &Path, source: std::io::Error) -> ShellError {
    ShellError::Redirect {
        path: path.to_path_buf(),
        source,
    }
}

/// Runs one command line to completion, or until it is backgrounded.
///
/// Every failure is printed and swallowed: a bad command never ends the shell.
pub fn eval(cmdline: &str, jobs: &SharedJobs) {
    let (command, state) = match parseline(cmdline) {
        Ok(Parsed::Empty) => return,
        Ok(Parsed::Foreground(command)) => (command, JobState::Foreground),
        Ok(Parsed::Background(command)) => (command, JobState::Background),
        Err(e) => {
            sio_println!("{}", e);
            return;
        }
    };

    if let Err(e) = execute(cmdline, &command, state, jobs) {
        sio_println!("{}", e);
    }
}

fn execute(cmdline: &str, command: &Command, state: JobState, jobs: &SharedJobs) -> Result<(), ShellError> {
    let mut redirects = Redirects::open(command)?;
    match command.builtin {
        Some(builtin) => run_builtin(builtin, &command.argv, redirects.output.as_mut(), jobs),
        None => spawn(cmdline, command, state, &redirects, jobs),
    }
}

/// Forks and execs an external command and registers it as a job.
///
/// Signals stay blocked from before the fork until the job is in the table
/// (and, for a foreground job, until the wait is set up), so SIGCHLD for the
/// new child can never be handled before its entry exists.
fn spawn(
    cmdline: &str,
    command: &Command,
    state: JobState,
    redirects: &Redirects,
    jobs: &SharedJobs,
) -> Result<(), ShellError> {
    let program = resolve_path(&command.argv[0]);
    let program = CString::new(program.into_os_string().into_encoded_bytes())
        .map_err(|_| ShellError::NulInArgument(command.argv[0].clone()))?;
    let argv = command
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_str()).map_err(|_| ShellError::NulInArgument(arg.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let blocked = SignalMask::block_all();
    if jobs.lock().is_full() {
        return Err(JobTableError::Full.into());
    }

    // SAFETY: the shell is single threaded; the child only makes
    // async-signal-safe calls before exec.
    match unsafe { fork() }.map_err(ShellError::Fork)? {
        ForkResult::Child => exec_child(&command.argv[0], &program, &argv, redirects),
        ForkResult::Parent { child } => {
            let id = match jobs.lock().add(child, state, cmdline) {
                Ok(id) => id,
                Err(e) => {
                    warn!(pid = %child, "could not register job, killing it: {e}");
                    let _ = kill(child, Signal::SIGKILL);
                    return Err(e.into());
                }
            };
            debug!(job = %id, pid = %child, state = ?state, "started job");

            match state {
                JobState::Background => sio_println!("[{}] ({}) {}", id, child, cmdline),
                _ => wait_foreground(jobs, &blocked),
            }
            Ok(())
        }
    }
}

/// Child side of [`spawn`]. Never returns.
fn exec_child(name: &str, program: &CString, argv: &[CString], redirects: &Redirects) -> ! {
    let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));

    if let Some(file) = &redirects.input {
        let _ = dup2(file.as_raw_fd(), libc::STDIN_FILENO);
    }
    if let Some(file) = &redirects.output {
        let _ = dup2(file.as_raw_fd(), libc::STDOUT_FILENO);
    }

    let err = match execv(program, argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    sio_println!("{}: {}", name, err.desc());
    // SAFETY: leaves the child without running the parent's destructors.
    unsafe { libc::_exit(1) }
}

/// Looks a bare command name up in `PATH`. Names containing `/`, and names
/// not found anywhere, are returned unchanged so exec reports the error.
fn resolve_path(name: &str) -> PathBuf {
    if name.contains('/') {
        return PathBuf::from(name);
    }
    if let Some(path) = env::var_os("PATH") {
        for dir in env::split_paths(&path) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from(name)
}
