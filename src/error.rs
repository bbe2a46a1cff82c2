use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::builtins::JobSpec;
use crate::job::JobTableError;

/// Errors that abort one command line. The `Display` text is exactly what the
/// shell prints; none of them end the shell.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{}: {}", .path.display(), os_reason(.source))]
    Redirect { path: PathBuf, source: io::Error },

    #[error("{0} command requires PID or %jobid argument")]
    MissingJobArgument(String),

    #[error("{0}: argument must be a PID or %jobid")]
    BadJobArgument(String),

    #[error("{0}: No such job")]
    NoSuchJob(JobSpec),

    #[error("{0}: argument contains a NUL byte")]
    NulInArgument(String),

    #[error(transparent)]
    Jobs(#[from] JobTableError),

    #[error("fork error: {}", .0.desc())]
    Fork(Errno),

    #[error("jobs: {}", os_reason(.0))]
    Listing(#[source] io::Error),
}

/// strerror-style text for an I/O error, without Rust's "(os error N)" suffix.
pub fn os_reason(err: &io::Error) -> &'static str {
    match err.raw_os_error() {
        Some(code) => Errno::from_raw(code).desc(),
        None => "unknown error",
    }
}
