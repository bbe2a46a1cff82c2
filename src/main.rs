//! tsh: a tiny shell with job control.
//!
//! Runs commands in the foreground or background, forwards Ctrl-C and Ctrl-Z
//! to the foreground job, and supports `jobs`, `fg`, `bg` and `quit`.

use std::env;
use std::io::{self, BufRead};
use std::process::ExitCode;

use clap::Parser;
use nix::unistd::dup2;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[macro_use]
mod sio;
mod builtins;
mod error;
mod executor;
mod foreground;
mod job;
mod mask;
mod parser;
mod signals;

use executor::eval;
use job::{JobTable, MAX_JOBS};
use mask::SharedJobs;

const PROMPT: &str = "tsh> ";

#[derive(Debug, Parser)]
#[command(name = "tsh", version, about = "A tiny shell with job control")]
struct Args {
    /// Print additional diagnostic information
    #[arg(short, long)]
    verbose: bool,

    /// Do not emit a command prompt
    #[arg(short = 'p', long = "no-prompt")]
    no_prompt: bool,

    /// Maximum number of simultaneous jobs
    #[arg(long, default_value_t = MAX_JOBS as u16, value_parser = clap::value_parser!(u16).range(1..=MAX_JOBS as i64))]
    max_jobs: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // A driver reading our stdout should see diagnostics too.
    if let Err(e) = dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) {
        sio_println!("dup2 error: {}", e.desc());
        return ExitCode::FAILURE;
    }

    init_tracing(args.verbose);

    let jobs: &'static SharedJobs = Box::leak(Box::new(SharedJobs::new(JobTable::with_capacity(
        usize::from(args.max_jobs),
    ))));

    env::set_var("MY_ENV", "42");

    signals::set_verbose(args.verbose);
    if let Err(e) = signals::install(jobs) {
        error!("failed to install signal handlers: {}", e.desc());
        return ExitCode::FAILURE;
    }
    debug!(capacity = jobs.lock().capacity(), "shell ready");

    let code = repl(jobs, !args.no_prompt);
    cleanup(jobs);
    code
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("TSH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn repl(jobs: &SharedJobs, emit_prompt: bool) -> ExitCode {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    loop {
        if emit_prompt {
            sio_print!("{}", PROMPT);
        }

        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => {
                // End of input (Ctrl-D)
                sio_println!("");
                return ExitCode::SUCCESS;
            }
            Ok(_) => {
                let command = line.strip_suffix('\n').unwrap_or(&line);
                eval(command, jobs);
            }
            Err(e) => {
                error!("read error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}

/// Uninstalls the handlers before dropping every job record. The processes
/// themselves are left to the OS.
fn cleanup(jobs: &SharedJobs) {
    if let Err(e) = signals::uninstall() {
        error!("failed to restore signal handlers: {}", e.desc());
    }
    let mut table = jobs.lock();
    debug!(remaining = table.len(), "clearing job table");
    table.clear();
}
