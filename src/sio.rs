//! Async-signal-safe output.
//!
//! Everything printed by the shell goes through here: lines are formatted into
//! a fixed stack buffer and handed to `write(2)` in one piece, so the same
//! path works from signal handlers, from the forked child before `exec`, and
//! from the main loop without interleaving with a userspace stdout buffer.

use std::fmt::{self, Write as _};
use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;

const BUF_LEN: usize = 2048;

/// Fixed-size formatting buffer. Output past the end is dropped.
pub struct Buf {
    bytes: [u8; BUF_LEN],
    len: usize,
}

impl Buf {
    pub const fn new() -> Self {
        Self {
            bytes: [0; BUF_LEN],
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Write for Buf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = BUF_LEN - self.len;
        let take = s.len().min(room);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Writes all of `bytes` to `fd`, retrying on EINTR and short writes.
pub fn write_all(fd: RawFd, mut bytes: &[u8]) -> nix::Result<()> {
    // SAFETY: only the process-wide standard descriptors are passed here and
    // they stay open for the life of the shell.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    while !bytes.is_empty() {
        match nix::unistd::write(fd, bytes) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => bytes = &bytes[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn print_fmt(fd: RawFd, args: fmt::Arguments<'_>) {
    let mut buf = Buf::new();
    let _ = buf.write_fmt(args);
    let _ = write_all(fd, buf.as_bytes());
}

/// Prints to stdout without allocating.
macro_rules! sio_print {
    ($($arg:tt)*) => {
        $crate::sio::print_fmt(libc::STDOUT_FILENO, format_args!($($arg)*))
    };
}

/// Prints a line to stdout without allocating.
macro_rules! sio_println {
    ($($arg:tt)*) => {
        $crate::sio::print_fmt(libc::STDOUT_FILENO, format_args!("{}\n", format_args!($($arg)*)))
    };
}

/// Prints a line to stderr without allocating.
macro_rules! sio_eprintln {
    ($($arg:tt)*) => {
        $crate::sio::print_fmt(libc::STDERR_FILENO, format_args!("{}\n", format_args!($($arg)*)))
    };
}

/// Unbuffered `io::Write` over the raw stdout descriptor, so listings written
/// by built-ins share ordering with the handler output.
pub struct RawStdout;

impl io::Write for RawStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_all(libc::STDOUT_FILENO, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn formats_into_buffer() {
        let mut buf = Buf::new();
        write!(buf, "Job [{}] ({}) stopped by signal {}", 1, 4242, 20).unwrap();
        assert_eq!(buf.as_bytes(), b"Job [1] (4242) stopped by signal 20");
    }

    #[test]
    fn overflow_is_truncated() {
        let mut buf = Buf::new();
        let long = "x".repeat(BUF_LEN + 10);
        write!(buf, "{long}").unwrap();
        assert_eq!(buf.as_bytes().len(), BUF_LEN);
    }

    #[test]
    fn write_all_reaches_a_pipe() {
        let (read, write) = nix::unistd::pipe().unwrap();
        use std::os::fd::AsRawFd;
        write_all(write.as_raw_fd(), b"hello\n").unwrap();
        drop(write);
        let mut out = String::new();
        io::Read::read_to_string(&mut std::fs::File::from(read), &mut out).unwrap();
        assert_eq!(out, "hello\n");
    }
}
