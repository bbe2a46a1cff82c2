use std::fmt;

use nix::unistd::Pid;
use thiserror::Error;

/// Largest number of jobs the table can ever hold.
pub const MAX_JOBS: usize = 16;

/// Longest command line kept for a job, in bytes.
pub const MAXLINE: usize = 1024;

/// Job identifier shown to the user as `%N`. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u32);

impl JobId {
    pub fn new(raw: u32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Foreground,
    Background,
    Stopped,
}

impl JobState {
    /// Label used by the `jobs` listing.
    pub fn label(self) -> &'static str {
        match self {
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobTableError {
    #[error("Tried to create too many jobs")]
    Full,
    #[error("process group {0} already belongs to a job")]
    AlreadyTracked(Pid),
    #[error("invalid process group {0}")]
    InvalidProcessGroup(Pid),
    #[error("job {0} is not in the job table")]
    NotFound(JobId),
    #[error("job {0} already holds the foreground")]
    ForegroundBusy(JobId),
}

/// Command line stored inline so that copying a job never allocates.
#[derive(Clone, Copy)]
pub struct CommandText {
    bytes: [u8; MAXLINE],
    len: usize,
}

impl CommandText {
    fn new(text: &str) -> Self {
        let mut len = text.len().min(MAXLINE);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; MAXLINE];
        bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self { bytes, len }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }
}

impl fmt::Debug for CommandText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Job {
    id: JobId,
    pgid: Pid,
    state: JobState,
    command: CommandText,
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Process group id, which is also the pid of the job's lead process.
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn command(&self) -> &str {
        self.command.as_str()
    }
}

/// `jobs` listing format: `[1] (4242) Running sleep 10 &`
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ({}) {} {}",
            self.id,
            self.pgid,
            self.state.label(),
            self.command()
        )
    }
}

/// Fixed-capacity job table.
///
/// Every operation works on a preallocated slot array and never allocates, so
/// the SIGCHLD handler can mutate the table directly. Callers are expected to
/// hold the table through [`crate::mask::SharedJobs::lock`], which keeps
/// signals blocked for the whole read-modify-write.
pub struct JobTable {
    slots: [Option<Job>; MAX_JOBS],
    capacity: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_JOBS)
    }

    /// Capacity is clamped to `1..=MAX_JOBS`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: [None; MAX_JOBS],
            capacity: capacity.clamp(1, MAX_JOBS),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots[..self.capacity].iter().all(Option::is_some)
    }

    /// Registers a new job and returns its id.
    ///
    /// The id is one more than the largest live id, so an id only comes back
    /// after every job holding it or a larger one has been removed.
    pub fn add(&mut self, pgid: Pid, state: JobState, cmdline: &str) -> Result<JobId, JobTableError> {
        if pgid.as_raw() < 1 {
            return Err(JobTableError::InvalidProcessGroup(pgid));
        }
        if self.lookup_by_process_group(pgid).is_some() {
            return Err(JobTableError::AlreadyTracked(pgid));
        }
        if state == JobState::Foreground {
            if let Some(holder) = self.foreground_job() {
                return Err(JobTableError::ForegroundBusy(holder));
            }
        }

        let next = self.live().map(|job| job.id.0).max().unwrap_or(0) + 1;
        let slot = self.slots[..self.capacity]
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(JobTableError::Full)?;

        let id = JobId(next);
        *slot = Some(Job {
            id,
            pgid,
            state,
            command: CommandText::new(cmdline),
        });
        Ok(id)
    }

    /// Removes a job. Removing an absent id does nothing.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(job) if job.id == id))
            .and_then(Option::take)
    }

    pub fn set_state(&mut self, id: JobId, state: JobState) -> Result<(), JobTableError> {
        if state == JobState::Foreground {
            if let Some(holder) = self.foreground_job().filter(|&holder| holder != id) {
                return Err(JobTableError::ForegroundBusy(holder));
            }
        }
        let job = self.get_mut(id).ok_or(JobTableError::NotFound(id))?;
        job.state = state;
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.live().find(|job| job.id == id)
    }

    fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|job| job.id == id)
    }

    /// Resolves a pid to the job owning its process group.
    pub fn lookup_by_process_group(&self, pid: Pid) -> Option<JobId> {
        self.live().find(|job| job.pgid == pid).map(|job| job.id)
    }

    pub fn foreground_job(&self) -> Option<JobId> {
        self.live()
            .find(|job| job.state == JobState::Foreground)
            .map(|job| job.id)
    }

    /// Copies every live job, ordered by id.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            jobs: [None; MAX_JOBS],
            len: 0,
        };
        for job in self.live() {
            snapshot.jobs[snapshot.len] = Some(*job);
            snapshot.len += 1;
        }
        snapshot.jobs[..snapshot.len].sort_unstable_by_key(|job| job.map(|job| job.id));
        snapshot
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_JOBS];
    }

    fn live(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }
}

/// Point-in-time copy of the job table used by the `jobs` built-in.
pub struct Snapshot {
    jobs: [Option<Job>; MAX_JOBS],
    len: usize,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs[..self.len].iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn ids_are_distinct_and_increasing() {
        let mut table = JobTable::new();
        let a = table.add(pid(100), JobState::Background, "a &").unwrap();
        let b = table.add(pid(101), JobState::Background, "b &").unwrap();
        let c = table.add(pid(102), JobState::Stopped, "c").unwrap();
        assert_eq!((a.get(), b.get(), c.get()), (1, 2, 3));
    }

    #[test]
    fn id_comes_back_only_after_removal() {
        let mut table = JobTable::new();
        let a = table.add(pid(100), JobState::Background, "a &").unwrap();
        let b = table.add(pid(101), JobState::Background, "b &").unwrap();

        table.remove(a);
        let c = table.add(pid(102), JobState::Background, "c &").unwrap();
        assert_eq!(c.get(), 3, "live job 2 keeps the next id above it");

        table.remove(b);
        table.remove(c);
        let d = table.add(pid(103), JobState::Background, "d &").unwrap();
        assert_eq!(d.get(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = JobTable::new();
        let a = table.add(pid(100), JobState::Background, "a &").unwrap();
        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn full_table_is_an_error() {
        let mut table = JobTable::with_capacity(2);
        table.add(pid(100), JobState::Background, "a &").unwrap();
        table.add(pid(101), JobState::Background, "b &").unwrap();
        assert!(table.is_full());
        assert_eq!(
            table.add(pid(102), JobState::Background, "c &"),
            Err(JobTableError::Full)
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(JobTable::with_capacity(0).capacity(), 1);
        assert_eq!(JobTable::with_capacity(500).capacity(), MAX_JOBS);
    }

    #[test]
    fn process_group_maps_to_one_job() {
        let mut table = JobTable::new();
        let a = table.add(pid(100), JobState::Background, "a &").unwrap();
        assert_eq!(
            table.add(pid(100), JobState::Background, "again &"),
            Err(JobTableError::AlreadyTracked(pid(100)))
        );
        assert_eq!(table.lookup_by_process_group(pid(100)), Some(a));
        assert_eq!(table.lookup_by_process_group(pid(999)), None);
    }

    #[test]
    fn rejects_nonpositive_pids() {
        let mut table = JobTable::new();
        assert_eq!(
            table.add(pid(0), JobState::Background, "x"),
            Err(JobTableError::InvalidProcessGroup(pid(0)))
        );
    }

    #[test]
    fn single_foreground_job() {
        let mut table = JobTable::new();
        let fg = table.add(pid(100), JobState::Foreground, "fg").unwrap();
        assert_eq!(
            table.add(pid(101), JobState::Foreground, "other"),
            Err(JobTableError::ForegroundBusy(fg))
        );

        let bg = table.add(pid(101), JobState::Background, "bg &").unwrap();
        assert_eq!(
            table.set_state(bg, JobState::Foreground),
            Err(JobTableError::ForegroundBusy(fg))
        );
        assert_eq!(table.foreground_job(), Some(fg));

        table.set_state(fg, JobState::Stopped).unwrap();
        assert_eq!(table.foreground_job(), None);
        table.set_state(bg, JobState::Foreground).unwrap();
        assert_eq!(table.foreground_job(), Some(bg));
    }

    #[test]
    fn set_state_on_missing_job() {
        let mut table = JobTable::new();
        let id = JobId::new(7).unwrap();
        assert_eq!(
            table.set_state(id, JobState::Stopped),
            Err(JobTableError::NotFound(id))
        );
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let mut table = JobTable::new();
        let a = table.add(pid(100), JobState::Background, "a &").unwrap();
        table.add(pid(101), JobState::Stopped, "b").unwrap();
        table.remove(a);
        table.add(pid(102), JobState::Background, "c &").unwrap();

        let snapshot = table.snapshot();
        let ids: Vec<u32> = snapshot.iter().map(|job| job.id().get()).collect();
        assert_eq!(ids, vec![2, 3]);

        let lines: Vec<String> = snapshot.iter().map(ToString::to_string).collect();
        assert_eq!(lines[0], "[2] (101) Stopped b");
        assert_eq!(lines[1], "[3] (102) Running c &");
    }

    #[test]
    fn long_command_lines_are_truncated_on_char_boundary() {
        let mut table = JobTable::new();
        let line = "é".repeat(MAXLINE);
        let id = table.add(pid(100), JobState::Background, &line).unwrap();
        let stored = table.get(id).unwrap().command();
        assert!(stored.len() <= MAXLINE);
        assert!(stored.chars().all(|c| c == 'é'));
    }

    #[test]
    fn zero_is_not_a_job_id() {
        assert!(JobId::new(0).is_none());
        assert_eq!(JobId::new(3).map(JobId::get), Some(3));
    }
}
