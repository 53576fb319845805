//! Polling a disk until the engine reports it stable

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::debug;

use crate::client::{ApiError, DiskApi};
use crate::model::{Disk, DiskStatus};

/// Default delay between two status polls
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default overall limit for one wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// When to give up waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBound {
    /// Poll forever; only process termination stops the wait
    Unbounded,
    /// Give up after this many status fetches; at least one is always made
    MaxAttempts(u32),
    /// Give up once this much time has passed since the wait started
    Deadline(Duration),
}

/// How to poll for stability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Sleep before each status fetch
    pub interval: Duration,
    pub bound: WaitBound,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            bound: WaitBound::Deadline(DEFAULT_TIMEOUT),
        }
    }
}

impl WaitPolicy {
    /// Fixed interval with no upper bound
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            bound: WaitBound::Unbounded,
        }
    }

    fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        match self.bound {
            WaitBound::Unbounded => false,
            WaitBound::MaxAttempts(max) => attempts >= max,
            WaitBound::Deadline(deadline) => elapsed >= deadline,
        }
    }
}

/// Command line knobs for the stability wait
#[derive(Debug, Clone, Parser)]
pub struct WaitOpts {
    /// Seconds to sleep between status polls
    #[clap(long, default_value = "5")]
    pub wait_interval: u64,

    /// Give up waiting for a disk after this many seconds (0 waits forever)
    #[clap(long, default_value = "600")]
    pub wait_timeout: u64,

    /// Give up after this many polls instead of after a timeout
    #[clap(
        long,
        conflicts_with = "wait_timeout",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub wait_attempts: Option<u32>,
}

impl WaitOpts {
    pub fn policy(&self) -> WaitPolicy {
        let interval = Duration::from_secs(self.wait_interval);
        if let Some(attempts) = self.wait_attempts {
            return WaitPolicy {
                interval,
                bound: WaitBound::MaxAttempts(attempts),
            };
        }
        match self.wait_timeout {
            0 => WaitPolicy::unbounded(interval),
            secs => WaitPolicy {
                interval,
                bound: WaitBound::Deadline(Duration::from_secs(secs)),
            },
        }
    }
}

/// Errors from [`wait_until_stable`]
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(
        "disk {disk_id} did not reach status ok after {attempts} polls ({elapsed:?}), \
         last status: {}",
        .last_status.as_ref().map(DiskStatus::as_str).unwrap_or("unknown")
    )]
    Timeout {
        disk_id: String,
        attempts: u32,
        elapsed: Duration,
        last_status: Option<DiskStatus>,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Block until the disk reports status `ok`
///
/// Sleeps one interval before every fetch, so even a disk that is already
/// stable costs one interval. Fetch errors end the wait immediately. On
/// success the returned snapshot always has status `ok`.
pub fn wait_until_stable<A: DiskApi + ?Sized>(
    api: &A,
    disk_id: &str,
    policy: &WaitPolicy,
) -> Result<Disk, WaitError> {
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last_status = None;

    loop {
        if attempts > 0 && policy.exhausted(attempts, start.elapsed()) {
            return Err(WaitError::Timeout {
                disk_id: disk_id.to_owned(),
                attempts,
                elapsed: start.elapsed(),
                last_status,
            });
        }

        thread::sleep(policy.interval);
        attempts += 1;

        let disk = api.get_disk(disk_id)?;
        debug!(
            "Poll {attempts} of disk {disk_id}: status {}",
            disk.status.as_ref().map(DiskStatus::as_str).unwrap_or("unknown")
        );
        if disk.is_stable() {
            return Ok(disk);
        }
        last_status = disk.status;
    }
}
