//! Worker processes.
//!
//! Each worker is a `fork` of the coordinator, so it sees the input buffer
//! copy-on-write without any transfer. Between `fork` and `_exit` a worker
//! only counts bytes, optionally sleeps, and writes eight bytes to its
//! channel: no allocation, no locks, no logging.

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::{ForkResult, Pid, fork};

use super::channel::{self, ResultReceiver, ResultSender};
use super::registry::WorkerRegistry;
use super::segment::{Segment, count_matches};
use super::signals::{BlockedSignals, detach_worker};
use super::termination::CHANNEL_WRITE_FAILED;
use crate::error::{Result, ScanError};

/// Coordinator-side view of one spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: usize,
    pub pid: Pid,
    pub segment: Segment,
    /// Taken by the collection phase.
    pub receiver: Option<ResultReceiver>,
}

/// What a worker does once forked.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTask<'a> {
    pub segment: Segment,
    pub buffer: &'a [u8],
    pub target: u8,
    /// Artificial per-byte delay for exercising slow workers.
    pub throttle: Option<Duration>,
}

impl WorkerTask<'_> {
    /// Count matches in the segment, honoring the throttle.
    pub fn count(&self) -> u64 {
        if self.segment.is_empty() {
            return 0;
        }
        let bytes = self.segment.slice(self.buffer);
        match self.throttle {
            None => count_matches(bytes, self.target),
            Some(delay) => bytes
                .iter()
                .map(|&b| {
                    std::thread::sleep(delay);
                    u64::from(b == self.target)
                })
                .sum(),
        }
    }
}

/// Worker body: count, send once, exit. Never returns.
fn run_worker(task: WorkerTask<'_>, sender: ResultSender) -> ! {
    let code = match sender.send(task.count()) {
        Ok(()) => 0,
        Err(_) => CHANNEL_WRITE_FAILED,
    };
    // Safety: _exit skips atexit handlers and stdio flushing, which belong to
    // the coordinator.
    unsafe { nix::libc::_exit(code) }
}

/// Close read ends of earlier workers' channels inherited through `fork`.
///
/// Otherwise an earlier worker's write would still find a reader after the
/// coordinator dropped its receiver.
fn close_inherited(fds: &[RawFd]) {
    for &fd in fds {
        let _ = nix::unistd::close(fd);
    }
}

/// Fork worker `id` with its own result channel and register it.
///
/// `open_receivers` lists the coordinator's receivers that are still open;
/// the child closes them. The caller must have installed the SIGCHLD reaper
/// before the first spawn.
pub fn spawn_worker(
    id: usize,
    task: WorkerTask<'_>,
    registry: &WorkerRegistry,
    open_receivers: &[RawFd],
) -> Result<WorkerHandle> {
    let spawn_failure = |source: Errno| ScanError::SpawnFailure { id, source };
    let (sender, receiver) = channel::open().map_err(spawn_failure)?;
    let blocked = BlockedSignals::block().map_err(spawn_failure)?;

    // Safety: the child only runs allocation-free code before _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(receiver);
            close_inherited(open_receivers);
            detach_worker();
            drop(blocked);
            run_worker(task, sender)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(sender);
            // SIGCHLD is still blocked on this thread, so the slot is filled
            // before this thread's handler can look for it.
            registry.register(id, child);
            drop(blocked);
            tracing::trace!(
                worker_id = id,
                pid = child.as_raw(),
                segment = %task.segment,
                "Spawned worker"
            );
            Ok(WorkerHandle {
                id,
                pid: child,
                segment: task.segment,
                receiver: Some(receiver),
            })
        }
        Err(source) => Err(spawn_failure(source)),
    }
}
