//! Worker bookkeeping shared with the signal handlers.
//!
//! Everything here may run inside a SIGCHLD handler: state lives in
//! pre-allocated atomics, no locks are taken and nothing allocates after
//! [`WorkerRegistry::new`].

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

use super::termination::TerminationReason;

/// Pid slot value for "no live worker".
const NO_PID: i32 = 0;
/// Status slot value for "not reaped yet".
const NOT_REAPED: i32 = -1;

/// How many times the blocking reaper re-checks a slot after `ECHILD`
/// before giving up on a worker.
const ECHILD_RETRIES: u32 = 10_000;

/// Number of workers that have not terminated yet.
#[derive(Debug)]
pub struct ActiveCounter(AtomicUsize);

impl ActiveCounter {
    pub fn new(workers: usize) -> Self {
        Self(AtomicUsize::new(workers))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Record one termination. Saturates at zero.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[derive(Debug)]
struct WorkerSlot {
    pid: AtomicI32,
    status: AtomicI32,
}

/// Outcome of waiting for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Reaped(TerminationReason),
    /// The slot never received a pid.
    NeverSpawned,
    /// The process vanished without its status being recorded here.
    Lost,
}

/// Pids and exit statuses of one scan's workers.
#[derive(Debug)]
pub struct WorkerRegistry {
    active: ActiveCounter,
    slots: Box<[WorkerSlot]>,
}

impl WorkerRegistry {
    /// Create a registry for `workers` workers; the active count starts there.
    pub fn new(workers: usize) -> Self {
        let slots = (0..workers)
            .map(|_| WorkerSlot {
                pid: AtomicI32::new(NO_PID),
                status: AtomicI32::new(NOT_REAPED),
            })
            .collect();
        Self {
            active: ActiveCounter::new(workers),
            slots,
        }
    }

    pub fn active(&self) -> usize {
        self.active.get()
    }

    /// Attach a spawned worker's pid to its slot.
    ///
    /// A worker can exit before its pid is known here, and its SIGCHLD may
    /// already have been handled on another thread against an empty slot,
    /// so the new slot is polled once.
    pub fn register(&self, id: usize, pid: Pid) {
        let slot = &self.slots[id];
        slot.pid.store(pid.as_raw(), Ordering::Release);
        self.reap_slot(slot);
    }

    /// A worker that will never run still has to leave the active count.
    pub fn forget_unspawned(&self, id: usize) {
        if self.slots[id].pid.load(Ordering::Acquire) == NO_PID
            && self.slots[id]
                .status
                .compare_exchange(
                    NOT_REAPED,
                    TerminationReason::Unknown.encode(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.active.decrement();
        }
    }

    /// Reap every registered worker that has already terminated.
    ///
    /// Async-signal-safe: only `waitpid(WNOHANG)` and atomics.
    pub fn reap_terminated(&self) {
        for slot in self.slots.iter() {
            self.reap_slot(slot);
        }
    }

    fn reap_slot(&self, slot: &WorkerSlot) {
        let pid = slot.pid.load(Ordering::Acquire);
        if pid == NO_PID {
            return;
        }
        if let Ok(status) = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG))
            && let Some(reason) = TerminationReason::from_wait_status(status)
        {
            self.record(slot, reason);
        }
    }

    /// Block until worker `id` has terminated and return how it ended.
    ///
    /// Whichever of this call and the SIGCHLD handler wins the `waitpid`
    /// records the status; the other observes it through the slot.
    pub fn reap_blocking(&self, id: usize) -> Result<ReapOutcome, Errno> {
        let slot = &self.slots[id];
        let mut echild_retries = 0;

        loop {
            if let Some(reason) = TerminationReason::decode(slot.status.load(Ordering::Acquire)) {
                return Ok(ReapOutcome::Reaped(reason));
            }

            let pid = slot.pid.load(Ordering::Acquire);
            if pid == NO_PID {
                // Statuses are stored before pids are cleared, so an empty
                // slot without a status was never registered.
                return Ok(
                    match TerminationReason::decode(slot.status.load(Ordering::Acquire)) {
                        Some(reason) => ReapOutcome::Reaped(reason),
                        None => ReapOutcome::NeverSpawned,
                    },
                );
            }

            match waitpid(Pid::from_raw(pid), None) {
                Ok(status) => {
                    if let Some(reason) = TerminationReason::from_wait_status(status) {
                        self.record(slot, reason);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    if echild_retries >= ECHILD_RETRIES {
                        return Ok(ReapOutcome::Lost);
                    }
                    echild_retries += 1;
                    std::thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record(&self, slot: &WorkerSlot, reason: TerminationReason) {
        let first = slot
            .status
            .compare_exchange(
                NOT_REAPED,
                reason.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        slot.pid.store(NO_PID, Ordering::Release);
        if first {
            self.active.decrement();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::{ForkResult, fork};

    /// Fork a child that exits immediately with `code`.
    fn spawn_exiting(code: i32) -> Pid {
        match unsafe { fork() }.expect("fork failed") {
            ForkResult::Child => unsafe { nix::libc::_exit(code) },
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn test_active_counter_saturates() {
        let counter = ActiveCounter::new(2);
        counter.decrement();
        counter.decrement();
        counter.decrement();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_reap_blocking_records_exit_code() {
        let registry = WorkerRegistry::new(2);
        registry.register(0, spawn_exiting(0));
        registry.register(1, spawn_exiting(7));

        assert_eq!(
            registry.reap_blocking(0).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Exited(0))
        );
        assert_eq!(
            registry.reap_blocking(1).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Exited(7))
        );
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_register_reaps_worker_that_already_exited() {
        let registry = WorkerRegistry::new(2);
        let pid = spawn_exiting(0);
        // The child is gone before its pid reaches the registry, so no
        // later SIGCHLD can account for it.
        std::thread::sleep(std::time::Duration::from_millis(200));

        registry.register(0, pid);
        assert_eq!(registry.active(), 1);
        assert_eq!(
            registry.reap_blocking(0).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Exited(0))
        );
        assert_eq!(registry.active(), 1);
    }

    #[test]
    fn test_reap_terminated_then_blocking_counts_once() {
        let registry = WorkerRegistry::new(1);
        registry.register(0, spawn_exiting(0));

        // Poll until the child is gone, the way SIGCHLD delivery would.
        while registry.active() == 1 {
            registry.reap_terminated();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(
            registry.reap_blocking(0).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Exited(0))
        );
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_reap_signaled_worker() {
        let registry = WorkerRegistry::new(1);
        let pid = match unsafe { fork() }.expect("fork failed") {
            ForkResult::Child => loop {
                std::thread::sleep(std::time::Duration::from_secs(1));
            },
            ForkResult::Parent { child } => child,
        };
        registry.register(0, pid);
        nix::sys::signal::kill(pid, Signal::SIGKILL).unwrap();

        assert_eq!(
            registry.reap_blocking(0).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Signaled(Signal::SIGKILL))
        );
    }

    #[test]
    fn test_forget_unspawned_leaves_active_count() {
        let registry = WorkerRegistry::new(3);
        registry.forget_unspawned(2);
        registry.forget_unspawned(2);
        assert_eq!(registry.active(), 2);
        assert_eq!(
            registry.reap_blocking(2).unwrap(),
            ReapOutcome::Reaped(TerminationReason::Unknown)
        );
    }
}
