//! Fan-out/fan-in of one scan job.
//!
//! The coordinator plans segments, forks one worker per segment, reads each
//! worker's count under a per-channel timeout and always reaps every worker
//! before returning, whether or not collection succeeded.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use super::registry::{ReapOutcome, WorkerRegistry};
use super::segment::{self, Segment};
use super::signals::{self, DEFAULT_REPORT_INTERVAL};
use super::worker::{WorkerHandle, WorkerTask, spawn_worker};
use crate::error::{Result, ScanError};

/// Signal dispositions are process-wide, so scans run one at a time.
static SCAN_LOCK: Mutex<()> = Mutex::new(());

/// Hold the process-wide scan lock. Poisoning is ignored: the lock guards no data.
pub(super) fn lock_scans() -> MutexGuard<'static, ()> {
    SCAN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Default bound on the wait for each worker's result.
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default worker count when none is configured.
pub const DEFAULT_WORKERS: u32 = 4;

/// An immutable scan request.
#[derive(Debug, Clone)]
pub struct Job {
    buffer: Vec<u8>,
    target: u8,
    workers: u32,
}

impl Job {
    /// Create a job. Fails with `InvalidPartitionRequest` if `workers` is 0.
    pub fn new(buffer: Vec<u8>, target: u8, workers: u32) -> Result<Self> {
        if workers == 0 {
            return Err(ScanError::InvalidPartitionRequest(workers.to_string()));
        }
        Ok(Self {
            buffer,
            target,
            workers,
        })
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }
}

/// Parse a worker count from configuration text.
///
/// Anything other than a positive integer is an `InvalidPartitionRequest`.
pub fn parse_worker_count(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ScanError::InvalidPartitionRequest(value.to_string())),
    }
}

/// Tunables for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on the wait for each worker's result.
    pub collect_timeout: Duration,
    /// Per-byte delay injected into workers.
    pub throttle: Option<Duration>,
    /// Minimum spacing between SIGINT status lines.
    pub report_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            throttle: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// Lifecycle of a scan, logged at debug level as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Planning,
    Spawning,
    Collecting,
    Reaping,
    Aggregated,
    Done,
}

/// Per-worker result of a completed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialResult {
    pub worker_id: usize,
    pub segment: Segment,
    pub count: u64,
}

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub total: u64,
    pub partials: Vec<PartialResult>,
    pub elapsed: Duration,
}

/// Runs scan jobs over forked workers.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Count `job.target()` across `job.buffer()` with `job.workers()` processes.
    ///
    /// Any spawn or collection failure fails the whole job; there is no
    /// partial aggregation and no retry. Every spawned worker is reaped
    /// before this returns.
    #[instrument(level = "debug", skip_all, fields(bytes = job.buffer().len(), workers = job.workers()))]
    pub fn run(&self, job: &Job) -> Result<ScanOutcome> {
        let started = Instant::now();
        let _exclusive = lock_scans();
        let mut phase = Phase::Init;
        advance(&mut phase, Phase::Planning);

        let segments = segment::plan(job.buffer().len() as u64, job.workers())?;
        let registry = Arc::new(WorkerRegistry::new(segments.len()));

        advance(&mut phase, Phase::Spawning);
        let guard = signals::install(Arc::clone(&registry), self.config.report_interval)?;

        let (mut handles, spawn_error) = self.spawn_all(job, &segments, &registry);
        let collected = match spawn_error {
            Some(e) => Err(e),
            None => {
                advance(&mut phase, Phase::Collecting);
                self.collect(&mut handles)
            }
        };

        // Close every channel still open so late workers fail their write
        // and exit instead of outliving the job.
        for handle in &mut handles {
            handle.receiver = None;
        }

        advance(&mut phase, Phase::Reaping);
        reap_all(&registry, &handles);
        drop(guard);

        let partials = collected?;
        advance(&mut phase, Phase::Aggregated);
        let total = partials.iter().map(|p| p.count).sum();
        advance(&mut phase, Phase::Done);

        let elapsed = started.elapsed();
        debug!(total, elapsed_ms = elapsed.as_millis(), "Scan complete");
        Ok(ScanOutcome {
            total,
            partials,
            elapsed,
        })
    }

    /// Fork one worker per segment, stopping at the first failure.
    fn spawn_all(
        &self,
        job: &Job,
        segments: &[Segment],
        registry: &WorkerRegistry,
    ) -> (Vec<WorkerHandle>, Option<ScanError>) {
        let mut handles = Vec::with_capacity(segments.len());
        let mut open_receivers: Vec<RawFd> = Vec::with_capacity(segments.len());
        for (id, segment) in segments.iter().enumerate() {
            let task = WorkerTask {
                segment: *segment,
                buffer: job.buffer(),
                target: job.target(),
                throttle: self.config.throttle,
            };
            match spawn_worker(id, task, registry, &open_receivers) {
                Ok(handle) => {
                    if let Some(receiver) = &handle.receiver {
                        open_receivers.push(receiver.as_raw_fd());
                    }
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(worker_id = id, error = %e, "Aborting scan: worker spawn failed");
                    for unspawned in id..segments.len() {
                        registry.forget_unspawned(unspawned);
                    }
                    return (handles, Some(e));
                }
            }
        }
        debug!(workers = handles.len(), "All workers spawned");
        (handles, None)
    }

    /// Receive from each worker in id order, failing on the first bad channel.
    fn collect(&self, handles: &mut [WorkerHandle]) -> Result<Vec<PartialResult>> {
        let timeout = self.config.collect_timeout;
        let mut partials = Vec::with_capacity(handles.len());

        for handle in handles.iter_mut() {
            let Some(receiver) = handle.receiver.take() else {
                return Err(ScanError::ChannelClosed { index: handle.id });
            };
            let wait_start = Instant::now();
            let count = receiver
                .receive(timeout)
                .map_err(|e| e.at(handle.id, timeout))?;

            debug!(
                worker_id = handle.id,
                segment = %handle.segment,
                count,
                wait_ms = wait_start.elapsed().as_millis(),
                "Received partial count"
            );
            partials.push(PartialResult {
                worker_id: handle.id,
                segment: handle.segment,
                count,
            });
        }

        Ok(partials)
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    debug!(from = ?*phase, to = ?next, "Scan phase");
    *phase = next;
}

/// Wait for every spawned worker. Problems are logged, never returned.
fn reap_all(registry: &WorkerRegistry, handles: &[WorkerHandle]) {
    for handle in handles {
        let pid = handle.pid.as_raw();
        match registry.reap_blocking(handle.id) {
            Ok(ReapOutcome::Reaped(reason)) if reason.is_success() => {}
            Ok(ReapOutcome::Reaped(reason)) if reason.is_channel_failure() => {
                debug!(worker_id = handle.id, pid, "Worker exited after its channel closed");
            }
            Ok(ReapOutcome::Reaped(reason)) => {
                let err = ScanError::WorkerAbnormalTermination {
                    id: handle.id,
                    pid,
                    reason: reason.to_string(),
                };
                warn!(error = %err, "Worker terminated abnormally");
            }
            Ok(outcome) => {
                let err = ScanError::ReapFailure {
                    id: handle.id,
                    pid,
                    message: format!("{:?}", outcome),
                };
                warn!(error = %err, "Worker not reaped");
            }
            Err(errno) => {
                let err = ScanError::ReapFailure {
                    id: handle.id,
                    pid,
                    message: errno.desc().to_string(),
                };
                warn!(error = %err, "Worker not reaped");
            }
        }
    }
    debug!(remaining = registry.active(), "Reaping finished");
}
