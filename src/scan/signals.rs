//! SIGINT status reports and SIGCHLD reaping for a running scan.
//!
//! While a [`SignalGuard`] is alive, Ctrl+C prints how many workers are still
//! scanning instead of terminating the process, and SIGCHLD reaps finished
//! workers into the scan's [`WorkerRegistry`]. Handlers reach the registry
//! through one published pointer; uninstalling waits for in-flight handlers
//! before the pointer's target is freed.
//!
//! Nothing reachable from a handler allocates, locks or touches buffered I/O.

use std::io::{Cursor, Write};
use std::os::fd::BorrowedFd;
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, sigaction, signal,
};
use nix::time::{ClockId, clock_gettime};

use super::registry::WorkerRegistry;
use crate::error::{Result, ScanError};

/// Default minimum spacing between two status lines.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Large enough for the status line with a 20-digit count.
const STATUS_LINE_CAPACITY: usize = 96;

const NEVER: i64 = i64::MIN;

/// Debounced progress printer driven by SIGINT.
#[derive(Debug)]
pub struct StatusReporter {
    interval_ms: i64,
    last_ms: AtomicI64,
}

impl StatusReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            last_ms: AtomicI64::new(NEVER),
        }
    }

    /// Claim the right to print at `now_ms`.
    ///
    /// Fails when the previous line was printed less than one interval ago.
    /// Dropped triggers are not queued.
    pub fn try_begin(&self, now_ms: i64) -> bool {
        let last = self.last_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) < self.interval_ms {
            return false;
        }
        self.last_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Print the active worker count to `fd` if the debounce window allows.
    ///
    /// Returns whether a line was written.
    pub fn report_at(&self, fd: BorrowedFd<'_>, active: usize, now_ms: i64) -> bool {
        if !self.try_begin(now_ms) {
            return false;
        }
        let mut buf = [0u8; STATUS_LINE_CAPACITY];
        let len = render_status(active, &mut buf);
        write_all_raw(fd, &buf[..len]).is_ok()
    }

    /// Print to stdout using the monotonic clock. Signal-safe.
    fn report(&self, active: usize) {
        let Some(now_ms) = monotonic_millis() else {
            return;
        };
        // Safety: fd 1 stays open for the life of the process.
        let stdout = unsafe { BorrowedFd::borrow_raw(nix::libc::STDOUT_FILENO) };
        self.report_at(stdout, active, now_ms);
    }
}

/// Format the status line into `buf`, returning its length.
pub fn render_status(active: usize, buf: &mut [u8]) -> usize {
    let mut cursor = Cursor::new(buf);
    let _ = write!(
        cursor,
        "\nInterrupt received: {} worker(s) still scanning\n",
        active
    );
    cursor.position() as usize
}

fn write_all_raw(fd: BorrowedFd<'_>, mut bytes: &[u8]) -> std::result::Result<(), Errno> {
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

fn monotonic_millis() -> Option<i64> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC).ok()?;
    Some(now.tv_sec() as i64 * 1000 + now.tv_nsec() as i64 / 1_000_000)
}

/// State the handlers can see while a scan runs.
struct HandlerState {
    registry: Arc<WorkerRegistry>,
    reporter: StatusReporter,
}

static STATE: AtomicPtr<HandlerState> = AtomicPtr::new(ptr::null_mut());
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

fn with_state(f: impl FnOnce(&HandlerState)) {
    let saved_errno = Errno::last_raw();
    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    let state = STATE.load(Ordering::SeqCst);
    // Safety: a non-null pointer is only freed after IN_FLIGHT drops to zero.
    if let Some(state) = unsafe { state.as_ref() } {
        f(state);
    }
    IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    Errno::set_raw(saved_errno);
}

extern "C" fn on_sigint(_: c_int) {
    with_state(|state| state.reporter.report(state.registry.active()));
}

extern "C" fn on_sigchld(_: c_int) {
    with_state(|state| state.registry.reap_terminated());
}

/// Clear the published state and free it once no handler can observe it.
fn unpublish(state: *mut HandlerState) {
    let _ = STATE.compare_exchange(state, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst);
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        std::hint::spin_loop();
    }
    // Safety: produced by Box::into_raw in install and no longer reachable.
    drop(unsafe { Box::from_raw(state) });
}

/// Installed SIGINT/SIGCHLD handlers; dropping restores the previous ones.
pub struct SignalGuard {
    state: *mut HandlerState,
    prev_sigint: SigAction,
    prev_sigchld: SigAction,
}

/// Route SIGINT and SIGCHLD to `registry` until the guard is dropped.
///
/// Fails with `EBUSY` if another scan in this process owns the handlers.
pub fn install(registry: Arc<WorkerRegistry>, report_interval: Duration) -> Result<SignalGuard> {
    let state = Box::into_raw(Box::new(HandlerState {
        registry,
        reporter: StatusReporter::new(report_interval),
    }));
    if STATE
        .compare_exchange(ptr::null_mut(), state, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // Safety: never published.
        drop(unsafe { Box::from_raw(state) });
        return Err(ScanError::SignalSetup(Errno::EBUSY));
    }

    let on_int = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let on_chld = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // Safety: both handlers only run async-signal-safe code.
    let prev_sigint = match unsafe { sigaction(Signal::SIGINT, &on_int) } {
        Ok(prev) => prev,
        Err(e) => {
            unpublish(state);
            return Err(ScanError::SignalSetup(e));
        }
    };
    let prev_sigchld = match unsafe { sigaction(Signal::SIGCHLD, &on_chld) } {
        Ok(prev) => prev,
        Err(e) => {
            let _ = unsafe { sigaction(Signal::SIGINT, &prev_sigint) };
            unpublish(state);
            return Err(ScanError::SignalSetup(e));
        }
    };

    tracing::debug!("Installed SIGINT status and SIGCHLD reaper handlers");
    Ok(SignalGuard {
        state,
        prev_sigint,
        prev_sigchld,
    })
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        // Safety: restoring dispositions that were in place before install.
        unsafe {
            let _ = sigaction(Signal::SIGCHLD, &self.prev_sigchld);
            let _ = sigaction(Signal::SIGINT, &self.prev_sigint);
        }
        unpublish(self.state);
        tracing::debug!("Restored previous SIGINT and SIGCHLD handlers");
    }
}

/// SIGINT and SIGCHLD blocked on the calling thread; dropping restores the mask.
///
/// Held across `fork` so a coordinator handler never runs in a worker before
/// the worker has reset its dispositions.
pub struct BlockedSignals {
    previous: SigSet,
}

impl BlockedSignals {
    pub fn block() -> std::result::Result<Self, Errno> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGINT);
        set.add(Signal::SIGCHLD);
        let previous = set.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;
        Ok(Self { previous })
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        let _ = self.previous.thread_set_mask();
    }
}

/// Reset dispositions in a freshly forked worker.
///
/// Interrupts belong to the coordinator, a closed channel must surface as
/// `EPIPE` rather than kill the worker, and workers have no children.
pub fn detach_worker() {
    // Safety: installs only SIG_IGN/SIG_DFL.
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::SigIgn);
        let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
        let _ = signal(Signal::SIGCHLD, SigHandler::SigDfl);
    }
}
