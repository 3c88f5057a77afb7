//! Classification of worker exit statuses.
//!
//! Statuses are collected either by the SIGCHLD handler or by the blocking
//! reaper, so they travel through an atomic slot as a packed `i32`.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Exit status a worker uses when its result could not be written.
pub const CHANNEL_WRITE_FAILED: i32 = 3;

const SIGNALED_BIT: i32 = 0x100;
const UNKNOWN: i32 = 0x200;

/// Why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// A status `waitpid` reported that does not describe a termination.
    Unknown,
}

impl TerminationReason {
    /// Map a `WaitStatus` to a termination reason.
    ///
    /// Returns `None` while the process is still running.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::StillAlive => None,
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => Some(Self::Unknown),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// The worker ran but could not deliver its count.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Exited(CHANNEL_WRITE_FAILED))
    }

    /// Pack into a non-negative `i32` for atomic storage.
    pub fn encode(&self) -> i32 {
        match self {
            Self::Exited(code) => code & 0xff,
            Self::Signaled(signal) => SIGNALED_BIT | (*signal as i32),
            Self::Unknown => UNKNOWN,
        }
    }

    /// Inverse of [`encode`](Self::encode). Negative values mean "not reaped".
    pub fn decode(raw: i32) -> Option<Self> {
        match raw {
            r if r < 0 => None,
            r if r & UNKNOWN != 0 => Some(Self::Unknown),
            r if r & SIGNALED_BIT != 0 => Some(
                Signal::try_from(r & 0xff)
                    .map(Self::Signaled)
                    .unwrap_or(Self::Unknown),
            ),
            r => Some(Self::Exited(r)),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(0) => write!(f, "exited cleanly"),
            Self::Exited(CHANNEL_WRITE_FAILED) => write!(f, "could not write its result"),
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(signal) => write!(f, "killed by signal {:?}", signal),
            Self::Unknown => write!(f, "terminated for an unknown reason"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_from_wait_status() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 0);
        assert_eq!(
            TerminationReason::from_wait_status(status),
            Some(TerminationReason::Exited(0))
        );

        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGKILL, false);
        assert_eq!(
            TerminationReason::from_wait_status(status),
            Some(TerminationReason::Signaled(Signal::SIGKILL))
        );

        assert_eq!(
            TerminationReason::from_wait_status(WaitStatus::StillAlive),
            None
        );
    }

    #[test]
    fn test_encode_decode() {
        for reason in [
            TerminationReason::Exited(0),
            TerminationReason::Exited(CHANNEL_WRITE_FAILED),
            TerminationReason::Exited(255),
            TerminationReason::Signaled(Signal::SIGSEGV),
            TerminationReason::Signaled(Signal::SIGTERM),
            TerminationReason::Unknown,
        ] {
            let raw = reason.encode();
            assert!(raw >= 0);
            assert_eq!(TerminationReason::decode(raw), Some(reason));
        }
        assert_eq!(TerminationReason::decode(-1), None);
    }

    #[test]
    fn test_classification() {
        assert!(TerminationReason::Exited(0).is_success());
        assert!(!TerminationReason::Exited(1).is_success());
        assert!(TerminationReason::Exited(CHANNEL_WRITE_FAILED).is_channel_failure());
        assert!(!TerminationReason::Signaled(Signal::SIGTERM).is_channel_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(TerminationReason::Exited(0).to_string(), "exited cleanly");
        assert!(
            TerminationReason::Exited(CHANNEL_WRITE_FAILED)
                .to_string()
                .contains("result")
        );
        assert!(
            TerminationReason::Signaled(Signal::SIGKILL)
                .to_string()
                .contains("SIGKILL")
        );
    }
}
