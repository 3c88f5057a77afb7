//! One-shot result channels between workers and the coordinator.
//!
//! Each channel is a pipe carrying exactly one little-endian `u64`. The
//! sending half lives in the forked worker, the receiving half stays with the
//! coordinator. Both halves are consumed by their single operation, so a
//! second send or receive does not type-check.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::error::ChannelError;

/// Size of the count payload on the wire.
pub const PAYLOAD_LEN: usize = std::mem::size_of::<u64>();

/// A pipe end with EINTR-retrying reads and writes.
#[derive(Debug)]
struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }

    /// Wait until a read will not block or `deadline` passes.
    ///
    /// Readiness includes hang-up, so EOF is reported by the following read.
    fn wait_readable(&self, deadline: Instant) -> Result<(), ChannelError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, poll_timeout(remaining)) {
                Ok(0) if Instant::now() >= deadline => return Err(ChannelError::Timeout),
                // Capped poll interval elapsed before the deadline
                Ok(0) => continue,
                Ok(_) => return Ok(()),
                // A signal handler ran; recompute what is left of the deadline
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32).into()),
            }
        }
    }
}

/// Round up to whole milliseconds, capped at what a single poll accepts.
fn poll_timeout(remaining: Duration) -> PollTimeout {
    let millis = remaining.as_micros().div_ceil(1000);
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}

/// Create a fresh channel.
pub fn open() -> Result<(ResultSender, ResultReceiver), Errno> {
    let (read_fd, write_fd) = create_pipe()?;
    Ok((
        ResultSender {
            pipe: PipeFd { fd: write_fd },
        },
        ResultReceiver {
            pipe: PipeFd { fd: read_fd },
        },
    ))
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    nix::unistd::pipe()
}

/// Write half, owned by a worker.
#[derive(Debug)]
pub struct ResultSender {
    pipe: PipeFd,
}

impl ResultSender {
    /// Send the count and close the channel.
    ///
    /// Short writes are resumed until the whole payload is out. Performs no
    /// allocation, so it is safe between `fork` and `_exit`.
    pub fn send(self, count: u64) -> Result<(), Errno> {
        let payload = count.to_le_bytes();
        let mut written = 0;
        while written < PAYLOAD_LEN {
            match self.pipe.write(&payload[written..])? {
                0 => return Err(Errno::EPIPE),
                n => written += n,
            }
        }
        Ok(())
    }
}

/// Read half, owned by the coordinator.
#[derive(Debug)]
pub struct ResultReceiver {
    pipe: PipeFd,
}

impl ResultReceiver {
    /// Receive the count, waiting at most `timeout` for the whole payload.
    ///
    /// The read end is closed when this returns, whatever the outcome.
    pub fn receive(self, timeout: Duration) -> Result<u64, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut payload = [0u8; PAYLOAD_LEN];
        let mut filled = 0;

        while filled < PAYLOAD_LEN {
            self.pipe.wait_readable(deadline)?;
            match self.pipe.read(&mut payload[filled..]) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => filled += n,
                Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32).into()),
            }
        }

        Ok(u64::from_le_bytes(payload))
    }
}

/// Workers forked while this receiver is open close the raw fd, so only the
/// coordinator ever holds the read end.
impl AsRawFd for ResultReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.pipe.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_then_receive() {
        let (sender, receiver) = open().unwrap();
        sender.send(42).unwrap();
        assert_eq!(receiver.receive(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn test_receive_large_count() {
        let (sender, receiver) = open().unwrap();
        sender.send(u64::MAX - 7).unwrap();
        assert_eq!(
            receiver.receive(Duration::from_secs(1)).unwrap(),
            u64::MAX - 7
        );
    }

    #[test]
    fn test_receive_times_out_without_data() {
        let (sender, receiver) = open().unwrap();
        let start = Instant::now();
        let result = receiver.receive(Duration::from_millis(100));
        assert!(matches!(result, Err(ChannelError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(5));
        drop(sender);
    }

    #[test]
    fn test_receive_closed_before_data() {
        let (sender, receiver) = open().unwrap();
        drop(sender);
        let result = receiver.receive(Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[test]
    fn test_receive_reassembles_short_writes() {
        let (sender, receiver) = open().unwrap();
        let payload = 0x0102_0304_0506_0708u64.to_le_bytes();

        let writer = std::thread::spawn(move || {
            for chunk in payload.chunks(3) {
                sender.pipe.write(chunk).unwrap();
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        let count = receiver.receive(Duration::from_secs(2)).unwrap();
        writer.join().unwrap();
        assert_eq!(count, 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_truncated_payload_is_closed() {
        let (sender, receiver) = open().unwrap();
        sender.pipe.write(&[1, 2, 3]).unwrap();
        drop(sender);
        let result = receiver.receive(Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[test]
    fn test_send_to_closed_receiver_fails() {
        // A concurrent fork elsewhere in the test binary would keep the read end alive.
        let _exclusive = crate::scan::coordinator::lock_scans();
        // SIGPIPE would kill the test process; workers ignore it the same way.
        unsafe {
            nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGPIPE,
                nix::sys::signal::SigHandler::SigIgn,
            )
            .unwrap();
        }
        let (sender, receiver) = open().unwrap();
        drop(receiver);
        assert_eq!(sender.send(1), Err(Errno::EPIPE));
    }
}
