//! Packet representation and frame-sink boundary shared by both shaping queues.

use std::io;
use std::os::unix::io::RawFd;

/// Size of one delivery opportunity, and the largest frame the link queue accepts.
///
/// Matches the maximum TUN payload carried by the emulator; existing trace files and drivers
/// assume this value.
pub const PACKET_SIZE: usize = 1504;

/// Wait-time sentinel meaning "no timed event soon; block on I/O only".
pub const WAIT_FOREVER: u64 = u16::MAX as u64;

/// A frame held inside a queue discipline, stamped with its ingress time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    /// Monotonic ms at which the frame entered the shaper.
    pub arrival_time: u64,
    /// The original frame bytes, never modified while queued.
    pub contents: Vec<u8>,
}

impl QueuedPacket {
    pub fn new(contents: Vec<u8>, arrival_time: u64) -> Self {
        QueuedPacket {
            arrival_time,
            contents,
        }
    }
}

/// Byte-oriented output boundary: one call writes one whole frame.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Sink backed by a raw file descriptor (the TUN device or socketpair end owned by the
/// surrounding shell). Each frame goes out in a single `write(2)`.
pub struct FdSink {
    fd: RawFd,
}

impl FdSink {
    pub fn new(fd: RawFd) -> Self {
        FdSink { fd }
    }
}

impl FrameSink for FdSink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let n = unsafe { libc::write(self.fd, frame.as_ptr() as *const libc::c_void, frame.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n as usize != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short frame write: {} of {} bytes", n, frame.len()),
            ));
        }
        Ok(())
    }
}

/// Collecting sink used by tests and offline tooling.
impl FrameSink for Vec<Vec<u8>> {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }
}
