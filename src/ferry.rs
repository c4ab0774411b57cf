//! Cooperative event loop driving a shaper between two file descriptors.
//!
//! Single-threaded: the only blocking point is the `poll(2)` wait, whose timeout is the shaper's
//! own `wait_time()`. Shaper methods are expected to return promptly; all I/O readiness
//! multiplexing lives here.

use crate::packet::{FdSink, FrameSink};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The operations the event loop needs from a shaping queue.
pub trait Shaper {
    /// Accept one whole frame from the input side.
    fn read_packet(&mut self, frame: &[u8])
        -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Drain fully-shaped frames to the sink, FIFO, one whole frame per write.
    fn write_packets(
        &mut self,
        sink: &mut dyn FrameSink,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Milliseconds until the next timed event; `>= WAIT_FOREVER` means wait on I/O only.
    fn wait_time(&mut self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;

    /// Whether the output buffer has frames to flush (arms the sink for writability).
    fn pending_output(&self) -> bool;
}

/// Largest frame one `read(2)` can hand us; larger than any TUN payload the engine accepts.
const READ_BUF_SIZE: usize = 65536;

/// The shutdown flag is polled between waits, so never sleep longer than this.
const MAX_POLL_MS: u64 = 500;

pub struct Ferry {
    input: RawFd,
    output: RawFd,
    running: Arc<AtomicBool>,
}

impl Ferry {
    pub fn new(input: RawFd, output: RawFd, running: Arc<AtomicBool>) -> Self {
        Ferry {
            input,
            output,
            running,
        }
    }

    /// Shuttle frames until input EOF or the shutdown flag clears.
    pub fn run(
        &self,
        shaper: &mut dyn Shaper,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        set_nonblocking(self.input)?;
        set_nonblocking(self.output)?;

        let mut sink = FdSink::new(self.output);
        let mut buf = vec![0u8; READ_BUF_SIZE];

        while self.running.load(Ordering::Relaxed) {
            let wait = shaper.wait_time()?;
            let timeout = wait.min(MAX_POLL_MS) as libc::c_int;

            let mut fds = [
                libc::pollfd {
                    fd: self.input,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.output,
                    events: if shaper.pending_output() {
                        libc::POLLOUT
                    } else {
                        0
                    },
                    revents: 0,
                },
            ];

            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            if fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                if self.drain_input(shaper, &mut buf)? {
                    return Ok(()); // input EOF: the surrounding shell is gone
                }
            }

            if fds[1].revents & libc::POLLOUT != 0 && shaper.pending_output() {
                shaper.write_packets(&mut sink)?;
            }
        }

        Ok(())
    }

    /// Read whole frames until the input would block. Returns true on EOF.
    fn drain_input(
        &self,
        shaper: &mut dyn Shaper,
        buf: &mut [u8],
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let n = unsafe {
                libc::read(self.input, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n == 0 {
                return Ok(true);
            }
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => return Ok(false),
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err.into()),
                }
            }
            shaper.read_packet(&buf[..n as usize])?;
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
