// End-to-end: frames pushed into one socketpair end come out the other, shaped.

use linkshaper::bypass::BypassFilter;
use linkshaper::clock::MonotonicClock;
use linkshaper::{DelayQueue, Ferry};

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn dgram_socketpair() -> (RawFd, RawFd) {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_DGRAM,
            0,
            fds.as_mut_ptr(),
        )
    };
    assert_eq!(rc, 0, "socketpair failed");
    (fds[0], fds[1])
}

fn send_frame(fd: RawFd, frame: &[u8]) {
    let n = unsafe { libc::write(fd, frame.as_ptr() as *const libc::c_void, frame.len()) };
    assert_eq!(n as usize, frame.len());
}

/// Blocking read with a deadline so a regression cannot hang the suite.
fn recv_frame(fd: RawFd, timeout_ms: i32) -> Option<Vec<u8>> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if n <= 0 {
        return None;
    }
    let mut buf = vec![0u8; 65536];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n <= 0 {
        return None;
    }
    buf.truncate(n as usize);
    Some(buf)
}

#[test]
fn ferry_shuttles_frames_through_a_delay_queue() {
    let (upstream_tx, shaper_input) = dgram_socketpair();
    let (shaper_output, downstream_rx) = dgram_socketpair();

    let running = Arc::new(AtomicBool::new(true));
    let ferry_running = running.clone();

    let handle = std::thread::spawn(move || {
        let clock = Arc::new(MonotonicClock);
        let mut shaper = DelayQueue::new(30, BypassFilter::disabled(), clock);
        let ferry = Ferry::new(shaper_input, shaper_output, ferry_running);
        ferry.run(&mut shaper).unwrap();
    });

    let frames = [b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()];
    let sent_at = Instant::now();
    for frame in &frames {
        send_frame(upstream_tx, frame);
    }

    for expected in &frames {
        let got = recv_frame(downstream_rx, 5000).expect("frame never arrived");
        assert_eq!(&got, expected);
    }
    // 30 ms of shaping must actually have elapsed before the first arrival.
    assert!(sent_at.elapsed().as_millis() >= 30);

    running.store(false, Ordering::Relaxed);
    handle.join().unwrap();

    for fd in [upstream_tx, shaper_input, shaper_output, downstream_rx] {
        unsafe { libc::close(fd) };
    }
}
