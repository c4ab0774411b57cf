//! Fixed one-way latency shaper.
//!
//! Every shaped frame is released exactly `delay_ms` after it arrived; bypassed frames are
//! releasable immediately. Releases preserve FIFO order, and because the delay is constant the
//! release times are monotonic in arrival order, so a plain queue is enough.

use crate::bypass::{BypassFilter, Verdict};
use crate::clock::Clock;
use crate::ferry::Shaper;
use crate::packet::{FrameSink, WAIT_FOREVER};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct DelayQueue {
    delay_ms: u64,
    filter: BypassFilter,
    clock: Arc<dyn Clock>,
    /// (release timestamp, frame)
    packet_queue: VecDeque<(u64, Vec<u8>)>,
}

impl DelayQueue {
    pub fn new(delay_ms: u64, filter: BypassFilter, clock: Arc<dyn Clock>) -> Self {
        DelayQueue {
            delay_ms,
            filter,
            clock,
            packet_queue: VecDeque::new(),
        }
    }

    /// The delay queue never runs out of schedule.
    pub fn finished(&self) -> bool {
        false
    }
}

impl Shaper for DelayQueue {
    fn read_packet(
        &mut self,
        frame: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = self.clock.now();
        let release_time = match self.filter.classify(frame) {
            Verdict::Bypass => now,
            Verdict::Shape => now + self.delay_ms,
        };
        self.packet_queue.push_back((release_time, frame.to_vec()));
        Ok(())
    }

    fn write_packets(
        &mut self,
        sink: &mut dyn FrameSink,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = self.clock.now();
        while let Some((release_time, frame)) = self.packet_queue.front() {
            if *release_time > now {
                break;
            }
            match sink.write_frame(frame) {
                Ok(()) => {
                    self.packet_queue.pop_front();
                }
                // Sink not ready: keep the frame queued for the next writable event.
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn wait_time(&mut self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let head = match self.packet_queue.front() {
            Some((release_time, _)) => *release_time,
            None => return Ok(WAIT_FOREVER),
        };
        let now = self.clock.now();
        Ok(head.saturating_sub(now))
    }

    fn pending_output(&self) -> bool {
        match self.packet_queue.front() {
            Some((release_time, _)) => *release_time <= self.clock.now(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bypass::{ETHERNET_HEADER_LEN, IPV4_HEADER_MIN_LEN};
    use crate::clock::ManualClock;
    use std::net::Ipv4Addr;

    fn ipv4_frame(src: Ipv4Addr) -> Vec<u8> {
        let mut f = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_MIN_LEN];
        f[ETHERNET_HEADER_LEN] = 0x45;
        f[ETHERNET_HEADER_LEN + 12..ETHERNET_HEADER_LEN + 16].copy_from_slice(&src.octets());
        f
    }

    #[test]
    fn constant_delay_scenario() {
        let clock = ManualClock::new(0);
        let mut q = DelayQueue::new(100, BypassFilter::disabled(), clock.clone());

        q.read_packet(b"AAAA").unwrap();
        assert_eq!(q.wait_time().unwrap(), 100);

        clock.set(50);
        let mut sink: Vec<Vec<u8>> = Vec::new();
        q.write_packets(&mut sink).unwrap();
        assert!(sink.is_empty());
        assert!(!q.pending_output());

        clock.set(100);
        assert_eq!(q.wait_time().unwrap(), 0);
        assert!(q.pending_output());
        q.write_packets(&mut sink).unwrap();
        assert_eq!(sink, vec![b"AAAA".to_vec()]);
        assert_eq!(q.wait_time().unwrap(), WAIT_FOREVER);
    }

    #[test]
    fn releases_preserve_fifo_order() {
        let clock = ManualClock::new(0);
        let mut q = DelayQueue::new(10, BypassFilter::disabled(), clock.clone());
        q.read_packet(b"first").unwrap();
        clock.set(5);
        q.read_packet(b"second").unwrap();

        clock.set(20);
        let mut sink: Vec<Vec<u8>> = Vec::new();
        q.write_packets(&mut sink).unwrap();
        assert_eq!(sink, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn bypassed_frame_is_immediately_releasable() {
        let clock = ManualClock::new(0);
        let vip = Ipv4Addr::new(10, 0, 0, 1);
        let filter = BypassFilter::new(Some(vip), None);
        let mut q = DelayQueue::new(1000, filter, clock.clone());

        q.read_packet(&ipv4_frame(vip)).unwrap();
        assert_eq!(q.wait_time().unwrap(), 0);

        let mut sink: Vec<Vec<u8>> = Vec::new();
        q.write_packets(&mut sink).unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn bypass_does_not_reorder_past_shaped_head() {
        let clock = ManualClock::new(0);
        let vip = Ipv4Addr::new(10, 0, 0, 1);
        let filter = BypassFilter::new(Some(vip), None);
        let mut q = DelayQueue::new(50, filter, clock.clone());

        let shaped = ipv4_frame(Ipv4Addr::new(9, 9, 9, 9));
        q.read_packet(&shaped).unwrap();
        q.read_packet(&ipv4_frame(vip)).unwrap();

        let mut sink: Vec<Vec<u8>> = Vec::new();
        q.write_packets(&mut sink).unwrap();
        assert!(sink.is_empty());

        clock.set(50);
        q.write_packets(&mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0], shaped);
    }
}
