//! CoDel active queue management (RFC 8289) behind the discipline interface.
//!
//! Sojourn time is measured against the packets' ingress stamps, so the controller sees exactly
//! the queueing delay the link imposes. Drops happen at dequeue; an optional hard packet bound
//! protects against unbounded growth while the control loop converges.

use super::PacketQueue;
use crate::clock::Clock;
use crate::packet::{QueuedPacket, PACKET_SIZE};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_TARGET_MS: u64 = 5;
pub const DEFAULT_INTERVAL_MS: u64 = 100;

pub struct CodelQueue {
    target_ms: u64,
    interval_ms: u64,
    packet_limit: Option<usize>,
    clock: Arc<dyn Clock>,

    queue: VecDeque<QueuedPacket>,
    bytes: usize,

    first_above_time: Option<u64>,
    drop_next: u64,
    drop_count: u32,
    dropping: bool,
}

impl CodelQueue {
    pub fn new(
        target_ms: u64,
        interval_ms: u64,
        packet_limit: Option<usize>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CodelQueue {
            target_ms,
            interval_ms,
            packet_limit,
            clock,
            queue: VecDeque::new(),
            bytes: 0,
            first_above_time: None,
            drop_next: 0,
            drop_count: 0,
            dropping: false,
        }
    }

    fn control_law(&self, t: u64) -> u64 {
        t + (self.interval_ms as f64 / (self.drop_count as f64).sqrt()) as u64
    }

    fn pop(&mut self) -> Option<QueuedPacket> {
        let packet = self.queue.pop_front()?;
        self.bytes -= packet.contents.len();
        Some(packet)
    }

    /// Pop the head and report whether the standing delay says it may be dropped.
    fn next_and_ok_to_drop(&mut self, now: u64) -> (Option<QueuedPacket>, bool) {
        let packet = match self.pop() {
            Some(p) => p,
            None => {
                self.first_above_time = None;
                return (None, false);
            }
        };

        let sojourn = now.saturating_sub(packet.arrival_time);
        if sojourn < self.target_ms || self.bytes <= PACKET_SIZE {
            // Standing delay below target: reset the above-target tracking.
            self.first_above_time = None;
            return (Some(packet), false);
        }

        match self.first_above_time {
            None => {
                self.first_above_time = Some(now + self.interval_ms);
                (Some(packet), false)
            }
            Some(first_above) => (Some(packet), now >= first_above),
        }
    }
}

impl PacketQueue for CodelQueue {
    fn enqueue(&mut self, packet: QueuedPacket) {
        if let Some(limit) = self.packet_limit {
            if self.queue.len() >= limit {
                return;
            }
        }
        self.bytes += packet.contents.len();
        self.queue.push_back(packet);
    }

    fn dequeue(&mut self) -> Option<QueuedPacket> {
        let now = self.clock.now();
        let (mut packet, mut ok_to_drop) = self.next_and_ok_to_drop(now);

        if self.dropping {
            if !ok_to_drop {
                self.dropping = false;
            } else {
                while self.dropping && now >= self.drop_next {
                    // Still above target at the scheduled drop time: shed the head and tighten.
                    self.drop_count += 1;
                    let (next, next_ok) = self.next_and_ok_to_drop(now);
                    packet = next;
                    ok_to_drop = next_ok;
                    if !ok_to_drop {
                        self.dropping = false;
                    } else {
                        self.drop_next = self.control_law(self.drop_next);
                    }
                }
            }
        } else if ok_to_drop {
            // Enter the dropping state with one immediate drop.
            let (next, _) = self.next_and_ok_to_drop(now);
            packet = next;
            self.dropping = true;
            self.drop_count =
                if self.drop_count > 2 && now.saturating_sub(self.drop_next) < self.interval_ms {
                    self.drop_count - 2
                } else {
                    1
                };
            self.drop_next = self.control_law(now);
        }

        packet
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn size_packets(&self) -> usize {
        self.queue.len()
    }

    fn size_bytes(&self) -> usize {
        self.bytes
    }

    fn summary(&self) -> String {
        let mut desc = format!("codel [target={}, interval={}", self.target_ms, self.interval_ms);
        if let Some(limit) = self.packet_limit {
            desc.push_str(&format!(", packets={limit}"));
        }
        desc.push(']');
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn packet(bytes: usize, at: u64) -> QueuedPacket {
        QueuedPacket::new(vec![0xAB; bytes], at)
    }

    #[test]
    fn below_target_nothing_is_dropped() {
        let clock = ManualClock::new(0);
        let mut q = CodelQueue::new(5, 100, None, clock.clone());
        for _ in 0..10 {
            q.enqueue(packet(1000, 0));
        }
        clock.set(2); // sojourn below target
        let mut out = 0;
        while q.dequeue().is_some() {
            out += 1;
        }
        assert_eq!(out, 10);
    }

    #[test]
    fn persistent_standing_queue_triggers_drops() {
        let clock = ManualClock::new(0);
        let mut q = CodelQueue::new(5, 100, None, clock.clone());
        let mut enqueued = 0;
        for _ in 0..50 {
            q.enqueue(packet(1400, 0));
            enqueued += 1;
        }

        // Arrivals match departures one-per-ms, so the standing backlog (and the head's sojourn
        // time) never falls below ~50 ms.
        let mut delivered = 0;
        for t in 50..400 {
            clock.set(t);
            q.enqueue(packet(1400, t));
            enqueued += 1;
            if q.dequeue().is_some() {
                delivered += 1;
            }
        }
        let dropped = enqueued - delivered - q.size_packets();
        assert!(dropped > 0, "CoDel never dropped from a standing queue");
    }

    #[test]
    fn hard_packet_bound_is_enforced_at_enqueue() {
        let clock = ManualClock::new(0);
        let mut q = CodelQueue::new(5, 100, Some(3), clock);
        for _ in 0..10 {
            q.enqueue(packet(100, 0));
        }
        assert_eq!(q.size_packets(), 3);
        assert_eq!(q.size_bytes(), 300);
    }

    #[test]
    fn summary_names_the_parameters() {
        let clock = ManualClock::new(0);
        let q = CodelQueue::new(5, 100, Some(500), clock);
        assert_eq!(q.summary(), "codel [target=5, interval=100, packets=500]");
    }
}
