//! BLUE active queue management.
//!
//! A single marking probability rises on buffer overflow and decays while the link sits idle, so
//! the queue learns a drop rate instead of tracking occupancy. Probability updates are rate-limited
//! by the freeze window to let the link react between adjustments.

use super::{PacketQueue, QueueLimits};
use crate::clock::Clock;
use crate::packet::QueuedPacket;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_INCREMENT: f64 = 0.02;
pub const DEFAULT_DECREMENT: f64 = 0.002;
pub const DEFAULT_FREEZE_MS: u64 = 100;

pub struct BlueQueue {
    limits: QueueLimits,
    increment: f64,
    decrement: f64,
    freeze_ms: u64,
    clock: Arc<dyn Clock>,

    queue: VecDeque<QueuedPacket>,
    bytes: usize,

    marking_probability: f64,
    last_update: Option<u64>,
    rng: SmallRng,
}

impl BlueQueue {
    pub fn new(
        limits: QueueLimits,
        increment: f64,
        decrement: f64,
        freeze_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BlueQueue {
            limits,
            increment,
            decrement,
            freeze_ms,
            clock,
            queue: VecDeque::new(),
            bytes: 0,
            marking_probability: 0.0,
            last_update: None,
            rng: SmallRng::from_entropy(),
        }
    }

    fn window_open(&self, now: u64) -> bool {
        match self.last_update {
            Some(last) => now.saturating_sub(last) >= self.freeze_ms,
            None => true,
        }
    }

    fn on_overflow(&mut self, now: u64) {
        if self.window_open(now) {
            self.marking_probability = (self.marking_probability + self.increment).min(1.0);
            self.last_update = Some(now);
        }
    }

    fn on_idle(&mut self, now: u64) {
        if self.window_open(now) {
            self.marking_probability = (self.marking_probability - self.decrement).max(0.0);
            self.last_update = Some(now);
        }
    }
}

impl PacketQueue for BlueQueue {
    fn enqueue(&mut self, packet: QueuedPacket) {
        let now = self.clock.now();

        if !self
            .limits
            .admits(self.queue.len() + 1, self.bytes + packet.contents.len())
        {
            // Buffer overflow: the congestion signal BLUE learns from.
            self.on_overflow(now);
            return;
        }

        if self.marking_probability > 0.0 && self.rng.gen::<f64>() < self.marking_probability {
            return;
        }

        self.bytes += packet.contents.len();
        self.queue.push_back(packet);
    }

    fn dequeue(&mut self) -> Option<QueuedPacket> {
        match self.queue.pop_front() {
            Some(packet) => {
                self.bytes -= packet.contents.len();
                Some(packet)
            }
            None => {
                // Link found the queue empty: ease off.
                let now = self.clock.now();
                self.on_idle(now);
                None
            }
        }
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
        format!("blue [{}]", self.limits.describe())
    }
}
