//! Drop-head: always accept the newcomer, then evict from the front until within bounds.

use super::{PacketQueue, QueueLimits};
use crate::packet::QueuedPacket;
use std::collections::VecDeque;

pub struct DropHeadQueue {
    limits: QueueLimits,
    queue: VecDeque<QueuedPacket>,
    bytes: usize,
}

impl DropHeadQueue {
    pub fn new(limits: QueueLimits) -> Self {
        DropHeadQueue {
            limits,
            queue: VecDeque::new(),
            bytes: 0,
        }
    }
}

impl PacketQueue for DropHeadQueue {
    fn enqueue(&mut self, packet: QueuedPacket) {
        self.bytes += packet.contents.len();
        self.queue.push_back(packet);

        while !self.limits.admits(self.queue.len(), self.bytes) {
            let evicted = self
                .queue
                .pop_front()
                .expect("bounded queue cannot be over limit while empty");
            self.bytes -= evicted.contents.len();
        }
    }

    fn dequeue(&mut self) -> Option<QueuedPacket> {
        let packet = self.queue.pop_front()?;
        self.bytes -= packet.contents.len();
        Some(packet)
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
        format!("drophead [{}]", self.limits.describe())
    }
}
