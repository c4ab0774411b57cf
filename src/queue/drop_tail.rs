//! Drop-tail: refuse the incoming packet once a bound would be exceeded.

use super::{PacketQueue, QueueLimits};
use crate::packet::QueuedPacket;
use std::collections::VecDeque;

pub struct DropTailQueue {
    limits: QueueLimits,
    queue: VecDeque<QueuedPacket>,
    bytes: usize,
}

impl DropTailQueue {
    pub fn new(limits: QueueLimits) -> Self {
        DropTailQueue {
            limits,
            queue: VecDeque::new(),
            bytes: 0,
        }
    }
}

impl PacketQueue for DropTailQueue {
    fn enqueue(&mut self, packet: QueuedPacket) {
        if self
            .limits
            .admits(self.queue.len() + 1, self.bytes + packet.contents.len())
        {
            self.bytes += packet.contents.len();
            self.queue.push_back(packet);
        }
        debug_assert!(self.limits.admits(self.queue.len(), self.bytes));
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
        format!("droptail [{}]", self.limits.describe())
    }
}
