//! Unbounded FIFO, the default discipline.

use super::PacketQueue;
use crate::packet::QueuedPacket;
use std::collections::VecDeque;

pub struct InfiniteQueue {
    queue: VecDeque<QueuedPacket>,
    bytes: usize,
}

impl InfiniteQueue {
    pub fn new() -> Self {
        InfiniteQueue {
            queue: VecDeque::new(),
            bytes: 0,
        }
    }
}

impl Default for InfiniteQueue {
    fn default() -> Self {
        InfiniteQueue::new()
    }
}

impl PacketQueue for InfiniteQueue {
    fn enqueue(&mut self, packet: QueuedPacket) {
        self.bytes += packet.contents.len();
        self.queue.push_back(packet);
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
        "infinite".to_string()
    }
}
