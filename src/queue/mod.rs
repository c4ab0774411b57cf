//! Pluggable packet-queue disciplines.
//!
//! The link queue owns exactly one discipline, chosen by name at startup. Disciplines may drop
//! internally (tail, head, or AQM); the link queue never asks them about drops and instead detects
//! shortfalls by size accounting around `enqueue`.

use crate::clock::Clock;
use crate::packet::QueuedPacket;
use std::sync::Arc;

mod blue;
mod codel;
mod drop_head;
mod drop_tail;
mod infinite;

pub use blue::BlueQueue;
pub use codel::CodelQueue;
pub use drop_head::DropHeadQueue;
pub use drop_tail::DropTailQueue;
pub use infinite::InfiniteQueue;

/// Abstract queue discipline interposed between ingress and the scheduler.
pub trait PacketQueue: Send {
    /// Offer a packet. The discipline may silently refuse it or evict others.
    fn enqueue(&mut self, packet: QueuedPacket);

    /// Remove the next packet to transmit, if any.
    fn dequeue(&mut self) -> Option<QueuedPacket>;

    fn is_empty(&self) -> bool;

    fn size_packets(&self) -> usize;

    fn size_bytes(&self) -> usize;

    /// Human description echoed into the event-log header.
    fn summary(&self) -> String;
}

/// Packet-count and byte-count bounds shared by the dropping disciplines.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    packet_limit: Option<usize>,
    byte_limit: Option<usize>,
}

impl QueueLimits {
    pub fn new(packet_limit: Option<usize>, byte_limit: Option<usize>) -> Self {
        QueueLimits {
            packet_limit,
            byte_limit,
        }
    }

    /// Would a queue holding `packets`/`bytes` still be within bounds?
    pub fn admits(&self, packets: usize, bytes: usize) -> bool {
        if let Some(limit) = self.packet_limit {
            if packets > limit {
                return false;
            }
        }
        if let Some(limit) = self.byte_limit {
            if bytes > limit {
                return false;
            }
        }
        true
    }

    pub fn is_bounded(&self) -> bool {
        self.packet_limit.is_some() || self.byte_limit.is_some()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = self.packet_limit {
            parts.push(format!("packets={p}"));
        }
        if let Some(b) = self.byte_limit {
            parts.push(format!("bytes={b}"));
        }
        parts.join(", ")
    }
}

/// Key-value arguments of the form `packets=100,bytes=64000`.
fn parse_args(args: &str) -> Result<Vec<(String, u64)>, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed = Vec::new();
    for piece in args.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (key, value) = piece
            .split_once('=')
            .ok_or_else(|| format!("queue argument {piece:?} is not of the form key=value"))?;
        let value: u64 = value
            .parse()
            .map_err(|_| format!("queue argument {piece:?} has a non-integer value"))?;
        parsed.push((key.to_string(), value));
    }
    Ok(parsed)
}

fn limits_from_args(
    kind: &str,
    args: &[(String, u64)],
) -> Result<QueueLimits, Box<dyn std::error::Error + Send + Sync>> {
    let mut packet_limit = None;
    let mut byte_limit = None;
    for (key, value) in args {
        match key.as_str() {
            "packets" => packet_limit = Some(*value as usize),
            "bytes" => byte_limit = Some(*value as usize),
            other => return Err(format!("{kind}: unknown queue argument {other:?}").into()),
        }
    }
    Ok(QueueLimits::new(packet_limit, byte_limit))
}

/// Build a discipline from its string name and argument list.
///
/// Unknown names and malformed arguments are fatal configuration errors.
pub fn from_spec(
    name: &str,
    args: &str,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn PacketQueue>, Box<dyn std::error::Error + Send + Sync>> {
    let parsed = parse_args(args)?;
    match name {
        "infinite" => {
            if !parsed.is_empty() {
                return Err("infinite: queue takes no arguments".into());
            }
            Ok(Box::new(InfiniteQueue::new()))
        }
        "droptail" => {
            let limits = limits_from_args("droptail", &parsed)?;
            if !limits.is_bounded() {
                return Err(
                    "droptail: needs a packets or bytes limit (or use the infinite queue)".into(),
                );
            }
            Ok(Box::new(DropTailQueue::new(limits)))
        }
        "drophead" => {
            let limits = limits_from_args("drophead", &parsed)?;
            if !limits.is_bounded() {
                return Err(
                    "drophead: needs a packets or bytes limit (or use the infinite queue)".into(),
                );
            }
            Ok(Box::new(DropHeadQueue::new(limits)))
        }
        "blue" => {
            let limits = limits_from_args("blue", &parsed)?;
            if !limits.is_bounded() {
                return Err(
                    "blue: needs a packets or bytes limit (or use the infinite queue)".into(),
                );
            }
            Ok(Box::new(BlueQueue::new(
                limits,
                blue::DEFAULT_INCREMENT,
                blue::DEFAULT_DECREMENT,
                blue::DEFAULT_FREEZE_MS,
                clock,
            )))
        }
        "codel" => {
            let mut target_ms = codel::DEFAULT_TARGET_MS;
            let mut interval_ms = codel::DEFAULT_INTERVAL_MS;
            let mut packet_limit = None;
            for (key, value) in &parsed {
                match key.as_str() {
                    "target" => target_ms = *value,
                    "interval" => interval_ms = *value,
                    "packets" => packet_limit = Some(*value as usize),
                    other => return Err(format!("codel: unknown queue argument {other:?}").into()),
                }
            }
            Ok(Box::new(CodelQueue::new(
                target_ms,
                interval_ms,
                packet_limit,
                clock,
            )))
        }
        other => Err(format!("unknown queue discipline {other:?}").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn factory_builds_each_discipline() {
        let clock = ManualClock::new(0);
        for (name, args) in [
            ("infinite", ""),
            ("droptail", "packets=10"),
            ("droptail", "bytes=64000"),
            ("drophead", "packets=10,bytes=64000"),
            ("blue", "packets=100"),
            ("codel", "target=5,interval=100"),
        ] {
            let q = from_spec(name, args, clock.clone()).unwrap();
            assert!(q.is_empty());
            assert!(q.summary().starts_with(name));
        }
    }

    #[test]
    fn factory_rejects_bad_specs() {
        let clock = ManualClock::new(0);
        assert!(from_spec("red", "", clock.clone()).is_err());
        assert!(from_spec("droptail", "", clock.clone()).is_err());
        assert!(from_spec("droptail", "packets=ten", clock.clone()).is_err());
        assert!(from_spec("droptail", "frames=10", clock.clone()).is_err());
        assert!(from_spec("codel", "bytes=1", clock.clone()).is_err());
        assert!(from_spec("infinite", "packets=1", clock).is_err());
    }

    #[test]
    fn limits_check_both_dimensions() {
        let limits = QueueLimits::new(Some(2), Some(1000));
        assert!(limits.admits(2, 1000));
        assert!(!limits.admits(3, 10));
        assert!(!limits.admits(1, 1001));
        assert_eq!(limits.describe(), "packets=2, bytes=1000");
    }
}
