//! Bypass classifier.
//!
//! Inspects the IPv4 header of each raw frame and routes matching traffic around shaping. The
//! configured addresses come from `SRC_TO_IGNORE` and `DEST_TO_IGNORE`, resolved once at startup.
//! Parsing works directly on the input slice: no per-packet allocation, no DNS, no payload
//! interpretation beyond the two address fields.

use std::net::Ipv4Addr;
use std::str::FromStr;

/// TUN frame prefix: 2-byte protocol tag plus the 14-byte Ethernet header.
pub const ETHERNET_HEADER_LEN: usize = 16;

/// Minimum IPv4 header length; frames shorter than the prefix are never bypassed.
pub const IPV4_HEADER_MIN_LEN: usize = 20;

const SRC_ADDR_OFFSET: usize = ETHERNET_HEADER_LEN + 12;
const DST_ADDR_OFFSET: usize = ETHERNET_HEADER_LEN + 16;

/// Classifier verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Route around all shaping.
    Bypass,
    /// Subject to the configured delay or link discipline.
    Shape,
}

/// The configured `(src, dst)` ignore pair, held as network-byte-order words.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassFilter {
    src: Option<u32>,
    dst: Option<u32>,
}

impl BypassFilter {
    pub fn new(src: Option<Ipv4Addr>, dst: Option<Ipv4Addr>) -> Self {
        BypassFilter {
            src: src.map(|a| u32::from_be_bytes(a.octets())),
            dst: dst.map(|a| u32::from_be_bytes(a.octets())),
        }
    }

    /// A filter that matches nothing; every frame shapes.
    pub fn disabled() -> Self {
        BypassFilter::default()
    }

    /// Resolve the filter from `SRC_TO_IGNORE` / `DEST_TO_IGNORE`.
    ///
    /// An address that does not parse as a dotted quad is a configuration error and fails
    /// startup rather than silently disabling the match.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let src = parse_env_addr("SRC_TO_IGNORE")?;
        let dst = parse_env_addr("DEST_TO_IGNORE")?;
        Ok(BypassFilter::new(src, dst))
    }

    /// Decide whether `frame` goes around shaping.
    ///
    /// Short or malformed frames (including anything that is not IPv4) classify as [`Verdict::Shape`];
    /// unknown traffic is never bypassed.
    pub fn classify(&self, frame: &[u8]) -> Verdict {
        if self.src.is_none() && self.dst.is_none() {
            return Verdict::Shape;
        }
        if frame.len() < ETHERNET_HEADER_LEN + IPV4_HEADER_MIN_LEN {
            return Verdict::Shape;
        }

        if let Some(src) = self.src {
            if addr_at(frame, SRC_ADDR_OFFSET) == src {
                return Verdict::Bypass;
            }
        }
        if let Some(dst) = self.dst {
            if addr_at(frame, DST_ADDR_OFFSET) == dst {
                return Verdict::Bypass;
            }
        }

        Verdict::Shape
    }
}

#[inline]
fn addr_at(frame: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

fn parse_env_addr(
    name: &str,
) -> Result<Option<Ipv4Addr>, Box<dyn std::error::Error + Send + Sync>> {
    match std::env::var(name) {
        Ok(value) => {
            let addr = Ipv4Addr::from_str(&value)
                .map_err(|_| format!("{name}: invalid IPv4 address {value:?}"))?;
            Ok(Some(addr))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a TUN-framed IPv4 packet with the given source and destination addresses.
    fn frame(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut f = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_MIN_LEN + 8];
        f[ETHERNET_HEADER_LEN] = 0x45; // version 4, IHL 5
        f[SRC_ADDR_OFFSET..SRC_ADDR_OFFSET + 4].copy_from_slice(&src.octets());
        f[DST_ADDR_OFFSET..DST_ADDR_OFFSET + 4].copy_from_slice(&dst.octets());
        f
    }

    #[test]
    fn matches_configured_source() {
        let filter = BypassFilter::new(Some(Ipv4Addr::new(10, 0, 0, 1)), None);
        let hit = frame(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(8, 8, 8, 8));
        let miss = frame(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(filter.classify(&hit), Verdict::Bypass);
        assert_eq!(filter.classify(&miss), Verdict::Shape);
    }

    #[test]
    fn matches_configured_destination() {
        let filter = BypassFilter::new(None, Some(Ipv4Addr::new(192, 168, 1, 7)));
        let hit = frame(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(filter.classify(&hit), Verdict::Bypass);
    }

    #[test]
    fn source_match_wins_over_destination_miss() {
        let filter = BypassFilter::new(
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            Some(Ipv4Addr::new(192, 168, 1, 7)),
        );
        let hit = frame(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(4, 4, 4, 4));
        assert_eq!(filter.classify(&hit), Verdict::Bypass);
    }

    #[test]
    fn short_frames_shape() {
        let filter = BypassFilter::new(Some(Ipv4Addr::new(10, 0, 0, 1)), None);
        let short = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_MIN_LEN - 1];
        assert_eq!(filter.classify(&short), Verdict::Shape);
        assert_eq!(filter.classify(&[]), Verdict::Shape);
    }

    #[test]
    fn unconfigured_filter_never_bypasses() {
        let filter = BypassFilter::disabled();
        let f = frame(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(filter.classify(&f), Verdict::Shape);
    }
}
