//! Delivery-opportunity schedule loaded from a trace file.
//!
//! One nonnegative decimal millisecond offset per line; each line is one `PACKET_SIZE`-byte
//! delivery opportunity. Validation is strict and every failure names the file: an unusable trace
//! must stop the emulator before any traffic flows.

use std::fs;
use std::path::Path;

/// Ordered, validated list of delivery-opportunity offsets.
#[derive(Debug, Clone)]
pub struct Schedule {
    slots: Vec<u64>,
}

impl Schedule {
    /// Load and validate a trace file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let name = path.display();
        let contents =
            fs::read_to_string(path).map_err(|e| format!("{name}: error opening for reading: {e}"))?;
        Schedule::parse(&contents, &name.to_string())
    }

    /// Parse trace text, with `name` used in diagnostics.
    pub fn parse(contents: &str, name: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut slots: Vec<u64> = Vec::new();

        for line in contents.lines() {
            if line.is_empty() {
                return Err(format!("{name}: invalid empty line").into());
            }

            let ms: u64 = line
                .parse()
                .map_err(|_| format!("{name}: invalid integer {line:?}"))?;

            if let Some(&last) = slots.last() {
                if ms < last {
                    return Err(
                        format!("{name}: timestamps must be monotonically nondecreasing").into(),
                    );
                }
            }

            slots.push(ms);
        }

        if slots.is_empty() {
            return Err(format!("{name}: no valid timestamps found").into());
        }

        if *slots.last().unwrap() == 0 {
            return Err(format!("{name}: trace must last for a nonzero amount of time").into());
        }

        Ok(Schedule { slots })
    }

    /// Construct directly from offsets; panics on an invalid schedule.
    ///
    /// Test and bench helper; production schedules go through [`Schedule::load`].
    pub fn from_slots(slots: Vec<u64>) -> Self {
        let text = slots
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        Schedule::parse(&text, "inline schedule").expect("invalid inline schedule")
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Offset of slot `i` relative to the base timestamp.
    pub fn offset(&self, i: usize) -> u64 {
        self.slots[i]
    }

    /// Length of one full cycle, added to the base timestamp on each wraparound.
    pub fn cycle_ms(&self) -> u64 {
        *self.slots.last().expect("schedule is never empty")
    }
}
