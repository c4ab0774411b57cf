//! Append-only event log for the link queue.
//!
//! Plain text, one event per line, with a fixed header written at construction. The line formats
//! are a compatibility contract with existing mahimahi log tooling and must not change:
//!
//! ```text
//! <t> + <size>            packet arrival
//! <t> # <size>            delivery opportunity offered
//! <t> - <size> <delay>    packet departure, delay = t - arrival_time
//! <t> d <pkts> <bytes>    drop(s) at the discipline
//! ```

use crate::clock::initial_timestamp;
use std::io::{self, Write};

/// Identity fields echoed into the log header.
#[derive(Debug, Clone, Default)]
pub struct LogMeta {
    pub link_name: String,
    pub trace_name: String,
    pub log_name: String,
    pub command_line: String,
}

pub struct EventLog {
    writer: Box<dyn Write + Send>,
}

impl EventLog {
    /// Wrap an already-open writer and emit the header.
    pub fn new(
        writer: Box<dyn Write + Send>,
        meta: &LogMeta,
        queue_summary: &str,
        base_timestamp: u64,
    ) -> io::Result<Self> {
        let mut log = EventLog { writer };
        log.write_header(meta, queue_summary, base_timestamp)?;
        Ok(log)
    }

    fn write_header(
        &mut self,
        meta: &LogMeta,
        queue_summary: &str,
        base_timestamp: u64,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "# mahimahi mm-link ({}) [{}] > {}",
            meta.link_name, meta.trace_name, meta.log_name
        )?;
        writeln!(self.writer, "# command line: {}", meta.command_line)?;
        writeln!(self.writer, "# queue: {queue_summary}")?;
        writeln!(self.writer, "# init timestamp: {}", initial_timestamp())?;
        writeln!(self.writer, "# base timestamp: {base_timestamp}")?;
        if let Ok(prefix) = std::env::var("MAHIMAHI_SHELL_PREFIX") {
            writeln!(self.writer, "# mahimahi config: {prefix}")?;
        }
        self.writer.flush()
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.writer.write_fmt(args)?;
        self.writer.flush()
    }

    pub fn arrival(&mut self, t: u64, size: usize) -> io::Result<()> {
        self.line(format_args!("{t} + {size}\n"))
    }

    pub fn opportunity(&mut self, t: u64, size: usize) -> io::Result<()> {
        self.line(format_args!("{t} # {size}\n"))
    }

    pub fn departure(&mut self, t: u64, size: usize, delay: u64) -> io::Result<()> {
        self.line(format_args!("{t} - {size} {delay}\n"))
    }

    pub fn drops(&mut self, t: u64, packets: usize, bytes: usize) -> io::Result<()> {
        self.line(format_args!("{t} d {packets} {bytes}\n"))
    }
}
