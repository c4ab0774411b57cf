//! Trace-driven variable-capacity link.
//!
//! The schedule scripts one `PACKET_SIZE`-byte delivery opportunity per listed millisecond.
//! `rationalize` replays every opportunity due by a given time: each one either serializes bytes
//! of queued packets (a packet may span several opportunities but reaches the sink exactly once,
//! whole) or is burned unused when the discipline is empty — which is how an idle link loses
//! capacity. When the schedule ends, repeat mode re-anchors the base timestamp; otherwise the
//! link is finished for good.

use crate::bypass::{BypassFilter, Verdict};
use crate::clock::Clock;
use crate::event_log::{EventLog, LogMeta};
use crate::ferry::Shaper;
use crate::meter::MeterHandle;
use crate::packet::{FrameSink, QueuedPacket, PACKET_SIZE};
use crate::queue::PacketQueue;
use crate::schedule::Schedule;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;

pub struct LinkQueue {
    next_delivery: usize,
    schedule: Schedule,
    base_timestamp: u64,

    packet_queue: Box<dyn PacketQueue>,
    packet_in_transit: Option<QueuedPacket>,
    packet_in_transit_bytes_left: usize,
    output_queue: VecDeque<Vec<u8>>,

    log: Option<EventLog>,
    meter: Option<MeterHandle>,

    filter: BypassFilter,
    clock: Arc<dyn Clock>,
    repeat: bool,
    finished: bool,
}

impl LinkQueue {
    pub fn new(
        schedule: Schedule,
        packet_queue: Box<dyn PacketQueue>,
        filter: BypassFilter,
        clock: Arc<dyn Clock>,
        repeat: bool,
    ) -> Self {
        let base_timestamp = clock.now();
        LinkQueue {
            next_delivery: 0,
            schedule,
            base_timestamp,
            packet_queue,
            packet_in_transit: None,
            packet_in_transit_bytes_left: 0,
            output_queue: VecDeque::new(),
            log: None,
            meter: None,
            filter,
            clock,
            repeat,
            finished: false,
        }
    }

    /// Attach an event log; the header is written immediately.
    pub fn with_log(mut self, writer: Box<dyn Write + Send>, meta: LogMeta) -> io::Result<Self> {
        let log = EventLog::new(
            writer,
            &meta,
            &self.packet_queue.summary(),
            self.base_timestamp,
        )?;
        self.log = Some(log);
        Ok(self)
    }

    /// Attach throughput/delay metering. Display-side only; never affects scheduling.
    pub fn with_meter(mut self, meter: MeterHandle) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    fn next_delivery_time(&self) -> Option<u64> {
        if self.finished {
            None
        } else {
            Some(self.schedule.offset(self.next_delivery) + self.base_timestamp)
        }
    }

    fn record_arrival(&mut self, arrival_time: u64, pkt_size: usize) -> io::Result<()> {
        if let Some(log) = &mut self.log {
            log.arrival(arrival_time, pkt_size)?;
        }
        if let Some(meter) = &self.meter {
            meter.arrival(arrival_time, pkt_size);
        }
        Ok(())
    }

    fn record_drop(&mut self, time: u64, packets_dropped: usize, bytes_dropped: usize) -> io::Result<()> {
        if let Some(log) = &mut self.log {
            log.drops(time, packets_dropped, bytes_dropped)?;
        }
        Ok(())
    }

    fn record_departure_opportunity(&mut self, time: u64) -> io::Result<()> {
        if let Some(log) = &mut self.log {
            log.opportunity(time, PACKET_SIZE)?;
        }
        if let Some(meter) = &self.meter {
            meter.opportunity(time, PACKET_SIZE);
        }
        Ok(())
    }

    fn record_departure(&mut self, departure_time: u64, packet: &QueuedPacket) -> io::Result<()> {
        let delay = departure_time - packet.arrival_time;
        if let Some(log) = &mut self.log {
            log.departure(departure_time, packet.contents.len(), delay)?;
        }
        if let Some(meter) = &self.meter {
            meter.departure(departure_time, packet.contents.len());
            meter.delay(departure_time, delay);
        }
        Ok(())
    }

    /// Consume the current slot and step the schedule, wrapping or finishing at the end.
    fn use_a_delivery_opportunity(&mut self, time: u64) -> io::Result<()> {
        self.record_departure_opportunity(time)?;

        self.next_delivery = (self.next_delivery + 1) % self.schedule.len();

        if self.next_delivery == 0 {
            if self.repeat {
                // Re-anchor so the next cycle's absolute times continue monotonically.
                self.base_timestamp += self.schedule.cycle_ms();
            } else {
                self.finished = true;
            }
        }
        Ok(())
    }

    /// Advance the emulation to `now` by consuming every due delivery opportunity.
    ///
    /// Called before enqueueing arrivals and before reporting the next wake-up, so accounting
    /// always happens against fully caught-up link state.
    fn rationalize(&mut self, now: u64) -> io::Result<()> {
        while let Some(this_delivery_time) = self.next_delivery_time() {
            if this_delivery_time > now {
                break;
            }

            let mut bytes_left_in_this_delivery = PACKET_SIZE;
            self.use_a_delivery_opportunity(this_delivery_time)?;

            while bytes_left_in_this_delivery > 0 {
                if self.packet_in_transit_bytes_left == 0 {
                    match self.packet_queue.dequeue() {
                        None => break,
                        Some(packet) => {
                            self.packet_in_transit_bytes_left = packet.contents.len();
                            self.packet_in_transit = Some(packet);
                        }
                    }
                }

                {
                    let packet = self
                        .packet_in_transit
                        .as_ref()
                        .expect("in-transit packet present while bytes remain");
                    debug_assert!(packet.arrival_time <= this_delivery_time);
                    debug_assert!(self.packet_in_transit_bytes_left <= PACKET_SIZE);
                    debug_assert!(self.packet_in_transit_bytes_left > 0);
                    debug_assert!(self.packet_in_transit_bytes_left <= packet.contents.len());
                }

                let amount_to_send =
                    bytes_left_in_this_delivery.min(self.packet_in_transit_bytes_left);
                self.packet_in_transit_bytes_left -= amount_to_send;
                bytes_left_in_this_delivery -= amount_to_send;

                if self.packet_in_transit_bytes_left == 0 {
                    // Last byte accounted: the packet leaves the link whole.
                    let packet = self
                        .packet_in_transit
                        .take()
                        .expect("in-transit packet present at departure");
                    self.record_departure(this_delivery_time, &packet)?;
                    self.output_queue.push_back(packet.contents);
                }
            }
        }
        Ok(())
    }
}

impl Shaper for LinkQueue {
    fn read_packet(
        &mut self,
        frame: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.filter.classify(frame) == Verdict::Bypass {
            self.output_queue.push_back(frame.to_vec());
            return Ok(());
        }

        let now = self.clock.now();

        if frame.len() > PACKET_SIZE {
            return Err(format!(
                "packet size {} is greater than maximum {PACKET_SIZE}",
                frame.len()
            )
            .into());
        }

        // Realize every opportunity that precedes this arrival before accounting for it.
        self.rationalize(now)?;

        self.record_arrival(now, frame.len())?;

        let bytes_before = self.packet_queue.size_bytes();
        let packets_before = self.packet_queue.size_packets();

        self.packet_queue
            .enqueue(QueuedPacket::new(frame.to_vec(), now));

        debug_assert!(self.packet_queue.size_packets() <= packets_before + 1);
        debug_assert!(self.packet_queue.size_bytes() <= bytes_before + frame.len());

        let missing_packets = packets_before + 1 - self.packet_queue.size_packets();
        let missing_bytes = bytes_before + frame.len() - self.packet_queue.size_bytes();
        if missing_packets > 0 || missing_bytes > 0 {
            self.record_drop(now, missing_packets, missing_bytes)?;
        }

        Ok(())
    }

    fn write_packets(
        &mut self,
        sink: &mut dyn FrameSink,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        while let Some(frame) = self.output_queue.front() {
            match sink.write_frame(frame) {
                Ok(()) => {
                    self.output_queue.pop_front();
                }
                // Sink not ready: keep the frame buffered for the next writable event.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn wait_time(&mut self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let now = self.clock.now();
        self.rationalize(now)?;

        match self.next_delivery_time() {
            Some(next) => Ok(next.saturating_sub(now)),
            None => Ok(u64::MAX),
        }
    }

    fn pending_output(&self) -> bool {
        !self.output_queue.is_empty()
    }
}
