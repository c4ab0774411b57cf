//! Throughput and delay metering.
//!
//! The link queue emits fire-and-forget samples through a [`MeterHandle`]; a collector thread
//! folds them into binned time series and periodically publishes a [`MeterSnapshot`]. Metering is
//! side-effect-only: the hot path never blocks on it, and a full channel loses samples rather
//! than stall the emulation. Snapshots can be served to viewers as JSON lines over TCP.

use crate::clock::Clock;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Throughput graphs sum bytes per 500 ms bin and display Mbps.
pub const THROUGHPUT_BIN_MS: u64 = 500;
pub const THROUGHPUT_SCALE: f64 = 8.0 / 1_000_000.0;

/// The delay graph keeps the worst queueing delay per 250 ms bin.
pub const DELAY_BIN_MS: u64 = 250;

/// How a bin folds the samples landing in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinMode {
    /// Accumulate; empty bins close at zero.
    Sum,
    /// Keep the maximum; empty bins close without a point.
    Max,
}

/// Binned time-series accumulator.
///
/// Values are folded per bin of `bin_width_ms`; closing a bin emits a `(seconds, value)` point,
/// scaled by `multiplier` and, for rate quantities, divided by the bin width.
#[derive(Debug)]
pub struct BinnedSeries {
    bin_width_ms: u64,
    multiplier: f64,
    rate_quantity: bool,
    mode: BinMode,
    current_bin: u64,
    value: Option<u64>,
    points: Vec<(f64, f64)>,
}

impl BinnedSeries {
    pub fn new(
        bin_width_ms: u64,
        multiplier: f64,
        rate_quantity: bool,
        mode: BinMode,
        start_ms: u64,
    ) -> Self {
        BinnedSeries {
            bin_width_ms,
            multiplier,
            rate_quantity,
            mode,
            current_bin: start_ms / bin_width_ms,
            value: match mode {
                BinMode::Sum => Some(0),
                BinMode::Max => None,
            },
            points: Vec::new(),
        }
    }

    fn scaled(&self, raw: u64) -> f64 {
        let mut value = raw as f64 * self.multiplier;
        if self.rate_quantity {
            value /= self.bin_width_ms as f64 / 1000.0;
        }
        value
    }

    /// Close every bin that ends at or before `now_ms`.
    pub fn advance(&mut self, now_ms: u64) {
        let now_bin = now_ms / self.bin_width_ms;
        while self.current_bin < now_bin {
            let bin_end_s = (self.current_bin + 1) as f64 * self.bin_width_ms as f64 / 1000.0;
            match (self.mode, self.value) {
                (BinMode::Sum, Some(raw)) => self.points.push((bin_end_s, self.scaled(raw))),
                (BinMode::Max, Some(raw)) => self.points.push((bin_end_s, self.scaled(raw))),
                (BinMode::Max, None) => {}
                (BinMode::Sum, None) => unreachable!("sum bins always hold a value"),
            }
            self.value = match self.mode {
                BinMode::Sum => Some(0),
                BinMode::Max => None,
            };
            self.current_bin += 1;
        }
    }

    /// Fold `amount` into the bin containing `now_ms` (sum semantics).
    pub fn add(&mut self, now_ms: u64, amount: u64) {
        self.advance(now_ms);
        debug_assert_eq!(self.mode, BinMode::Sum);
        self.value = Some(self.value.unwrap_or(0) + amount);
    }

    /// Raise the bin containing `now_ms` to at least `amount` (max semantics).
    pub fn set_max(&mut self, now_ms: u64, amount: u64) {
        self.advance(now_ms);
        debug_assert_eq!(self.mode, BinMode::Max);
        self.value = Some(self.value.map_or(amount, |v| v.max(amount)));
    }

    /// Points completed since the last call.
    pub fn take_points(&mut self) -> Vec<(f64, f64)> {
        std::mem::take(&mut self.points)
    }
}

/// One metering sample, timestamped with engine time.
#[derive(Debug, Clone, Copy)]
pub enum MeterEvent {
    Arrival { t: u64, bytes: usize },
    Opportunity { t: u64, bytes: usize },
    Departure { t: u64, bytes: usize },
    Delay { t: u64, delay_ms: u64 },
}

/// Cheap cloneable handle held by the engine; all sends are non-blocking.
#[derive(Debug, Clone)]
pub struct MeterHandle {
    tx: Sender<MeterEvent>,
}

impl MeterHandle {
    fn send(&self, event: MeterEvent) {
        // A full or closed channel loses the sample; the packet path never blocks on display.
        let _ = self.tx.try_send(event);
    }

    pub fn arrival(&self, t: u64, bytes: usize) {
        self.send(MeterEvent::Arrival { t, bytes });
    }

    pub fn opportunity(&self, t: u64, bytes: usize) {
        self.send(MeterEvent::Opportunity { t, bytes });
    }

    pub fn departure(&self, t: u64, bytes: usize) {
        self.send(MeterEvent::Departure { t, bytes });
    }

    pub fn delay(&self, t: u64, delay_ms: u64) {
        self.send(MeterEvent::Delay { t, delay_ms });
    }
}

/// Incremental batch of completed graph points.
///
/// Throughput points are `(seconds, Mbps)`; delay points are `(seconds, worst queueing delay ms)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub arrivals: Vec<(f64, f64)>,
    pub opportunities: Vec<(f64, f64)>,
    pub departures: Vec<(f64, f64)>,
    pub delays: Vec<(f64, f64)>,
}

impl MeterSnapshot {
    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
            && self.opportunities.is_empty()
            && self.departures.is_empty()
            && self.delays.is_empty()
    }
}

/// Collector thread folding meter events into the binned series.
pub struct MeterHub;

impl MeterHub {
    /// Spawn the collector; returns the engine-side handle and the snapshot stream.
    ///
    /// The thread exits once every [`MeterHandle`] clone is gone and the channel drains.
    pub fn spawn(clock: Arc<dyn Clock>) -> (MeterHandle, Receiver<MeterSnapshot>) {
        let (event_tx, event_rx) = bounded::<MeterEvent>(4096);
        let (snapshot_tx, snapshot_rx) = bounded::<MeterSnapshot>(64);

        std::thread::spawn(move || {
            let start = clock.now();
            let mut arrivals = BinnedSeries::new(
                THROUGHPUT_BIN_MS,
                THROUGHPUT_SCALE,
                true,
                BinMode::Sum,
                start,
            );
            let mut opportunities = BinnedSeries::new(
                THROUGHPUT_BIN_MS,
                THROUGHPUT_SCALE,
                true,
                BinMode::Sum,
                start,
            );
            let mut departures = BinnedSeries::new(
                THROUGHPUT_BIN_MS,
                THROUGHPUT_SCALE,
                true,
                BinMode::Sum,
                start,
            );
            let mut delays = BinnedSeries::new(DELAY_BIN_MS, 1.0, false, BinMode::Max, start);

            loop {
                match event_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => match event {
                        MeterEvent::Arrival { t, bytes } => arrivals.add(t, bytes as u64),
                        MeterEvent::Opportunity { t, bytes } => {
                            opportunities.add(t, bytes as u64)
                        }
                        MeterEvent::Departure { t, bytes } => departures.add(t, bytes as u64),
                        MeterEvent::Delay { t, delay_ms } => delays.set_max(t, delay_ms),
                    },
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        // Bins keep closing on the live clock even when the link is idle.
                        let now = clock.now();
                        arrivals.advance(now);
                        opportunities.advance(now);
                        departures.advance(now);
                        delays.advance(now);
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }

                let snapshot = MeterSnapshot {
                    arrivals: arrivals.take_points(),
                    opportunities: opportunities.take_points(),
                    departures: departures.take_points(),
                    delays: delays.take_points(),
                };
                if !snapshot.is_empty() {
                    // A slow or absent viewer never backpressures the collector.
                    let _ = snapshot_tx.try_send(snapshot);
                }
            }
        });

        (MeterHandle { tx: event_tx }, snapshot_rx)
    }
}

/// Serve snapshots as JSON lines to every connected viewer.
///
/// Runs until the snapshot stream disconnects.
pub async fn serve_snapshots(
    bind: &str,
    snapshots: Receiver<MeterSnapshot>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::io::AsyncWriteExt;
    use tokio::sync::broadcast;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let (tx, _) = broadcast::channel::<String>(100);

    let feed_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            match snapshots.try_recv() {
                Ok(snapshot) => {
                    if let Ok(json) = serde_json::to_string(&snapshot) {
                        let _ = feed_tx.send(format!("{json}\n"));
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(crossbeam_channel::TryRecvError::Disconnected) => break,
            }
        }
    });

    loop {
        let (mut stream, _addr) = listener.accept().await?;
        let mut rx = tx.subscribe();
        tokio::spawn(async move {
            while let Ok(line) = rx.recv().await {
                if stream.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn sum_bins_close_at_zero_when_idle() {
        let mut s = BinnedSeries::new(500, 1.0, false, BinMode::Sum, 0);
        s.add(100, 40);
        s.add(400, 2);
        s.advance(1500);
        let points = s.take_points();
        assert_eq!(points, vec![(0.5, 42.0), (1.0, 0.0), (1.5, 0.0)]);
    }

    #[test]
    fn rate_bins_scale_to_per_second() {
        // 500 ms bins, Mbps scaling: 62_500 bytes in one bin = 1 Mbps.
        let mut s = BinnedSeries::new(
            THROUGHPUT_BIN_MS,
            THROUGHPUT_SCALE,
            true,
            BinMode::Sum,
            0,
        );
        s.add(0, 62_500);
        s.advance(500);
        let points = s.take_points();
        assert_eq!(points.len(), 1);
        assert!((points[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn max_bins_keep_the_worst_sample_and_skip_empty_bins() {
        let mut s = BinnedSeries::new(250, 1.0, false, BinMode::Max, 0);
        s.set_max(10, 4);
        s.set_max(200, 9);
        s.set_max(100, 7);
        s.advance(1000);
        let points = s.take_points();
        assert_eq!(points, vec![(0.25, 9.0)]);
    }

    #[test]
    fn hub_folds_events_into_snapshots() {
        let clock = ManualClock::new(0);
        let (handle, snapshots) = MeterHub::spawn(clock.clone());

        handle.arrival(100, 62_500);
        handle.delay(100, 33);
        clock.set(1000);
        // The next idle tick closes the bins.
        let snapshot = snapshots
            .recv_timeout(Duration::from_secs(5))
            .expect("collector never published");
        assert!(!snapshot.arrivals.is_empty());
        assert_eq!(snapshot.delays, vec![(0.25, 33.0)]);
        drop(handle);
    }
}
