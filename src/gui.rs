//! Live throughput/delay viewer.
//!
//! Connects to a running shaper's snapshot feed over TCP and plots the three throughput signals
//! and the worst-per-bin queueing delay. Runs as its own process so the window never shares a
//! thread with the packet path.

use crate::meter::MeterSnapshot;
use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Cap on retained points per signal; at 500 ms bins this is over an hour of history.
const MAX_POINTS: usize = 10_000;

#[derive(Default)]
struct GraphHistory {
    arrivals: Vec<[f64; 2]>,
    opportunities: Vec<[f64; 2]>,
    departures: Vec<[f64; 2]>,
    delays: Vec<[f64; 2]>,
}

impl GraphHistory {
    fn extend(&mut self, snapshot: &MeterSnapshot) {
        for (series, points) in [
            (&mut self.arrivals, &snapshot.arrivals),
            (&mut self.opportunities, &snapshot.opportunities),
            (&mut self.departures, &snapshot.departures),
            (&mut self.delays, &snapshot.delays),
        ] {
            series.extend(points.iter().map(|&(t, v)| [t, v]));
            if series.len() > MAX_POINTS {
                let excess = series.len() - MAX_POINTS;
                series.drain(..excess);
            }
        }
    }
}

/// Run the viewer window, reading snapshots from `server_addr` until closed.
pub fn run_gui_client(server_addr: &str, shutdown_flag: Arc<AtomicBool>) {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 720.0])
            .with_title("linkshaper monitor"),
        ..Default::default()
    };

    let history = Arc::new(Mutex::new(GraphHistory::default()));
    let history_feed = history.clone();
    let connected = Arc::new(AtomicBool::new(false));
    let connected_feed = connected.clone();

    // Reader thread: reconnects until shutdown, appending every decoded snapshot.
    let server_addr = server_addr.to_string();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            use tokio::io::AsyncBufReadExt;
            loop {
                if shutdown_flag.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }
                match tokio::net::TcpStream::connect(&server_addr).await {
                    Ok(stream) => {
                        connected_feed.store(true, std::sync::atomic::Ordering::Relaxed);
                        let mut reader = tokio::io::BufReader::new(stream);
                        let mut line = String::new();
                        loop {
                            line.clear();
                            match reader.read_line(&mut line).await {
                                Ok(0) => break,
                                Ok(_) => {
                                    match serde_json::from_str::<MeterSnapshot>(line.trim()) {
                                        Ok(snapshot) => {
                                            history_feed.lock().unwrap().extend(&snapshot);
                                        }
                                        Err(e) => {
                                            eprintln!("[gui] bad snapshot line: {e}");
                                        }
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                        connected_feed.store(false, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(_) => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });
    });

    eframe::run_simple_native("linkshaper monitor", options, move |ctx, _frame| {
        // Poll for new points even when the mouse is idle.
        ctx.request_repaint_after(Duration::from_millis(250));

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Link throughput and queueing delay");
            if !connected.load(std::sync::atomic::Ordering::Relaxed) {
                ui.label("Waiting for the shaper's snapshot feed...");
            }
            ui.separator();

            let history = history.lock().unwrap();

            ui.label("throughput (Mbps)");
            Plot::new("throughput")
                .height(300.0)
                .allow_scroll(false)
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::from(history.opportunities.clone()))
                            .color(egui::Color32::from_rgb(0, 0, 160))
                            .name("capacity"),
                    );
                    plot_ui.line(
                        Line::new(PlotPoints::from(history.arrivals.clone()))
                            .color(egui::Color32::from_rgb(255, 0, 0))
                            .name("arrivals"),
                    );
                    plot_ui.line(
                        Line::new(PlotPoints::from(history.departures.clone()))
                            .color(egui::Color32::from_rgb(150, 0, 0))
                            .name("departures"),
                    );
                });

            ui.label("queueing delay (ms)");
            Plot::new("delay")
                .height(220.0)
                .allow_scroll(false)
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::from(history.delays.clone()))
                            .color(egui::Color32::from_rgb(0, 64, 0))
                            .name("max delay"),
                    );
                });
        });
    })
    .unwrap();
}
