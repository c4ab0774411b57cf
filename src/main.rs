// Shaper binary.
//
// Picks the discipline (fixed delay or trace-driven link) from the command line, wires the bypass
// classifier from the environment, optionally attaches the event log and the metering feed, and
// ferries frames between the two file descriptors handed down by the surrounding shell until
// EOF or Ctrl+C.

use linkshaper::bypass::BypassFilter;
use linkshaper::clock::MonotonicClock;
use linkshaper::event_log::LogMeta;
use linkshaper::ferry::Ferry;
use linkshaper::meter::{serve_snapshots, MeterHub};
use linkshaper::queue;
use linkshaper::{DelayQueue, LinkQueue, Schedule};

use std::fs::File;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// Fixed one-way delay; selects the delay shaper.
    delay_ms: Option<u64>,
    /// Trace file; selects the link shaper.
    trace: Option<PathBuf>,
    /// Event-log path (link shaper only).
    log: Option<PathBuf>,
    /// Replay the trace forever instead of finishing after one pass.
    repeat: bool,
    /// Queue discipline name (link shaper only).
    queue: String,
    /// Discipline arguments, e.g. "packets=100".
    queue_args: String,
    /// Name echoed into the log header.
    link_name: String,
    /// Bind address for the snapshot TCP feed; enables metering.
    meter_bind: Option<String>,
    input_fd: RawFd,
    output_fd: RawFd,
}

impl Default for CliOptions {
    fn default() -> Self {
        CliOptions {
            delay_ms: None,
            trace: None,
            log: None,
            repeat: false,
            queue: String::from("infinite"),
            queue_args: String::new(),
            link_name: String::from("link"),
            meter_bind: None,
            input_fd: 0,
            output_fd: 1,
        }
    }
}

/// Append the default port when the bind address has none.
fn normalize_meter_bind(value: &str) -> String {
    if value.contains(':') {
        value.to_string()
    } else {
        format!("{value}:9999")
    }
}

fn apply_option(
    options: &mut CliOptions,
    key: &str,
    value: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let value = value.ok_or_else(|| format!("{key}: missing value"))?;
    match key {
        "--delay-ms" => {
            options.delay_ms =
                Some(value.parse().map_err(|_| format!("{key}: not an integer"))?)
        }
        "--trace" => options.trace = Some(PathBuf::from(value)),
        "--log" => options.log = Some(PathBuf::from(value)),
        "--queue" => options.queue = value,
        "--queue-args" => options.queue_args = value,
        "--link-name" => options.link_name = value,
        "--meter-bind" => options.meter_bind = Some(normalize_meter_bind(&value)),
        "--input-fd" => {
            options.input_fd = value.parse().map_err(|_| format!("{key}: not an fd"))?
        }
        "--output-fd" => {
            options.output_fd = value.parse().map_err(|_| format!("{key}: not an fd"))?
        }
        _ => return Err(format!("unknown option {key}").into()),
    }
    Ok(())
}

/// Parse arguments in both `--key=value` and `--key value` forms.
fn parse_cli_options() -> Result<CliOptions, Box<dyn std::error::Error + Send + Sync>> {
    let mut options = CliOptions::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if arg == "--repeat" {
            options.repeat = true;
        } else if let Some((key, value)) = arg.split_once('=') {
            apply_option(&mut options, key, Some(value.to_string()))?;
        } else {
            let value = args.next();
            apply_option(&mut options, &arg, value)?;
        }
    }

    match (&options.delay_ms, &options.trace) {
        (Some(_), Some(_)) => Err("choose one of --delay-ms and --trace".into()),
        (None, None) => Err("one of --delay-ms or --trace is required".into()),
        _ => Ok(options),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let options = parse_cli_options()?;
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let filter = BypassFilter::from_env()?;
    let clock = Arc::new(MonotonicClock);

    // Ctrl+C clears the flag; the ferry notices between waits and tears down cleanly.
    let running = Arc::new(AtomicBool::new(true));
    let running_signal = running.clone();
    ctrlc::set_handler(move || {
        running_signal.store(false, Ordering::Relaxed);
    })?;

    // Metering is optional; when on, snapshots are served as JSON lines over TCP.
    let meter = match &options.meter_bind {
        Some(bind) => {
            let (handle, snapshots) = MeterHub::spawn(clock.clone());
            let bind = bind.clone();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
                rt.block_on(async {
                    if let Err(e) = serve_snapshots(&bind, snapshots).await {
                        eprintln!("meter feed error: {e}");
                    }
                });
            });
            Some(handle)
        }
        None => None,
    };

    let ferry = Ferry::new(options.input_fd, options.output_fd, running);

    if let Some(delay_ms) = options.delay_ms {
        let mut shaper = DelayQueue::new(delay_ms, filter, clock);
        return ferry.run(&mut shaper);
    }

    let trace = options.trace.expect("trace is set when delay is not");
    let schedule = Schedule::load(&trace)?;
    let packet_queue = queue::from_spec(&options.queue, &options.queue_args, clock.clone())?;

    let mut link = LinkQueue::new(schedule, packet_queue, filter, clock, options.repeat);

    if let Some(log_path) = &options.log {
        let file = File::create(log_path)
            .map_err(|e| format!("{}: error opening for writing: {e}", log_path.display()))?;
        let meta = LogMeta {
            link_name: options.link_name.clone(),
            trace_name: trace.display().to_string(),
            log_name: log_path.display().to_string(),
            command_line,
        };
        link = link.with_log(Box::new(file), meta)?;
    }

    if let Some(handle) = meter {
        link = link.with_meter(handle);
    }

    ferry.run(&mut link)
}
