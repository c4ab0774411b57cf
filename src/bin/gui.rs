// Graph viewer binary - connects to a running shaper via its TCP snapshot feed.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9999".to_string());

    println!("Connecting to shaper snapshot feed on {server_addr}...");
    println!("Start the shaper with --meter-bind={server_addr} if you have not.");

    let shutdown_flag = Arc::new(AtomicBool::new(false));

    // The window must own the main thread; the TCP reader runs beside it.
    linkshaper::gui::run_gui_client(&server_addr, shutdown_flag);

    Ok(())
}
