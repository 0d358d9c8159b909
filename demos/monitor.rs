//! Connect to the temperature sensor and print its readings.
//!
//! Run with: cargo run --example monitor [-- <prefs-file>]

use std::sync::Arc;
use thermo_sensor_ble::{
    celsius_to_fahrenheit, event_channel, BtleplugRadio, DeviceAddress, FileReadingStore,
    ManagerConfig, Result, ScanFailureCode, SensorManager, StateChangeListener,
};

/// Prints every state change to stdout.
struct PrintingListener;

impl StateChangeListener for PrintingListener {
    fn on_scan_started(&mut self) {
        println!("Scanning...");
    }

    fn on_scan_failed(&mut self, code: ScanFailureCode) {
        println!("Scan failed: {} (code {})", code, code.code());
    }

    fn on_device_connected(&mut self, address: &DeviceAddress) {
        println!("Connected to {}", address);
        println!("Press Ctrl+C to exit.\n");
    }

    fn on_device_disconnected(&mut self) {
        println!("Disconnected");
    }

    fn on_temperature_update(&mut self, celsius: f32) {
        println!(
            "Temperature: {:.1}°C ({:.1}°F)",
            celsius,
            celsius_to_fahrenheit(celsius)
        );
    }

    fn on_connection_attempt(&mut self, attempt: u32) {
        println!("Reconnecting (attempt {})...", attempt);
    }

    fn on_error(&mut self, message: &str, is_critical: bool) {
        if is_critical {
            println!("Error: {}", message);
        } else {
            println!("Warning: {}", message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Temperature Sensor Monitor");
    println!("==========================\n");

    let (queue, events) = event_channel();
    let radio = BtleplugRadio::new(queue.radio_sender()).await?;

    let mut manager = SensorManager::new(radio, ManagerConfig::default(), &queue)?
        .with_listener(PrintingListener);
    if let Some(path) = std::env::args().nth(1) {
        manager = manager.with_store(Arc::new(FileReadingStore::new(path)));
    }

    let handle = manager.spawn(events);
    handle.start_scan()?;

    tokio::signal::ctrl_c().await?;
    println!("\nExiting...");

    handle.shutdown()?;
    Ok(())
}
