use std::{thread, time::Duration};

use monitor_control::{Listener, MonitorMap};
use tracing_subscriber::EnvFilter;

fn print_names(kind: &str, names: &[String], monitors: &MonitorMap) {
    for name in names {
        match monitors.get(name) {
            Some(monitor) => println!(
                "{kind} ... name = {name}, position = {:?}, size = {:?}",
                monitor.position, monitor.size
            ),
            None => println!("{kind} ... name = {name}"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let on_plug = Listener::new(|names, monitors| print_names("Plugged", names, monitors));
    let on_change = Listener::new(|names, monitors| print_names("Changed", names, monitors));

    monitor_control::enable_watchdog(
        Some(Duration::from_millis(250)),
        Some(on_plug),
        Some(on_change),
    )
    .expect("Failed to start the watchdog");

    println!("Watching monitors for 60 seconds...");
    thread::sleep(Duration::from_secs(60));

    monitor_control::DisplayManager::global()
        .expect("Failed to get the display manager")
        .watchdog()
        .shutdown()
        .expect("Failed to stop the watchdog");
}
