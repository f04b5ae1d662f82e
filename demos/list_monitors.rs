use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let monitors = monitor_control::get_all_monitors().expect("Failed to get monitors");

    for monitor in monitors {
        let snapshot = monitor.snapshot().expect("Failed to read the monitor");
        println!("Monitor: {}", monitor.name().expect("Failed to read the name"));

        println!("  Handle: {}", snapshot.handle);
        println!("  Position: {:?}", snapshot.position);
        println!("  Size: {:?}", snapshot.size);
        println!("  Work area: {:?}", snapshot.work_area);
        println!("  Scale: {:?}", snapshot.scale);
        println!("  Orientation: {:?}", snapshot.orientation);
        println!("  Frequency: {} Hz", snapshot.frequency);
        println!("  Is primary: {}", snapshot.is_primary);
        println!("  Brightness: {:?}", monitor.brightness().ok().flatten());
        println!("  Power on: {:?}", monitor.is_on().ok().flatten());

        println!();
    }

    let mouse = monitor_control::get_mouse_position().expect("Failed to get the mouse position");
    println!("Mouse position: {mouse:?}");
}
