use std::{sync::Arc, time::Duration};

use crossbeam_channel::unbounded;
use monitor_control::{
    Arrangement, ArrangementError, DisplayManager, Dpi, Error, LayoutTarget, Listener,
    MonitorHandle, MonitorSnapshot, Orientation, PlatformDisplayApi, PlatformError, Point,
    Position, Rect, Scale, Size, WatchdogConfig,
};
use parking_lot::Mutex;

fn monitor(
    name: &str,
    raw: u64,
    (x, y): (i32, i32),
    (width, height): (u32, u32),
) -> MonitorSnapshot {
    MonitorSnapshot {
        system_name: name.to_owned(),
        handle: MonitorHandle::new(raw, name),
        is_primary: false,
        position: Point::new(x, y),
        size: Size::new(width, height),
        work_area: Rect::new(x, y, x + width as i32, y + height as i32),
        scale: Scale::uniform(100.0),
        dpi: Dpi::new(96, 96),
        orientation: Orientation::Normal,
        frequency: 60.0,
        color_depth: 24,
    }
}

/// Monitors kept in memory, with a log of every change made to them.
#[derive(Debug, Clone, Default)]
struct Desk {
    monitors: Arc<Mutex<Vec<MonitorSnapshot>>>,
    moves: Arc<Mutex<Vec<String>>>,
}

impl Desk {
    fn new() -> Self {
        let mut a = monitor("A", 1, (0, 0), (1920, 1080));
        a.is_primary = true;
        let desk = Self::default();
        *desk.monitors.lock() = vec![a, monitor("B", 2, (1920, 0), (1680, 1050))];
        desk
    }

    fn plug(&self, snapshot: MonitorSnapshot) {
        self.monitors.lock().push(snapshot);
    }

    fn position(&self, name: &str) -> Option<Point> {
        self.monitors
            .lock()
            .iter()
            .find(|monitor| monitor.system_name == name)
            .map(|monitor| monitor.position)
    }
}

impl PlatformDisplayApi for Desk {
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError> {
        Ok(self.monitors.lock().clone())
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError> {
        let mut monitors = self.monitors.lock();
        let monitor = monitors
            .iter_mut()
            .find(|monitor| monitor.handle == *handle)
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;
        monitor.position = position;
        self.moves.lock().push(format!("{} {position:?}", monitor.system_name));
        Ok(())
    }

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        for monitor in self.monitors.lock().iter_mut() {
            monitor.is_primary = monitor.handle == *handle;
        }
        Ok(())
    }

    fn mouse_position(&self) -> Result<Point, PlatformError> {
        Ok(Point::new(100, 100))
    }
}

#[test]
fn moving_a_monitor_keeps_the_layout_non_negative() {
    let desk = Desk::new();
    let manager = DisplayManager::new(desk.clone());

    let b = manager.find_monitor_by_name("B").unwrap().unwrap();
    b.set_position(Position::LeftTop).unwrap();

    assert_eq!(desk.position("B"), Some(Point::new(0, 0)));
    assert_eq!(desk.position("A"), Some(Point::new(1680, 0)));
    assert!(manager.get_primary().unwrap().name().unwrap() == "A");
    assert_eq!(b.position().unwrap(), Point::new(0, 0));

    let under_mouse = manager.find_monitors_at_point(100, 100).unwrap();
    assert_eq!(under_mouse.len(), 1);
    assert_eq!(under_mouse[0].name().unwrap(), "B");
}

#[test]
fn rejected_arrangements_leave_the_desk_alone() {
    let desk = Desk::new();
    let manager = DisplayManager::new(desk.clone());

    let arrangement = Arrangement::new()
        .primary("A")
        .relative("B", Position::RightTop, "Z");
    let err = manager.arrange_monitors(&arrangement).unwrap_err();

    assert!(matches!(
        err,
        Error::Arrangement(ArrangementError::DanglingReference { .. })
    ));
    assert!(desk.moves.lock().is_empty());
}

#[test]
fn unsupported_operations_are_reported_as_such() {
    let manager = DisplayManager::new(Desk::new());
    let a = manager.get_primary().unwrap();

    assert_eq!(a.brightness().unwrap(), None);
    assert!(a.set_brightness(50).unwrap_err().is_unsupported());
    assert!(matches!(
        a.set_brightness(150),
        Err(Error::OutOfRange { property: "brightness", .. })
    ));
}

#[test]
fn saved_setup_comes_back() {
    let desk = Desk::new();
    let manager = DisplayManager::new(desk.clone());
    let saved = manager.save_setup().unwrap();

    let arrangement = Arrangement::new()
        .primary("B")
        .relative("A", Position::BelowCentered, "B");
    manager.arrange_monitors(&arrangement).unwrap();
    assert_eq!(manager.get_primary().unwrap().name().unwrap(), "B");

    manager.restore_setup(&saved).unwrap();

    assert_eq!(manager.get_primary().unwrap().name().unwrap(), "A");
    assert_eq!(desk.position("A"), Some(Point::new(0, 0)));
    assert_eq!(desk.position("B"), Some(Point::new(1920, 0)));
}

#[test]
fn watchdog_reports_plugged_monitors() {
    let desk = Desk::new();
    let config = WatchdogConfig::default().with_interval(Duration::from_millis(10));
    let manager = DisplayManager::with_config(desk.clone(), config);

    let (sender, receiver) = unbounded();
    let listener = Listener::new(move |names, _| {
        let _ = sender.send(names.to_vec());
    });
    manager
        .watchdog()
        .register_plug_listener(listener.clone())
        .unwrap();
    assert!(manager.is_watchdog_running());

    desk.plug(monitor("C", 3, (0, 1080), (1280, 1024)));

    let names = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(names, ["C"]);

    manager
        .watchdog()
        .unregister_plug_listener(&listener)
        .unwrap();
    assert!(!manager.is_watchdog_running());
}

#[test]
fn layout_targets_cover_every_monitor() {
    let desk = Desk::new();
    let monitors = monitor_control::key_monitors(desk.enumerate().unwrap());

    let plan = monitor_control::arrangement::plan(
        &Arrangement::new()
            .primary("A")
            .relative("B", Position::AboveRight, "A"),
        &monitors,
    )
    .unwrap();
    let targets = plan.targets(&monitors);

    assert_eq!(
        targets,
        [
            LayoutTarget {
                handle: MonitorHandle::new(1, "A"),
                position: Point::new(0, 1050),
                primary: true,
            },
            LayoutTarget {
                handle: MonitorHandle::new(2, "B"),
                position: Point::new(240, 0),
                primary: false,
            },
        ]
    );
}
