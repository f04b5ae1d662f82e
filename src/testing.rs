//! In-memory platform used by the unit tests.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    DisplayMode, Dpi, MonitorHandle, MonitorMap, MonitorSnapshot, Orientation, Point, PowerState,
    Rect, Scale, Size, key_monitors,
    platform::{PlatformDisplayApi, PlatformError},
};

pub(crate) fn snapshot(
    name: &str,
    raw: u64,
    (x, y): (i32, i32),
    (width, height): (u32, u32),
) -> MonitorSnapshot {
    let position = Point::new(x, y);
    let size = Size::new(width, height);

    MonitorSnapshot {
        system_name: name.to_owned(),
        handle: MonitorHandle::new(raw, name),
        is_primary: false,
        position,
        size,
        work_area: Rect::new(x, y, x + width as i32, y + height as i32),
        scale: Scale::uniform(100.0),
        dpi: Dpi::new(96, 96),
        orientation: Orientation::Normal,
        frequency: 60.0,
        color_depth: 24,
    }
}

pub(crate) fn primary(mut monitor: MonitorSnapshot) -> MonitorSnapshot {
    monitor.is_primary = true;
    monitor
}

pub(crate) fn monitor_map(monitors: impl IntoIterator<Item = MonitorSnapshot>) -> MonitorMap {
    key_monitors(monitors.into_iter().collect())
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub monitors: Vec<MonitorSnapshot>,
    pub detached: Vec<MonitorSnapshot>,
    pub modes: Vec<DisplayMode>,
    pub brightness: BTreeMap<String, u32>,
    pub power: BTreeMap<String, PowerState>,
    /// Results handed out by `enumerate` before falling back to `monitors`.
    pub script: VecDeque<Option<Vec<MonitorSnapshot>>>,
    pub enumerations: usize,
    pub calls: Vec<String>,
}

/// A platform whose displays live in memory. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakePlatform {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new(monitors: impl IntoIterator<Item = MonitorSnapshot>) -> Self {
        let platform = Self::default();
        {
            let mut state = platform.state.lock();
            state.monitors = monitors.into_iter().collect();
            state.modes = vec![
                DisplayMode::new(1920, 1080, 60.0),
                DisplayMode::new(1680, 1050, 60.0),
                DisplayMode::new(1280, 1024, 75.0),
            ];
        }
        platform
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("set_") || call.starts_with("power_"))
            .collect()
    }

    pub fn update(&self, device: &str, change: impl FnOnce(&mut MonitorSnapshot)) {
        let mut state = self.state.lock();
        if let Some(monitor) = state
            .monitors
            .iter_mut()
            .find(|monitor| monitor.handle.device() == device)
        {
            change(monitor);
        }
    }

    fn with_monitor<T>(
        &self,
        handle: &MonitorHandle,
        change: impl FnOnce(&mut MonitorSnapshot) -> T,
    ) -> Result<T, PlatformError> {
        let mut state = self.state.lock();
        state
            .monitors
            .iter_mut()
            .find(|monitor| &monitor.handle == handle)
            .map(change)
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

impl PlatformDisplayApi for FakePlatform {
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError> {
        let mut state = self.state.lock();
        state.enumerations += 1;

        match state.script.pop_front() {
            Some(Some(monitors)) => Ok(monitors),
            Some(None) => Err(PlatformError::Command {
                program: "fake".into(),
                reason: "scripted failure".into(),
            }),
            None => Ok(state.monitors.clone()),
        }
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError> {
        self.record(format!("set_position {} {},{}", handle.device(), position.x, position.y));
        self.with_monitor(handle, |monitor| {
            let size = monitor.size;
            monitor.position = position;
            monitor.work_area = Rect::new(
                position.x,
                position.y,
                position.x + size.width as i32,
                position.y + size.height as i32,
            );
        })
    }

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.record(format!("set_primary {}", handle.device()));
        let mut state = self.state.lock();
        if !state.monitors.iter().any(|monitor| &monitor.handle == handle) {
            return Err(PlatformError::NotFound(handle.to_string()));
        }
        for monitor in &mut state.monitors {
            monitor.is_primary = &monitor.handle == handle;
        }
        Ok(())
    }

    fn current_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        self.with_monitor(handle, |monitor| {
            DisplayMode::new(monitor.size.width, monitor.size.height, monitor.frequency)
        })
    }

    fn default_mode(&self, _handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        self.state
            .lock()
            .modes
            .first()
            .copied()
            .ok_or(PlatformError::unsupported("default_mode"))
    }

    fn all_modes(&self, _handle: &MonitorHandle) -> Result<Vec<DisplayMode>, PlatformError> {
        Ok(self.state.lock().modes.clone())
    }

    fn set_mode(&self, handle: &MonitorHandle, mode: &DisplayMode) -> Result<(), PlatformError> {
        self.record(format!("set_mode {} {}x{}", handle.device(), mode.width, mode.height));
        self.with_monitor(handle, |monitor| {
            monitor.size = Size::new(mode.width, mode.height);
            monitor.frequency = mode.frequency;
        })
    }

    fn set_scale(&self, handle: &MonitorHandle, scale: Scale) -> Result<(), PlatformError> {
        self.record(format!("set_scale {} {}", handle.device(), scale.x));
        self.with_monitor(handle, |monitor| monitor.scale = scale)
    }

    fn set_orientation(
        &self,
        handle: &MonitorHandle,
        orientation: Orientation,
    ) -> Result<(), PlatformError> {
        self.record(format!("set_orientation {} {orientation:?}", handle.device()));
        self.with_monitor(handle, |monitor| monitor.orientation = orientation)
    }

    fn brightness(&self, handle: &MonitorHandle) -> Result<u32, PlatformError> {
        self.state
            .lock()
            .brightness
            .get(handle.device())
            .copied()
            .ok_or(PlatformError::unsupported("brightness"))
    }

    fn set_brightness(&self, handle: &MonitorHandle, percent: u32) -> Result<(), PlatformError> {
        self.record(format!("set_brightness {} {percent}", handle.device()));
        let mut state = self.state.lock();
        match state.brightness.get_mut(handle.device()) {
            Some(value) => {
                *value = percent;
                Ok(())
            }
            None => Err(PlatformError::unsupported("set_brightness")),
        }
    }

    fn power_on(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.record(format!("power_on {}", handle.device()));
        self.state
            .lock()
            .power
            .insert(handle.device().to_owned(), PowerState::On);
        Ok(())
    }

    fn power_off(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.record(format!("power_off {}", handle.device()));
        self.state
            .lock()
            .power
            .insert(handle.device().to_owned(), PowerState::Off);
        Ok(())
    }

    fn suspend(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.record(format!("suspend {}", handle.device()));
        self.state
            .lock()
            .power
            .insert(handle.device().to_owned(), PowerState::Suspended);
        Ok(())
    }

    fn power_state(&self, handle: &MonitorHandle) -> Result<PowerState, PlatformError> {
        Ok(self
            .state
            .lock()
            .power
            .get(handle.device())
            .copied()
            .unwrap_or(PowerState::On))
    }

    fn attach(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.record(format!("attach {}", handle.device()));
        let mut state = self.state.lock();
        let index = state
            .detached
            .iter()
            .position(|monitor| monitor.handle.device() == handle.device())
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;
        let mut monitor = state.detached.remove(index);
        // Attaching hands out a fresh handle, as real platforms do.
        monitor.handle = MonitorHandle::new(monitor.handle.raw() + 100, handle.device());
        state.monitors.push(monitor);
        Ok(())
    }

    fn detach(&self, handle: &MonitorHandle, _permanent: bool) -> Result<(), PlatformError> {
        self.record(format!("detach {}", handle.device()));
        let mut state = self.state.lock();
        let index = state
            .monitors
            .iter()
            .position(|monitor| &monitor.handle == handle)
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;
        let monitor = state.monitors.remove(index);
        state.detached.push(monitor);
        Ok(())
    }

    fn is_attached(&self, handle: &MonitorHandle) -> Result<bool, PlatformError> {
        Ok(self
            .state
            .lock()
            .monitors
            .iter()
            .any(|monitor| monitor.handle.device() == handle.device()))
    }

    fn mouse_position(&self) -> Result<Point, PlatformError> {
        Ok(Point::new(10, 20))
    }
}
