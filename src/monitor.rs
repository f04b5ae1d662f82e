use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    Arrangement, Bounds, DisplayManager, DisplayMode, Dpi, Error, MonitorHandle, MonitorMap,
    MonitorSnapshot, Orientation, Placement, Point, PowerState, Rect, Scale, Size,
    platform::{PlatformDisplayApi, PlatformError},
};

/// What a [`Monitor`] is bound to. The handle is replaced when the platform hands
/// out a new one for the same display.
#[derive(Debug, Clone)]
struct Binding {
    name: String,
    system_name: String,
    handle: MonitorHandle,
}

/// A connected monitor.
///
/// Every getter asks the backend (or the watchdog cache) for the current state, so
/// values are never stale. When the platform assigns a new handle after a
/// hot-plug, the monitor is found again by name and then by system name; if both
/// are gone, calls fail with [`Error::MonitorGone`].
pub struct Monitor {
    manager: DisplayManager,
    binding: Mutex<Binding>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.binding.lock();
        f.debug_struct("Monitor")
            .field("name", &binding.name)
            .field("system_name", &binding.system_name)
            .field("handle", &binding.handle)
            .finish()
    }
}

impl Monitor {
    /// Bind to the monitor with `handle`, or to the primary monitor when `handle`
    /// is `None`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if no connected monitor has the handle.
    pub fn new(manager: &DisplayManager, handle: Option<MonitorHandle>) -> Result<Self, Error> {
        let monitors = manager.snapshots()?;

        let found = match &handle {
            Some(handle) => monitors
                .iter()
                .find(|(_, snapshot)| &snapshot.handle == handle),
            None => monitors.iter().find(|(_, snapshot)| snapshot.is_primary),
        };

        match (found, handle) {
            (Some((name, snapshot)), _) => Ok(Self::bind(manager.clone(), name.clone(), snapshot)),
            (None, Some(handle)) => Err(Error::InvalidHandle(handle)),
            (None, None) => Err(PlatformError::NotFound("primary monitor".into()).into()),
        }
    }

    pub(crate) fn bind(manager: DisplayManager, name: String, snapshot: &MonitorSnapshot) -> Self {
        Self {
            manager,
            binding: Mutex::new(Binding {
                name,
                system_name: snapshot.system_name.clone(),
                handle: snapshot.handle.clone(),
            }),
        }
    }

    /// Finds this monitor in `monitors`, rebinding it if its handle changed.
    fn locate(&self, monitors: MonitorMap) -> Result<(String, MonitorSnapshot), Error> {
        let mut binding = self.binding.lock();

        let found = monitors
            .iter()
            .find(|(_, snapshot)| {
                snapshot.handle == binding.handle && snapshot.system_name == binding.system_name
            })
            .or_else(|| monitors.get_key_value(&binding.name))
            .or_else(|| {
                monitors
                    .iter()
                    .find(|(_, snapshot)| snapshot.system_name == binding.system_name)
            })
            .map(|(name, snapshot)| (name.clone(), snapshot.clone()));

        let Some((name, snapshot)) = found else {
            return Err(Error::MonitorGone(binding.name.clone()));
        };

        if snapshot.handle != binding.handle || name != binding.name {
            debug!(
                old = %binding.handle,
                new = %snapshot.handle,
                %name,
                "monitor rebound to a new handle"
            );
            binding.name = name.clone();
            binding.system_name = snapshot.system_name.clone();
            binding.handle = snapshot.handle.clone();
        }

        Ok((name, snapshot))
    }

    fn current(&self) -> Result<MonitorSnapshot, Error> {
        let monitors = self.manager.snapshots()?;
        Ok(self.locate(monitors)?.1)
    }

    /// Runs an optional query; any failure is reported as `None`.
    fn optional<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&dyn PlatformDisplayApi, &MonitorHandle) -> Result<T, PlatformError>,
    ) -> Result<Option<T>, Error> {
        let handle = self.current()?.handle;

        match self.manager.backend().query(|api| call(api, &handle)) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                debug!(%err, %handle, operation, "monitor query failed");
                Ok(None)
            }
        }
    }

    fn mutate(
        &self,
        handle: &MonitorHandle,
        call: impl FnOnce(&dyn PlatformDisplayApi, &MonitorHandle) -> Result<(), PlatformError>,
    ) -> Result<(), Error> {
        Ok(self.manager.backend().mutate(|api| call(api, handle))?)
    }

    /// The name this monitor is keyed by. See [`crate::key_monitors`].
    pub fn name(&self) -> Result<String, Error> {
        let monitors = self.manager.snapshots()?;
        Ok(self.locate(monitors)?.0)
    }

    pub fn system_name(&self) -> Result<String, Error> {
        Ok(self.current()?.system_name)
    }

    pub fn handle(&self) -> Result<MonitorHandle, Error> {
        Ok(self.current()?.handle)
    }

    pub fn snapshot(&self) -> Result<MonitorSnapshot, Error> {
        self.current()
    }

    pub fn size(&self) -> Result<Size, Error> {
        Ok(self.current()?.size)
    }

    pub fn position(&self) -> Result<Point, Error> {
        Ok(self.current()?.position)
    }

    pub fn work_area(&self) -> Result<Rect, Error> {
        Ok(self.current()?.work_area)
    }

    pub fn bounds(&self) -> Result<Bounds, Error> {
        Ok(self.current()?.bounds())
    }

    pub fn scale(&self) -> Result<Scale, Error> {
        Ok(self.current()?.scale)
    }

    pub fn dpi(&self) -> Result<Dpi, Error> {
        Ok(self.current()?.dpi)
    }

    pub fn orientation(&self) -> Result<Orientation, Error> {
        Ok(self.current()?.orientation)
    }

    pub fn frequency(&self) -> Result<f64, Error> {
        Ok(self.current()?.frequency)
    }

    pub fn color_depth(&self) -> Result<u32, Error> {
        Ok(self.current()?.color_depth)
    }

    pub fn is_primary(&self) -> Result<bool, Error> {
        Ok(self.current()?.is_primary)
    }

    /// Brightness in percent, or `None` if the monitor does not report it.
    pub fn brightness(&self) -> Result<Option<u32>, Error> {
        self.optional("brightness", |api, handle| api.brightness(handle))
    }

    /// Contrast in percent, or `None` if the monitor does not report it.
    pub fn contrast(&self) -> Result<Option<u32>, Error> {
        self.optional("contrast", |api, handle| api.contrast(handle))
    }

    pub fn mode(&self) -> Result<Option<DisplayMode>, Error> {
        self.optional("current_mode", |api, handle| api.current_mode(handle))
    }

    /// The mode the monitor prefers, usually its native resolution.
    pub fn default_mode(&self) -> Result<Option<DisplayMode>, Error> {
        self.optional("default_mode", |api, handle| api.default_mode(handle))
    }

    /// Every mode the monitor supports. Empty if the platform can not tell.
    pub fn all_modes(&self) -> Result<Vec<DisplayMode>, Error> {
        Ok(self
            .optional("all_modes", |api, handle| api.all_modes(handle))?
            .unwrap_or_default())
    }

    pub fn is_on(&self) -> Result<Option<bool>, Error> {
        Ok(self
            .optional("power_state", |api, handle| api.power_state(handle))?
            .map(|state| state == PowerState::On))
    }

    pub fn is_suspended(&self) -> Result<Option<bool>, Error> {
        Ok(self
            .optional("power_state", |api, handle| api.power_state(handle))?
            .map(|state| state == PowerState::Suspended))
    }

    /// Whether the monitor is part of the desktop. This works for detached
    /// monitors too, using the last known handle.
    pub fn is_attached(&self) -> Result<Option<bool>, Error> {
        let handle = self.binding.lock().handle.clone();

        match self.manager.backend().query(|api| api.is_attached(&handle)) {
            Ok(attached) => Ok(Some(attached)),
            Err(err) => {
                debug!(%err, %handle, "monitor query failed");
                Ok(None)
            }
        }
    }

    /// Switch to `mode`, which must be one of [`Monitor::all_modes`].
    pub fn set_mode(&self, mode: &DisplayMode) -> Result<(), Error> {
        let handle = self.current()?.handle;
        let backend = self.manager.backend();

        let modes = backend.query(|api| api.all_modes(&handle))?;
        if !modes.contains(mode) {
            return Err(Error::UnsupportedMode(*mode));
        }
        if backend.query(|api| api.current_mode(&handle)).ok().as_ref() == Some(mode) {
            return Ok(());
        }

        self.mutate(&handle, |api, handle| api.set_mode(handle, mode))
    }

    pub fn set_default_mode(&self) -> Result<(), Error> {
        let handle = self.current()?.handle;
        let backend = self.manager.backend();

        let mode = backend.query(|api| api.default_mode(&handle))?;
        if backend.query(|api| api.current_mode(&handle)).ok() == Some(mode) {
            return Ok(());
        }

        self.mutate(&handle, |api, handle| api.set_mode(handle, &mode))
    }

    /// Move this monitor while keeping every other monitor where it is.
    ///
    /// A relative placement without `relative_to` is taken relative to the current
    /// primary monitor. Moving the primary monitor anywhere but
    /// [`Position::Primary`](crate::Position::Primary) hands the primary role to
    /// the monitor it is placed against, or to another monitor if it is placed at
    /// an absolute point.
    pub fn set_position(&self, placement: impl Into<Placement>) -> Result<(), Error> {
        let placement = placement.into();
        let monitors = self.manager.backend().fresh_monitors()?;
        let (name, current) = self.locate(monitors.clone())?;

        let current_primary = monitors
            .iter()
            .find(|(_, snapshot)| snapshot.is_primary)
            .map(|(name, _)| name.clone());

        let anchor = match (&placement, current_primary) {
            (placement, _) if placement.is_primary() => name.clone(),
            (_, Some(primary)) if primary != name => primary,
            (
                Placement::Relative {
                    relative_to: Some(reference),
                    ..
                },
                _,
            ) => reference.clone(),
            _ => monitors
                .keys()
                .find(|other| **other != name)
                .cloned()
                .unwrap_or_else(|| name.clone()),
        };

        let Some(origin) = monitors.get(&anchor).map(|snapshot| snapshot.position) else {
            return Err(Error::MonitorGone(anchor));
        };
        let translate = |point: Point| Point::new(point.x - origin.x, point.y - origin.y);

        let mut arrangement: Arrangement = monitors
            .iter()
            .map(|(other, snapshot)| {
                let placement = if *other == anchor {
                    Placement::primary()
                } else {
                    Placement::Fixed(translate(snapshot.position))
                };
                (other.clone(), placement)
            })
            .collect();

        if anchor != name {
            let placement = match placement {
                Placement::Absolute(point) | Placement::Fixed(point) => {
                    Placement::Fixed(translate(point))
                }
                Placement::Relative {
                    position,
                    relative_to: None,
                } => Placement::Relative {
                    position,
                    relative_to: Some(anchor.clone()),
                },
                relative => relative,
            };
            arrangement.insert(name.clone(), placement);
        }

        debug!(%name, %anchor, from = ?current.position, "moving monitor");
        self.manager.apply_arrangement(&arrangement, &monitors)?;
        Ok(())
    }

    /// Make this the primary monitor. The other monitors keep their place around it.
    pub fn set_primary(&self) -> Result<(), Error> {
        if self.current()?.is_primary {
            return Ok(());
        }
        self.set_position(Placement::primary())
    }

    /// Set the scale, in percent.
    pub fn set_scale(&self, scale: Scale) -> Result<(), Error> {
        for value in [scale.x, scale.y] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::OutOfRange {
                    property: "scale",
                    value,
                });
            }
        }

        let current = self.current()?;
        if current.scale == scale {
            return Ok(());
        }
        self.mutate(&current.handle, |api, handle| api.set_scale(handle, scale))
    }

    pub fn set_orientation(&self, orientation: Orientation) -> Result<(), Error> {
        let current = self.current()?;
        if current.orientation == orientation {
            return Ok(());
        }
        self.mutate(&current.handle, |api, handle| {
            api.set_orientation(handle, orientation)
        })
    }

    /// Set the brightness, in percent (0-100).
    pub fn set_brightness(&self, percent: u32) -> Result<(), Error> {
        check_percent("brightness", percent)?;
        if self.brightness()? == Some(percent) {
            return Ok(());
        }

        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.set_brightness(handle, percent))
    }

    /// Set the contrast, in percent (0-100).
    pub fn set_contrast(&self, percent: u32) -> Result<(), Error> {
        check_percent("contrast", percent)?;
        if self.contrast()? == Some(percent) {
            return Ok(());
        }

        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.set_contrast(handle, percent))
    }

    pub fn turn_on(&self) -> Result<(), Error> {
        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.power_on(handle))
    }

    pub fn turn_off(&self) -> Result<(), Error> {
        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.power_off(handle))
    }

    /// Put the monitor in standby.
    pub fn suspend(&self) -> Result<(), Error> {
        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.suspend(handle))
    }

    /// Add a detached monitor back to the desktop.
    pub fn attach(&self) -> Result<(), Error> {
        let handle = self.binding.lock().handle.clone();
        self.mutate(&handle, |api, handle| api.attach(handle))
    }

    /// Remove the monitor from the desktop. With `permanent`, it stays detached
    /// after the session restarts where the platform supports it.
    pub fn detach(&self, permanent: bool) -> Result<(), Error> {
        let handle = self.current()?.handle;
        self.mutate(&handle, |api, handle| api.detach(handle, permanent))
    }
}

fn check_percent(property: &'static str, percent: u32) -> Result<(), Error> {
    if percent > 100 {
        return Err(Error::OutOfRange {
            property,
            value: f64::from(percent),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Position,
        testing::{FakePlatform, primary, snapshot},
    };

    fn setup() -> (FakePlatform, DisplayManager) {
        let platform = FakePlatform::new([
            primary(snapshot("A", 1, (0, 0), (1920, 1080))),
            snapshot("B", 2, (1920, 0), (1680, 1050)),
        ]);
        let manager = DisplayManager::new(platform.clone());
        (platform, manager)
    }

    #[test]
    fn new_binds_the_primary_or_the_given_handle() {
        let (_, manager) = setup();

        assert_eq!(Monitor::new(&manager, None).unwrap().name().unwrap(), "A");
        let b = Monitor::new(&manager, Some(MonitorHandle::new(2, "B"))).unwrap();
        assert_eq!(b.position().unwrap(), Point::new(1920, 0));

        let unknown = MonitorHandle::new(2, "C");
        assert!(matches!(
            Monitor::new(&manager, Some(unknown.clone())),
            Err(Error::InvalidHandle(handle)) if handle == unknown
        ));
    }

    #[test]
    fn stale_handle_is_resolved_again() {
        let (platform, manager) = setup();
        let b = Monitor::new(&manager, Some(MonitorHandle::new(2, "B"))).unwrap();

        platform.update("B", |monitor| monitor.handle = MonitorHandle::new(7, "B"));

        assert_eq!(b.handle().unwrap(), MonitorHandle::new(7, "B"));
        assert_eq!(b.size().unwrap(), Size::new(1680, 1050));
    }

    #[test]
    fn vanished_monitor_is_reported_as_gone() {
        let (platform, manager) = setup();
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();

        platform.state.lock().monitors.retain(|monitor| monitor.system_name != "B");

        assert!(matches!(b.position(), Err(Error::MonitorGone(name)) if name == "B"));
    }

    #[test]
    fn set_mode_rejects_unknown_modes_and_skips_equal_ones() {
        let (platform, manager) = setup();
        let a = manager.get_primary().unwrap();

        assert!(matches!(
            a.set_mode(&DisplayMode::new(800, 600, 60.0)),
            Err(Error::UnsupportedMode(_))
        ));
        a.set_mode(&DisplayMode::new(1920, 1080, 60.0)).unwrap();
        assert!(platform.mutating_calls().is_empty());

        a.set_mode(&DisplayMode::new(1280, 1024, 75.0)).unwrap();
        assert_eq!(a.size().unwrap(), Size::new(1280, 1024));
        assert_eq!(a.frequency().unwrap(), 75.0);
        assert_eq!(a.mode().unwrap(), Some(DisplayMode::new(1280, 1024, 75.0)));
    }

    #[test]
    fn brightness_is_range_checked() {
        let (platform, manager) = setup();
        platform.state.lock().brightness.insert("A".into(), 40);
        let a = manager.get_primary().unwrap();
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();

        assert!(matches!(
            a.set_brightness(101),
            Err(Error::OutOfRange { property: "brightness", .. })
        ));
        a.set_brightness(40).unwrap();
        assert!(platform.mutating_calls().is_empty());

        a.set_brightness(70).unwrap();
        assert_eq!(a.brightness().unwrap(), Some(70));

        assert_eq!(b.brightness().unwrap(), None);
        assert!(b.set_brightness(10).unwrap_err().is_unsupported());
        assert_eq!(a.contrast().unwrap(), None);
    }

    #[test]
    fn scale_must_be_positive() {
        let (_, manager) = setup();
        let a = manager.get_primary().unwrap();

        assert!(matches!(
            a.set_scale(Scale::uniform(0.0)),
            Err(Error::OutOfRange { property: "scale", .. })
        ));
        assert!(a.set_scale(Scale::new(f64::NAN, 100.0)).is_err());

        a.set_scale(Scale::uniform(150.0)).unwrap();
        assert_eq!(a.scale().unwrap(), Scale::uniform(150.0));
    }

    #[test]
    fn moving_a_secondary_monitor_keeps_the_primary() {
        let (_, manager) = setup();
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();

        b.set_position(Position::AboveCentered).unwrap();

        let a = manager.get_primary().unwrap();
        assert_eq!(a.name().unwrap(), "A");
        assert_eq!(a.position().unwrap(), Point::new(0, 1050));
        assert_eq!(b.position().unwrap(), Point::new(120, 0));
    }

    #[test]
    fn mirrored_monitors_stay_together_when_another_one_moves() {
        let platform = FakePlatform::new([
            primary(snapshot("A", 1, (0, 0), (1920, 1080))),
            snapshot("M", 3, (0, 0), (1920, 1080)),
            snapshot("B", 2, (1920, 0), (1680, 1050)),
        ]);
        let manager = DisplayManager::new(platform);
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();
        let m = manager.find_monitor_by_name("M").unwrap().unwrap();

        b.set_position(Position::LeftTop).unwrap();

        let a = manager.get_primary().unwrap();
        assert_eq!(a.name().unwrap(), "A");
        assert_eq!(a.position().unwrap(), Point::new(1680, 0));
        assert_eq!(m.position().unwrap(), Point::new(1680, 0));
        assert_eq!(b.position().unwrap(), Point::new(0, 0));

        m.set_primary().unwrap();
        assert!(m.is_primary().unwrap());
        assert!(!a.is_primary().unwrap());
        assert_eq!(a.position().unwrap(), m.position().unwrap());
    }

    #[test]
    fn moving_the_primary_hands_over_the_role() {
        let (_, manager) = setup();
        let a = manager.get_primary().unwrap();

        a.set_position(Placement::relative(Position::RightTop, "B")).unwrap();

        let b = manager.find_monitor_by_name("B").unwrap().unwrap();
        assert!(b.is_primary().unwrap());
        assert!(!a.is_primary().unwrap());
        assert_eq!(b.position().unwrap(), Point::new(0, 0));
        assert_eq!(a.position().unwrap(), Point::new(1680, 0));
    }

    #[test]
    fn set_primary_swaps_the_primary() {
        let (platform, manager) = setup();
        let a = manager.get_primary().unwrap();
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();

        a.set_primary().unwrap();
        assert!(platform.mutating_calls().is_empty());

        b.set_primary().unwrap();
        assert!(b.is_primary().unwrap());
        assert_eq!(b.position().unwrap(), Point::new(1920, 0));
        assert_eq!(a.position().unwrap(), Point::new(0, 0));
    }

    #[test]
    fn detach_and_attach_follow_the_monitor() {
        let (_, manager) = setup();
        let b = manager.find_monitor_by_name("B").unwrap().unwrap();

        b.detach(false).unwrap();
        assert_eq!(b.is_attached().unwrap(), Some(false));
        assert!(matches!(b.size(), Err(Error::MonitorGone(_))));

        b.attach().unwrap();
        assert_eq!(b.is_attached().unwrap(), Some(true));
        assert_eq!(b.handle().unwrap().raw(), 102);
    }

    #[test]
    fn power_state_is_reported() {
        let (_, manager) = setup();
        let a = manager.get_primary().unwrap();

        assert_eq!(a.is_on().unwrap(), Some(true));
        a.suspend().unwrap();
        assert_eq!(a.is_suspended().unwrap(), Some(true));
        a.turn_off().unwrap();
        assert_eq!(a.is_on().unwrap(), Some(false));
        a.turn_on().unwrap();
        assert_eq!(a.is_on().unwrap(), Some(true));
    }
}
