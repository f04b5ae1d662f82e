//! Saving the state of every monitor and bringing it back later.

use tracing::{debug, warn};

use crate::{
    Arrangement, DisplayManager, DisplayMode, Error, MonitorMap, MonitorSnapshot, Placement,
    Point, PowerState, platform::PlatformError,
};

/// The saved state of one monitor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SavedMonitor {
    pub name: String,
    pub snapshot: MonitorSnapshot,
    /// `None` if the platform could not report the mode.
    pub mode: Option<DisplayMode>,
    pub is_on: Option<bool>,
    pub is_suspended: Option<bool>,
    pub is_attached: bool,
}

/// The state of every monitor at the time [`DisplayManager::save_setup`] was
/// called. It only lives in memory; with the `serde` feature it can be stored by
/// the caller.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SavedSetup {
    pub monitors: Vec<SavedMonitor>,
}

impl SavedSetup {
    pub fn get(&self, name: &str) -> Option<&SavedMonitor> {
        self.monitors.iter().find(|monitor| monitor.name == name)
    }

    pub fn primary(&self) -> Option<&SavedMonitor> {
        self.monitors.iter().find(|monitor| monitor.snapshot.is_primary)
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

pub(crate) fn save(manager: &DisplayManager) -> Result<SavedSetup, Error> {
    let backend = manager.backend();
    let monitors = backend.fresh_monitors()?;

    let monitors = monitors
        .into_iter()
        .map(|(name, snapshot)| {
            let handle = &snapshot.handle;
            let mode = backend.query(|api| api.current_mode(handle)).ok();
            let power = backend.query(|api| api.power_state(handle)).ok();

            SavedMonitor {
                name,
                mode,
                is_on: power.map(|state| state == PowerState::On),
                is_suspended: power.map(|state| state == PowerState::Suspended),
                is_attached: true,
                snapshot,
            }
        })
        .collect();

    Ok(SavedSetup { monitors })
}

/// Brings every saved monitor back to its saved state. Per-monitor failures are
/// logged and skipped; the layout is applied in one go at the end.
pub(crate) fn restore(manager: &DisplayManager, setup: &SavedSetup) -> Result<(), Error> {
    let backend = manager.backend();
    let mut monitors = backend.fresh_monitors()?;

    let mut reattached = false;
    for saved in &setup.monitors {
        if monitors.contains_key(&saved.name) || !saved.is_attached {
            continue;
        }
        match backend.mutate(|api| api.attach(&saved.snapshot.handle)) {
            Ok(()) => reattached = true,
            Err(err) => warn!(%err, monitor = %saved.name, "failed to reattach monitor"),
        }
    }
    if reattached {
        monitors = backend.fresh_monitors()?;
    }

    for saved in &setup.monitors {
        let Some(current) = find(&monitors, saved) else {
            warn!(monitor = %saved.name, "saved monitor is not connected");
            continue;
        };
        restore_monitor(manager, saved, current);
    }

    let Some(saved_primary) = setup.primary() else {
        return Ok(());
    };

    let monitors = backend.fresh_monitors()?;
    let Some(anchor) = find(&monitors, saved_primary) else {
        return Err(Error::MonitorGone(saved_primary.name.clone()));
    };
    let anchor_now = anchor.position;
    let anchor_saved = saved_primary.snapshot.position;

    let arrangement: Arrangement = monitors
        .iter()
        .map(|(name, current)| {
            let saved = setup.monitors.iter().find(|saved| {
                find(&monitors, saved).is_some_and(|found| std::ptr::eq(found, current))
            });
            let placement = match saved {
                Some(saved) if saved.name == saved_primary.name => Placement::primary(),
                Some(saved) => Placement::Fixed(offset(saved.snapshot.position, anchor_saved)),
                // Not part of the setup: stays where it is relative to the primary.
                None => Placement::Fixed(offset(current.position, anchor_now)),
            };
            (name.clone(), placement)
        })
        .collect();

    manager.apply_arrangement(&arrangement, &monitors)?;
    debug!(monitors = setup.len(), "restored monitor setup");

    Ok(())
}

fn restore_monitor(manager: &DisplayManager, saved: &SavedMonitor, current: &MonitorSnapshot) {
    let backend = manager.backend();
    let handle = &current.handle;
    let name = saved.name.as_str();

    let log = |what: &str, result: Result<(), PlatformError>| {
        if let Err(err) = result {
            warn!(%err, monitor = name, what, "failed to restore monitor setting");
        }
    };

    if saved.is_on == Some(true)
        && let Ok(PowerState::Off | PowerState::Suspended) =
            backend.query(|api| api.power_state(handle))
    {
        log("power", backend.mutate(|api| api.power_on(handle)));
    }

    if let Some(mode) = saved.mode
        && backend.query(|api| api.current_mode(handle)).ok() != Some(mode)
    {
        log("mode", backend.mutate(|api| api.set_mode(handle, &mode)));
    }

    if current.orientation != saved.snapshot.orientation {
        let orientation = saved.snapshot.orientation;
        log(
            "orientation",
            backend.mutate(|api| api.set_orientation(handle, orientation)),
        );
    }

    if current.scale != saved.snapshot.scale {
        let scale = saved.snapshot.scale;
        log("scale", backend.mutate(|api| api.set_scale(handle, scale)));
    }
}

/// The connected monitor a saved one refers to: same name, or same system name.
fn find<'a>(monitors: &'a MonitorMap, saved: &SavedMonitor) -> Option<&'a MonitorSnapshot> {
    monitors.get(&saved.name).or_else(|| {
        monitors
            .values()
            .find(|monitor| monitor.system_name == saved.snapshot.system_name)
    })
}

fn offset(point: Point, origin: Point) -> Point {
    Point::new(point.x - origin.x, point.y - origin.y)
}
