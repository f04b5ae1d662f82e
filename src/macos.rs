//! Quartz Display Services backend.
//!
//! Displays are addressed by their `CGDirectDisplayID`, which is the raw part of
//! their [`MonitorHandle`]. The device part is left empty.

use objc2_core_foundation::{CFArray, CFRetained, CGRect};
use objc2_core_graphics::{
    CGBeginDisplayConfiguration, CGCancelDisplayConfiguration, CGCompleteDisplayConfiguration,
    CGConfigureDisplayOrigin, CGConfigureOption, CGDirectDisplayID, CGDisplayBounds,
    CGDisplayConfigRef, CGDisplayCopyAllDisplayModes, CGDisplayCopyDisplayMode, CGDisplayIsActive,
    CGDisplayIsAsleep, CGDisplayIsMain, CGDisplayMode, CGDisplayRotation, CGDisplayScreenSize,
    CGDisplaySetDisplayMode, CGError, CGEvent, CGGetActiveDisplayList,
};
use tracing::{debug, warn};

use crate::{
    DisplayMode, Dpi, MonitorHandle, MonitorSnapshot, Orientation, Point, PowerState, Rect, Scale,
    Size,
    platform::{LayoutTarget, PlatformDisplayApi, PlatformError, run},
};

const MAX_DISPLAYS: u32 = 32;
const DEFAULT_DPI: u32 = 72;
const DEFAULT_DEPTH: u32 = 24;

trait CGErrorToResult {
    fn into_result<T>(self, value: T) -> Result<T, PlatformError>;
}

impl CGErrorToResult for CGError {
    fn into_result<T>(self, value: T) -> Result<T, PlatformError> {
        if self == CGError::Success {
            Ok(value)
        } else {
            Err(PlatformError::CoreGraphics(self))
        }
    }
}

fn display_id(handle: &MonitorHandle) -> Result<CGDirectDisplayID, PlatformError> {
    CGDirectDisplayID::try_from(handle.raw())
        .map_err(|_| PlatformError::NotFound(handle.to_string()))
}

fn active_displays() -> Result<Vec<CGDirectDisplayID>, PlatformError> {
    let mut displays = vec![0; MAX_DISPLAYS as usize];
    let mut count = 0;

    unsafe {
        CGGetActiveDisplayList(MAX_DISPLAYS, displays.as_mut_ptr(), &mut count).into_result(())?;
    }
    displays.truncate(count as usize);

    Ok(displays)
}

fn to_mode(mode: &CGDisplayMode) -> DisplayMode {
    DisplayMode::new(
        CGDisplayMode::pixel_width(Some(mode)) as u32,
        CGDisplayMode::pixel_height(Some(mode)) as u32,
        CGDisplayMode::refresh_rate(Some(mode)),
    )
}

fn current_mode(id: CGDirectDisplayID) -> Result<CFRetained<CGDisplayMode>, PlatformError> {
    CGDisplayCopyDisplayMode(id).ok_or_else(|| PlatformError::NotFound(format!("Display {id}")))
}

fn display_modes(id: CGDirectDisplayID) -> Result<Vec<CFRetained<CGDisplayMode>>, PlatformError> {
    let modes = unsafe { CGDisplayCopyAllDisplayModes(id, None) }
        .ok_or_else(|| PlatformError::NotFound(format!("Display {id}")))?;
    // SAFETY: The array returned by `CGDisplayCopyAllDisplayModes` only holds display modes.
    let modes: CFRetained<CFArray<CGDisplayMode>> = unsafe { CFRetained::cast_unchecked(modes) };

    Ok((0..modes.len()).filter_map(|index| modes.get(index)).collect())
}

fn to_rect(bounds: CGRect) -> Rect {
    let left = bounds.origin.x as i32;
    let top = bounds.origin.y as i32;
    Rect::new(
        left,
        top,
        left + bounds.size.width as i32,
        top + bounds.size.height as i32,
    )
}

fn snapshot(id: CGDirectDisplayID) -> Result<MonitorSnapshot, PlatformError> {
    let bounds = CGDisplayBounds(id);
    let mode = current_mode(id)?;
    let points = CGDisplayMode::width(Some(&*mode));
    let pixels = CGDisplayMode::pixel_width(Some(&*mode));
    let scale = if points == 0 {
        100.0
    } else {
        pixels as f64 / points as f64 * 100.0
    };

    // Physical size in millimetres; zero when the display does not report it.
    let physical = CGDisplayScreenSize(id);
    let size = Size::new(bounds.size.width as u32, bounds.size.height as u32);
    let axis = |pixels: usize, millimetres: f64| {
        if millimetres <= 0.0 {
            DEFAULT_DPI
        } else {
            (pixels as f64 * 25.4 / millimetres).round() as u32
        }
    };
    let dpi = Dpi::new(
        axis(pixels, physical.width),
        axis(CGDisplayMode::pixel_height(Some(&*mode)), physical.height),
    );

    Ok(MonitorSnapshot {
        system_name: format!("Display {id}"),
        handle: MonitorHandle::new(u64::from(id), ""),
        is_primary: CGDisplayIsMain(id),
        position: Point::new(bounds.origin.x as i32, bounds.origin.y as i32),
        size,
        work_area: to_rect(bounds),
        scale: Scale::uniform(scale),
        dpi,
        orientation: Orientation::from_degrees(CGDisplayRotation(id) as i32).unwrap_or_default(),
        frequency: CGDisplayMode::refresh_rate(Some(&*mode)),
        color_depth: DEFAULT_DEPTH,
    })
}

/// Moves displays inside one configuration transaction. Either every move
/// applies or the transaction is cancelled.
fn configure_origins(
    moves: impl IntoIterator<Item = (CGDirectDisplayID, Point)>,
) -> Result<(), PlatformError> {
    let mut config: CGDisplayConfigRef = std::ptr::null_mut();
    unsafe { CGBeginDisplayConfiguration(&mut config) }.into_result(())?;

    for (id, position) in moves {
        let result = unsafe { CGConfigureDisplayOrigin(config, id, position.x, position.y) };
        if let Err(err) = result.into_result(()) {
            if let Err(cancel) = unsafe { CGCancelDisplayConfiguration(config) }.into_result(()) {
                warn!(%cancel, "failed to cancel display configuration");
            }
            return Err(err);
        }
    }

    unsafe { CGCompleteDisplayConfiguration(config, CGConfigureOption::Permanently) }
        .into_result(())
}

/// The display API backed by Quartz Display Services.
///
/// # Platform-specific
/// Orientation, brightness and contrast can not be changed through public APIs,
/// and there is no way to attach or detach a display. The work area is the whole
/// display. Power control applies to every display at once.
#[derive(Debug, Default)]
pub struct MacOSDisplayApi {
    _private: (),
}

impl MacOSDisplayApi {
    pub fn new() -> Result<Self, PlatformError> {
        active_displays()?;
        Ok(Self { _private: () })
    }
}

impl PlatformDisplayApi for MacOSDisplayApi {
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError> {
        active_displays()?.into_iter().map(snapshot).collect()
    }

    /// macOS puts the main display at `(0, 0)`, so the layout is shifted to put
    /// the primary there.
    fn apply_layout(&self, layout: &[LayoutTarget]) -> Result<(), PlatformError> {
        let origin = layout
            .iter()
            .find(|target| target.primary)
            .map_or(Point::new(0, 0), |target| target.position);

        let moves = layout
            .iter()
            .map(|target| {
                let position = Point::new(
                    target.position.x - origin.x,
                    target.position.y - origin.y,
                );
                Ok((display_id(&target.handle)?, position))
            })
            .collect::<Result<Vec<_>, PlatformError>>()?;

        configure_origins(moves)?;
        debug!(displays = layout.len(), "applied display configuration");
        Ok(())
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError> {
        configure_origins([(display_id(handle)?, position)])
    }

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        let target = CGDisplayBounds(display_id(handle)?).origin;

        let moves = active_displays()?.into_iter().map(|id| {
            let origin = CGDisplayBounds(id).origin;
            let position = Point::new((origin.x - target.x) as i32, (origin.y - target.y) as i32);
            (id, position)
        });
        configure_origins(moves.collect::<Vec<_>>())
    }

    fn current_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        Ok(to_mode(&current_mode(display_id(handle)?)?))
    }

    /// The native mode with the highest refresh rate.
    fn default_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        display_modes(display_id(handle)?)?
            .iter()
            .map(|mode| to_mode(mode))
            .max_by(|a, b| {
                (u64::from(a.width) * u64::from(a.height))
                    .cmp(&(u64::from(b.width) * u64::from(b.height)))
                    .then(a.frequency.total_cmp(&b.frequency))
            })
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
    }

    fn all_modes(&self, handle: &MonitorHandle) -> Result<Vec<DisplayMode>, PlatformError> {
        let mut modes: Vec<DisplayMode> = display_modes(display_id(handle)?)?
            .iter()
            .map(|mode| to_mode(mode))
            .collect();
        modes.dedup();
        Ok(modes)
    }

    fn set_mode(&self, handle: &MonitorHandle, mode: &DisplayMode) -> Result<(), PlatformError> {
        let id = display_id(handle)?;
        let native = display_modes(id)?
            .into_iter()
            .find(|candidate| to_mode(candidate) == *mode)
            .ok_or_else(|| PlatformError::unsupported("set_mode"))?;

        unsafe { CGDisplaySetDisplayMode(id, Some(&*native), None) }.into_result(())
    }

    fn power_on(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        run("caffeinate", ["-u", "-t", "2"]).map(drop)
    }

    fn power_off(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        run("pmset", ["displaysleepnow"]).map(drop)
    }

    fn suspend(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.power_off(handle)
    }

    fn power_state(&self, handle: &MonitorHandle) -> Result<PowerState, PlatformError> {
        if CGDisplayIsAsleep(display_id(handle)?) {
            Ok(PowerState::Suspended)
        } else {
            Ok(PowerState::On)
        }
    }

    fn is_attached(&self, handle: &MonitorHandle) -> Result<bool, PlatformError> {
        Ok(CGDisplayIsActive(display_id(handle)?))
    }

    fn mouse_position(&self) -> Result<Point, PlatformError> {
        let event = CGEvent::new(None)
            .ok_or_else(|| PlatformError::Parse("could not create a `CGEvent`".into()))?;
        let location = CGEvent::location(Some(&*event));
        Ok(Point::new(location.x as i32, location.y as i32))
    }
}
