//! Enumerate, inspect and rearrange the monitors of the desktop.
//!
//! The entry point is [`DisplayManager`], which owns the platform backend and the
//! [`Watchdog`]. Monitors are exposed as [`Monitor`] objects that stay bound to
//! the same physical display across hot-plugs, and whole layouts are described
//! with an [`Arrangement`].
//!
//! ```no_run
//! use monitor_control::{Arrangement, Position};
//!
//! # fn main() -> Result<(), monitor_control::Error> {
//! let manager = monitor_control::DisplayManager::global()?;
//! for monitor in manager.get_all_monitors()? {
//!     println!("{} at {:?}", monitor.name()?, monitor.position()?);
//! }
//!
//! let arrangement = Arrangement::new()
//!     .primary("DP-1")
//!     .relative("HDMI-1", Position::LeftCentered, "DP-1");
//! manager.arrange_monitors(&arrangement)?;
//! # Ok(())
//! # }
//! ```

pub mod arrangement;
mod backend;
mod manager;
mod monitor;
pub mod platform;
pub mod position;
mod setup;
mod types;
pub mod watchdog;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(test)]
mod testing;

use std::time::Duration;

pub use arrangement::{Arrangement, ArrangementError, LayoutPlan, Placement};
pub use manager::DisplayManager;
pub use monitor::Monitor;
pub use platform::{LayoutTarget, PlatformDisplayApi, PlatformError};
pub use position::Position;
pub use setup::{SavedMonitor, SavedSetup};
pub use types::*;
pub use watchdog::{Listener, Watchdog, WatchdogConfig};

#[cfg(target_os = "linux")]
use linux::XrandrDisplayApi as NativeDisplayApi;
#[cfg(target_os = "macos")]
use macos::MacOSDisplayApi as NativeDisplayApi;
#[cfg(target_os = "windows")]
use windows::WindowsDisplayApi as NativeDisplayApi;

/// The error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The native backend could not be set up.
    #[error("Initialization failed.")]
    InitializationError(#[source] PlatformError),
    /// No connected monitor has this handle.
    #[error("No monitor has the handle `{0}`.")]
    InvalidHandle(MonitorHandle),
    /// The monitor was unplugged or detached.
    #[error("The monitor `{0}` is no longer connected.")]
    MonitorGone(String),
    #[error("The monitor does not support the mode {0:?}.")]
    UnsupportedMode(DisplayMode),
    #[error("{value} is out of range for {property}.")]
    OutOfRange { property: &'static str, value: f64 },
    #[error(transparent)]
    Arrangement(#[from] ArrangementError),
    /// The watchdog thread did not exit within the configured join timeout.
    #[error("The watchdog thread did not stop within {0:?}.")]
    WatchdogJoinTimeout(Duration),
    #[error("Failed to spawn the watchdog thread.")]
    WatchdogSpawn(#[source] std::io::Error),
    /// An error occurred in the platform-specific implementation.
    #[error("A platform-specific error has occurred.")]
    PlatformError(#[from] PlatformError),
}

impl Error {
    /// Whether this error means the platform can not perform the operation at all.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::PlatformError(err) if err.is_unsupported())
    }
}

/// Get every connected monitor, using the process-wide [`DisplayManager`].
///
/// # Errors
/// Returns [`Error`] if the platform-specific implementation fails.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn get_all_monitors() -> Result<Vec<Monitor>, Error> {
    DisplayManager::global()?.get_all_monitors()
}

/// Get every connected monitor keyed by name.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn get_all_monitors_as_mapping() -> Result<std::collections::BTreeMap<String, Monitor>, Error> {
    DisplayManager::global()?.get_all_monitors_as_mapping()
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn get_monitors_count() -> Result<usize, Error> {
    DisplayManager::global()?.get_monitors_count()
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn get_primary() -> Result<Monitor, Error> {
    DisplayManager::global()?.get_primary()
}

/// Get the monitors containing the point. Edges count as inside, so a point on
/// the border of two monitors returns both.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn find_monitors_at_point(x: i32, y: i32) -> Result<Vec<Monitor>, Error> {
    DisplayManager::global()?.find_monitors_at_point(x, y)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn find_monitor_by_name(name: &str) -> Result<Option<Monitor>, Error> {
    DisplayManager::global()?.find_monitor_by_name(name)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn get_mouse_position() -> Result<Point, Error> {
    DisplayManager::global()?.get_mouse_position()
}

/// Apply a complete monitor layout. See [`DisplayManager::arrange_monitors`].
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn arrange_monitors(arrangement: &Arrangement) -> Result<LayoutPlan, Error> {
    DisplayManager::global()?.arrange_monitors(arrangement)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn save_setup() -> Result<SavedSetup, Error> {
    DisplayManager::global()?.save_setup()
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn restore_setup(setup: &SavedSetup) -> Result<(), Error> {
    DisplayManager::global()?.restore_setup(setup)
}

/// Start the watchdog of the process-wide [`DisplayManager`].
/// See [`Watchdog::enable`].
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn enable_watchdog(
    interval: Option<Duration>,
    on_count_changed: Option<Listener>,
    on_props_changed: Option<Listener>,
) -> Result<(), Error> {
    DisplayManager::global()?.enable_watchdog(interval, on_count_changed, on_props_changed)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn disable_watchdog() -> Result<(), Error> {
    DisplayManager::global()?.disable_watchdog()
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn is_watchdog_running() -> Result<bool, Error> {
    Ok(DisplayManager::global()?.is_watchdog_running())
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn update_watchdog_interval(interval: Duration) -> Result<(), Error> {
    DisplayManager::global()?.update_watchdog_interval(interval);
    Ok(())
}
