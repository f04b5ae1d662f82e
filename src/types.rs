use std::{collections::BTreeMap, fmt, sync::Arc};

use dpi::{LogicalPosition, LogicalSize};

/// A point in the virtual desktop, in pixels. It may be negative.
pub type Point = LogicalPosition<i32>;

/// The size of a monitor, in pixels.
pub type Size = LogicalSize<u32>;

/// Snapshots of every connected monitor, keyed by monitor name.
/// Names are assigned by [`key_monitors`].
pub type MonitorMap = BTreeMap<String, MonitorSnapshot>;

/// An opaque platform identifier for a monitor.
///
/// It is made of the raw numeric id the OS hands out and the device path used to
/// address the monitor. Both parts take part in equality, so a numeric id reused
/// by a different device never matches.
///
/// # Platform-specific
/// - **Windows**: `HMONITOR` value and GDI device name (e.g. `\\.\DISPLAY1`).
/// - **macOS**: `CGDirectDisplayID` and an empty device path.
/// - **Linux**: position of the output in the `xrandr` listing and the output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorHandle {
    raw: u64,
    device: Arc<str>,
}

impl MonitorHandle {
    pub fn new(raw: u64, device: impl Into<Arc<str>>) -> Self {
        Self {
            raw,
            device: device.into(),
        }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device.is_empty() {
            write!(f, "{}", self.raw)
        } else {
            write!(f, "{}#{}", self.device, self.raw)
        }
    }
}

/// A rectangle described by its edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_bounds(bounds: Bounds) -> Self {
        Self {
            left: bounds.position.x,
            top: bounds.position.y,
            right: bounds.position.x + bounds.size.width as i32,
            bottom: bounds.position.y + bounds.size.height as i32,
        }
    }

    /// Intersection of two rectangles, or `None` if they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };

        (rect.left < rect.right && rect.top < rect.bottom).then_some(rect)
    }
}

/// The position and size of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub position: Point,
    pub size: Size,
}

impl Bounds {
    pub fn new(position: Point, size: Size) -> Self {
        Self { position, size }
    }

    /// Whether `(x, y)` lies inside the bounds. Edges are inclusive.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let right = self.position.x + self.size.width as i32;
        let bottom = self.position.y + self.size.height as i32;

        self.position.x <= x && x <= right && self.position.y <= y && y <= bottom
    }
}

/// Scale applied to a monitor, as a percentage. `100.0` means no scaling.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn uniform(value: f64) -> Self {
        Self { x: value, y: value }
    }
}

/// Dots per inch of the current resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dpi {
    pub x: u32,
    pub y: u32,
}

impl Dpi {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Rotation of a monitor in steps of 90 degrees clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    #[default]
    Normal = 0,
    Right = 1,
    Inverted = 2,
    Left = 3,
}

impl Orientation {
    /// Maps a clockwise rotation in degrees to an orientation.
    /// Returns `None` for anything that is not a multiple of 90.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Normal),
            90 => Some(Self::Right),
            180 => Some(Self::Inverted),
            270 => Some(Self::Left),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        self as u32 * 90
    }
}

impl TryFrom<u32> for Orientation {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Right),
            2 => Ok(Self::Inverted),
            3 => Ok(Self::Left),
            other => Err(other),
        }
    }
}

/// A resolution and refresh rate supported by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub frequency: f64,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, frequency: f64) -> Self {
        Self {
            width,
            height,
            frequency,
        }
    }
}

/// Power state of a monitor as far as the platform can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    On,
    Off,
    Suspended,
}

/// Everything known about one monitor at the time it was enumerated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorSnapshot {
    /// The name reported by the OS. It is not guaranteed to be unique.
    pub system_name: String,
    /// The platform handle. It may change after a hot-plug, attach or detach.
    pub handle: MonitorHandle,
    /// Whether the monitor is the primary one.
    pub is_primary: bool,
    /// Top-left corner in the virtual desktop.
    pub position: Point,
    /// Size in pixels.
    pub size: Size,
    /// Area usable by application windows (no docks or taskbars).
    pub work_area: Rect,
    /// Text scale, in percent.
    pub scale: Scale,
    pub dpi: Dpi,
    pub orientation: Orientation,
    /// Refresh rate in Hz.
    pub frequency: f64,
    /// Bits per pixel.
    pub color_depth: u32,
}

impl MonitorSnapshot {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.position, self.size)
    }
}

/// Keys monitors by their system name.
///
/// When several monitors share a system name, every one of them gets the raw
/// handle appended (`"{system_name}_{raw}"`) so keys stay unique.
pub fn key_monitors(monitors: Vec<MonitorSnapshot>) -> MonitorMap {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for monitor in &monitors {
        *counts.entry(monitor.system_name.as_str()).or_default() += 1;
    }

    let duplicated: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_owned())
        .collect();

    monitors
        .into_iter()
        .map(|monitor| {
            let name = if duplicated.contains(&monitor.system_name) {
                format!("{}_{}", monitor.system_name, monitor.handle.raw())
            } else {
                monitor.system_name.clone()
            };
            (name, monitor)
        })
        .collect()
}
