//! Turning a relative monitor layout into absolute coordinates.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
    Bounds, MonitorMap, Point,
    platform::LayoutTarget,
    position::{Position, resolve},
};

/// Why an [`Arrangement`] was rejected. Nothing is applied when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArrangementError {
    /// A connected monitor has no entry in the arrangement.
    #[error("The connected monitor `{0}` is missing from the arrangement.")]
    MissingMonitor(String),
    /// The arrangement names a monitor that is not connected.
    #[error("The monitor `{0}` is not connected.")]
    UnknownMonitor(String),
    #[error("No monitor is placed as primary.")]
    NoPrimary,
    #[error("More than one monitor is placed as primary: {0:?}")]
    MultiplePrimaries(Vec<String>),
    /// A relative placement has no monitor to be relative to.
    #[error("The monitor `{0}` has a relative placement but no reference monitor.")]
    MissingReference(String),
    #[error("The monitor `{monitor}` refers to `{relative_to}`, which is not in the arrangement.")]
    DanglingReference {
        monitor: String,
        relative_to: String,
    },
    #[error("The monitor `{0}` is placed relative to itself.")]
    SelfReference(String),
    /// These monitors are only reachable through a cycle, never from the primary.
    #[error("The monitors {0:?} can not be reached from the primary monitor.")]
    Unreachable(Vec<String>),
}

/// The target position of one monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Placement {
    /// Placed against another monitor. `relative_to` is `None` only for
    /// [`Position::Primary`].
    Relative {
        position: Position,
        relative_to: Option<String>,
    },
    /// Placed at a point of the virtual desktop. `(0, 0)` means primary.
    Absolute(Point),
    /// Held at a point of the virtual desktop without ever becoming primary,
    /// even at `(0, 0)`. Mirrored monitors share the primary's origin this way.
    Fixed(Point),
}

impl Placement {
    pub fn primary() -> Self {
        Self::Relative {
            position: Position::Primary,
            relative_to: None,
        }
    }

    pub fn relative(position: Position, relative_to: impl Into<String>) -> Self {
        Self::Relative {
            position,
            relative_to: Some(relative_to.into()),
        }
    }

    pub fn absolute(x: i32, y: i32) -> Self {
        Self::Absolute(Point::new(x, y))
    }

    pub fn is_primary(&self) -> bool {
        match self {
            Self::Relative { position, .. } => *position == Position::Primary,
            Self::Absolute(point) => *point == Point::new(0, 0),
            Self::Fixed(_) => false,
        }
    }
}

impl From<Position> for Placement {
    fn from(position: Position) -> Self {
        Self::Relative {
            position,
            relative_to: None,
        }
    }
}

impl From<Point> for Placement {
    fn from(point: Point) -> Self {
        Self::Absolute(point)
    }
}

/// A full target layout: one [`Placement`] per connected monitor.
///
/// # Example
/// ```
/// use monitor_control::{Arrangement, Position};
///
/// let arrangement = Arrangement::new()
///     .primary("Display_1")
///     .relative("Display_2", Position::LeftTop, "Display_1")
///     .relative("Display_3", Position::AboveLeft, "Display_1");
/// assert_eq!(arrangement.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Arrangement {
    entries: BTreeMap<String, Placement>,
}

impl Arrangement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(self, name: impl Into<String>) -> Self {
        self.with(name, Placement::primary())
    }

    pub fn relative(
        self,
        name: impl Into<String>,
        position: Position,
        relative_to: impl Into<String>,
    ) -> Self {
        self.with(name, Placement::relative(position, relative_to))
    }

    pub fn absolute(self, name: impl Into<String>, x: i32, y: i32) -> Self {
        self.with(name, Placement::absolute(x, y))
    }

    pub fn with(mut self, name: impl Into<String>, placement: Placement) -> Self {
        self.insert(name, placement);
        self
    }

    /// Sets the placement of `name`, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, placement: Placement) -> Option<Placement> {
        self.entries.insert(name.into(), placement)
    }

    pub fn get(&self, name: &str) -> Option<&Placement> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Placement)> {
        self.entries.iter()
    }
}

impl FromIterator<(String, Placement)> for Arrangement {
    fn from_iter<T: IntoIterator<Item = (String, Placement)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Absolute positions computed from an [`Arrangement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Name of the primary monitor.
    pub primary: String,
    /// Final position of every monitor, offset applied.
    pub positions: BTreeMap<String, Point>,
    /// Offset added to every position so none of them is negative.
    pub offset: Point,
}

impl LayoutPlan {
    /// One target per monitor, in name order.
    pub fn targets(&self, monitors: &MonitorMap) -> Vec<LayoutTarget> {
        self.positions
            .iter()
            .filter_map(|(name, position)| {
                monitors.get(name).map(|monitor| LayoutTarget {
                    handle: monitor.handle.clone(),
                    position: *position,
                    primary: *name == self.primary,
                })
            })
            .collect()
    }
}

/// Validates `arrangement` against the connected `monitors` and computes where
/// every monitor goes.
///
/// The primary is seeded at `(0, 0)` and every other monitor is resolved once the
/// monitor it refers to is. If any coordinate ends up negative, every position is
/// shifted by the same offset so the smallest x and y are zero.
pub fn plan(
    arrangement: &Arrangement,
    monitors: &MonitorMap,
) -> Result<LayoutPlan, ArrangementError> {
    let primary = validate(arrangement, monitors)?;

    let mut resolved: BTreeMap<String, Point> = BTreeMap::new();
    resolved.insert(primary.clone(), Point::new(0, 0));

    let mut pending: Vec<(&String, &Placement)> = arrangement
        .iter()
        .filter(|(name, _)| **name != primary)
        .collect();

    while !pending.is_empty() {
        let before = pending.len();

        pending.retain(|(name, placement)| {
            let point = match placement {
                Placement::Absolute(point) | Placement::Fixed(point) => *point,
                Placement::Relative {
                    position,
                    relative_to,
                } => {
                    // Validation guarantees a reference for every non-primary entry.
                    let Some(reference_name) = relative_to else {
                        return true;
                    };
                    let Some(reference_position) = resolved.get(reference_name) else {
                        return true;
                    };
                    let reference = Bounds::new(*reference_position, monitors[reference_name].size);
                    resolve(monitors[name.as_str()].size, reference, *position)
                }
            };

            resolved.insert((*name).clone(), point);
            false
        });

        if pending.len() == before {
            let unreachable = pending.iter().map(|(name, _)| (*name).clone()).collect();
            return Err(ArrangementError::Unreachable(unreachable));
        }
    }

    let min_x = resolved.values().map(|point| point.x).min().unwrap_or(0);
    let min_y = resolved.values().map(|point| point.y).min().unwrap_or(0);
    let offset = Point::new((-min_x).max(0), (-min_y).max(0));

    let positions = resolved
        .into_iter()
        .map(|(name, point)| (name, Point::new(point.x + offset.x, point.y + offset.y)))
        .collect();

    debug!(%primary, ?offset, "planned monitor arrangement");

    Ok(LayoutPlan {
        primary,
        positions,
        offset,
    })
}

/// Checks the invariants of an arrangement and returns the primary monitor name.
fn validate(arrangement: &Arrangement, monitors: &MonitorMap) -> Result<String, ArrangementError> {
    if let Some(name) = monitors.keys().find(|name| arrangement.get(name).is_none()) {
        return Err(ArrangementError::MissingMonitor(name.clone()));
    }

    let mut primaries = BTreeSet::new();
    for (name, placement) in arrangement.iter() {
        if !monitors.contains_key(name) {
            return Err(ArrangementError::UnknownMonitor(name.clone()));
        }

        if placement.is_primary() {
            primaries.insert(name.clone());
            continue;
        }

        if let Placement::Relative { relative_to, .. } = placement {
            match relative_to {
                None => return Err(ArrangementError::MissingReference(name.clone())),
                Some(reference) if reference == name => {
                    return Err(ArrangementError::SelfReference(name.clone()));
                }
                Some(reference) if arrangement.get(reference).is_none() => {
                    return Err(ArrangementError::DanglingReference {
                        monitor: name.clone(),
                        relative_to: reference.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    let mut primaries = primaries.into_iter();
    match (primaries.next(), primaries.next()) {
        (None, _) => Err(ArrangementError::NoPrimary),
        (Some(primary), None) => Ok(primary),
        (Some(first), Some(second)) => {
            let mut names = vec![first, second];
            names.extend(primaries);
            Err(ArrangementError::MultiplePrimaries(names))
        }
    }
}
