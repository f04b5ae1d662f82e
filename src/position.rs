use crate::{Bounds, Point, Size};

/// Where a monitor goes in relation to another one.
///
/// The first word names the edge of the reference monitor the target touches, the
/// second one how the target is aligned along that edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Position {
    /// Placed at `(0, 0)` and marked as primary.
    Primary,
    LeftTop,
    LeftBottom,
    LeftCentered,
    AboveLeft,
    AboveRight,
    AboveCentered,
    RightTop,
    RightBottom,
    RightCentered,
    BelowLeft,
    BelowRight,
    BelowCentered,
}

impl Position {
    pub const ALL: [Position; 13] = [
        Position::Primary,
        Position::LeftTop,
        Position::LeftBottom,
        Position::LeftCentered,
        Position::AboveLeft,
        Position::AboveRight,
        Position::AboveCentered,
        Position::RightTop,
        Position::RightBottom,
        Position::RightCentered,
        Position::BelowLeft,
        Position::BelowRight,
        Position::BelowCentered,
    ];
}

/// Computes the top-left corner of a monitor of size `target` placed against
/// `reference` as described by `position`.
///
/// Centered alignments use floor division, so odd differences always round toward
/// negative infinity.
pub fn resolve(target: Size, reference: Bounds, position: Position) -> Point {
    let (rx, ry) = (reference.position.x, reference.position.y);
    let (rw, rh) = (reference.size.width as i32, reference.size.height as i32);
    let (tw, th) = (target.width as i32, target.height as i32);

    let left_of = rx - tw;
    let right_of = rx + rw;
    let above = ry - th;
    let below = ry + rh;
    let align_bottom = ry + rh - th;
    let align_right = rx + rw - tw;
    let center_y = ry + (rh - th).div_euclid(2);
    let center_x = rx + (rw - tw).div_euclid(2);

    let (x, y) = match position {
        Position::Primary => (0, 0),
        Position::LeftTop => (left_of, ry),
        Position::LeftBottom => (left_of, align_bottom),
        Position::LeftCentered => (left_of, center_y),
        Position::AboveLeft => (rx, above),
        Position::AboveRight => (align_right, above),
        Position::AboveCentered => (center_x, above),
        Position::RightTop => (right_of, ry),
        Position::RightBottom => (right_of, align_bottom),
        Position::RightCentered => (right_of, center_y),
        Position::BelowLeft => (rx, below),
        Position::BelowRight => (align_right, below),
        Position::BelowCentered => (center_x, below),
    };

    Point::new(x, y)
}
