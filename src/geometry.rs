// ============================================================================
// GEOMETRY — 2D value types shared by the scene, input and render code
// ============================================================================

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A point or offset in either scene or screen space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero-length input.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > f32::EPSILON {
            self / len
        } else {
            Self::ZERO
        }
    }

    /// Counter-clockwise perpendicular.
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Round both axes to the nearest multiple of `step`.
    pub fn snapped(self, step: f32) -> Self {
        Self::new((self.x / step).round() * step, (self.y / step).round() * step)
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl From<[f32; 2]> for Vec2 {
    fn from([x, y]: [f32; 2]) -> Self {
        Self::new(x, y)
    }
}

/// Axis-aligned box in scene space. Bounds are inclusive on every edge.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Grow every edge outward by `amount`.
    pub fn inflated(&self, amount: f32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + 2.0 * amount,
            self.height + 2.0 * amount,
        )
    }

    pub fn origin(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }
}

/// Pan/zoom transform shared by hit-testing and rendering.
///
/// `screen = (scene + translate) * scale`
/// `scene  = screen / scale - translate`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub translate: Vec2,
    pub scale: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform { translate: Vec2::ZERO, scale: 1.0 };

    pub const fn new(translate: Vec2, scale: f32) -> Self {
        Self { translate, scale }
    }

    pub fn screen_to_scene(&self, p: Vec2) -> Vec2 {
        p / self.scale - self.translate
    }

    pub fn scene_to_screen(&self, p: Vec2) -> Vec2 {
        (p + self.translate) * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapping_rounds_to_nearest_multiple() {
        assert_eq!(Vec2::new(3.9, 4.1).snapped(8.0), Vec2::new(0.0, 8.0));
        assert_eq!(Vec2::new(-5.0, 12.0).snapped(8.0), Vec2::new(-8.0, 16.0));
        assert_eq!(Vec2::new(20.0, -20.0).snapped(8.0), Vec2::new(24.0, -24.0));
    }

    #[test]
    fn perp_is_orthogonal() {
        let v = Vec2::new(3.0, 4.0);
        let p = v.perp();
        assert_eq!(v.x * p.x + v.y * p.y, 0.0);
        assert_eq!(p.length(), 5.0);
    }

    #[test]
    fn normalized_zero_stays_zero() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
        let n = Vec2::new(0.0, -2.0).normalized();
        assert_eq!(n, Vec2::new(0.0, -1.0));
    }

    #[test]
    fn rect_contains_is_inclusive() {
        let r = Rect::new(10.0, 20.0, 100.0, 50.0);
        assert!(r.contains(Vec2::new(10.0, 20.0)));
        assert!(r.contains(Vec2::new(110.0, 70.0)));
        assert!(!r.contains(Vec2::new(110.01, 70.0)));
        assert!(!r.contains(Vec2::new(9.99, 30.0)));
    }

    #[test]
    fn view_transform_round_trips() {
        let views = [
            ViewTransform::IDENTITY,
            ViewTransform::new(Vec2::new(-130.0, 48.5), 0.37),
            ViewTransform::new(Vec2::new(2000.0, -512.0), 6.25),
        ];
        let points = [Vec2::ZERO, Vec2::new(12.5, -7.0), Vec2::new(-4096.0, 3000.0)];
        for view in views {
            for p in points {
                let back = view.screen_to_scene(view.scene_to_screen(p));
                assert!((back - p).length() < 1e-2, "{p:?} -> {back:?} under {view:?}");
            }
        }
    }

    #[test]
    fn inflate_grows_all_edges() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0).inflated(2.0);
        assert_eq!(r, Rect::new(-2.0, -2.0, 14.0, 14.0));
        assert_eq!(r.center(), Vec2::new(5.0, 5.0));
    }
}
