use serde::{Deserialize, Serialize};

/// World-space position of an entity.
///
/// Positions arrive from the host simulation as plain floats. The grid
/// quantizes the horizontal plane (x, y); z carries terrain height and only
/// participates in exact distances and line-of-sight checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPos {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Position on the horizontal plane, z dropped.
    pub fn planar(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// Distance ignoring the vertical axis. Grid membership and region
    /// invalidation work on the map plane.
    pub fn planar_distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            Self::ZERO
        } else {
            Self {
                x: self.x / len,
                y: self.y / len,
                z: self.z / len,
            }
        }
    }

    /// Shortest planar distance from this point to the segment a..b.
    ///
    /// Degenerate segments (a == b) fall back to point distance.
    pub fn planar_distance_to_segment(self, a: Self, b: Self) -> f32 {
        let abx = b.x - a.x;
        let aby = b.y - a.y;
        let seg_len_sq = abx * abx + aby * aby;
        if seg_len_sq == 0.0 {
            return self.planar_distance_squared(a).sqrt();
        }
        let apx = self.x - a.x;
        let apy = self.y - a.y;
        let t = ((apx * abx + apy * aby) / seg_len_sq).clamp(0.0, 1.0);
        let cx = a.x + abx * t;
        let cy = a.y + aby * t;
        let dx = self.x - cx;
        let dy = self.y - cy;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::ops::Add for WorldPos {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl std::ops::Sub for WorldPos {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}

impl std::ops::Mul<f32> for WorldPos {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self::Output {
        Self { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}

impl std::ops::Div<f32> for WorldPos {
    type Output = Self;
    fn div(self, rhs: f32) -> Self::Output {
        Self { x: self.x / rhs, y: self.y / rhs, z: self.z / rhs }
    }
}

impl std::ops::Neg for WorldPos {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self { x: -self.x, y: -self.y, z: -self.z }
    }
}
