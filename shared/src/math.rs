//! Small 3D math types shared by the server and its clients.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A point or direction in world space, in game units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_sqr(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_sqr().sqrt()
    }

    /// Returns the unit vector, or zero for a zero-length input.
    pub fn normalize(self) -> Vec3 {
        let len = self.length();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            Vec3::ZERO
        }
    }

    /// Linear blend written as `a * (1 - t) + b * t` so both endpoints are exact.
    pub fn lerp(self, other: Vec3, t: f32) -> Vec3 {
        let s = 1.0 - t;
        Vec3 {
            x: self.x * s + other.x * t,
            y: self.y * s + other.y * t,
            z: self.z * s + other.z * t,
        }
    }

    pub fn component_min(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    pub fn component_max(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// True when every component differs by at most `epsilon`.
    pub fn approx_eq(self, other: Vec3, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Euler orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QAngle {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl QAngle {
    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Blends each component along the shortest rotational path.
    pub fn lerp(self, other: QAngle, t: f32) -> QAngle {
        QAngle {
            pitch: lerp_angle(self.pitch, other.pitch, t),
            yaw: lerp_angle(self.yaw, other.yaw, t),
            roll: lerp_angle(self.roll, other.roll, t),
        }
    }

    /// Compares component-wise modulo 360 degrees.
    pub fn approx_eq(self, other: QAngle, epsilon: f32) -> bool {
        angle_diff(self.pitch, other.pitch).abs() <= epsilon
            && angle_diff(self.yaw, other.yaw).abs() <= epsilon
            && angle_diff(self.roll, other.roll).abs() <= epsilon
    }

    /// Unit forward vector (yaw around +z, pitch positive looking down).
    pub fn forward(self) -> Vec3 {
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(cp * cy, cp * sy, -sp)
    }
}

/// Wraps an angle into `[-180, 180)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped.is_finite() {
        wrapped
    } else {
        0.0
    }
}

/// Signed shortest difference `to - from` in degrees.
pub fn angle_diff(to: f32, from: f32) -> f32 {
    normalize_angle(to - from)
}

/// Interpolates between two angles without taking the long way around,
/// so 359 -> 1 passes through 0 rather than 180.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    if t <= 0.0 {
        return from;
    }
    if t >= 1.0 {
        return to;
    }
    normalize_angle(from + angle_diff(to, from) * t)
}
