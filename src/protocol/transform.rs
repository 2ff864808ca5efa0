//! Transform samples exchanged between the core and its collaborators

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Position plus yaw (degrees about the vertical axis)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub yaw: f32,
}

impl Transform {
    /// Create a transform, wrapping yaw into [0, 360)
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw: wrap_degrees(yaw),
        }
    }

    /// Transform at a position facing yaw 0
    pub fn at(position: Vec3) -> Self {
        Self { position, yaw: 0.0 }
    }
}

/// Wrap an angle in degrees into [0, 360)
pub fn wrap_degrees(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed difference from `current` to `target`, in (-180, 180]
pub fn delta_angle(current: f32, target: f32) -> f32 {
    let delta = (target - current).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}
