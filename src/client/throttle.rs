//! Send throttle
//!
//! Decides, once per tick, whether the local player has moved or turned far
//! enough since the last Movement to be worth sending another.

use crate::config::ClientConfig;
use crate::protocol::{delta_angle, MovementUpdate, Transform};

/// Default distance threshold in world units
pub const DEFAULT_POSITION_THRESHOLD: f32 = 0.05;

/// Default rotation threshold in degrees
pub const DEFAULT_ROTATION_THRESHOLD: f32 = 1.0;

/// Outbound throttle for local Movement
#[derive(Debug, Clone)]
pub struct SendThrottle {
    /// Last transform actually sent; `None` until the local entity is bound
    last_sent: Option<Transform>,
    position_threshold: f32,
    rotation_threshold: f32,
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_POSITION_THRESHOLD, DEFAULT_ROTATION_THRESHOLD)
    }
}

impl SendThrottle {
    pub fn new(position_threshold: f32, rotation_threshold: f32) -> Self {
        Self {
            last_sent: None,
            position_threshold,
            rotation_threshold,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.position_threshold, config.rotation_threshold)
    }

    /// Start throttling from `sample`, as if it had just been sent
    pub fn reset(&mut self, sample: Transform) {
        self.last_sent = Some(sample);
    }

    pub fn last_sent(&self) -> Option<Transform> {
        self.last_sent
    }

    /// Whether the throttle has a local entity to track
    pub fn is_active(&self) -> bool {
        self.last_sent.is_some()
    }

    /// Check the current local transform against the last one sent.
    ///
    /// Returns the Movement to send when either threshold is strictly
    /// exceeded, recording it as the new last-sent sample. Never sends while
    /// input is disabled or before [`reset`](Self::reset).
    pub fn poll(&mut self, current: Transform, input_enabled: bool) -> Option<MovementUpdate> {
        if !input_enabled {
            return None;
        }
        let last = self.last_sent?;

        let moved = current.position.distance(last.position) > self.position_threshold;
        let turned = delta_angle(last.yaw, current.yaw).abs() > self.rotation_threshold;
        if !moved && !turned {
            return None;
        }

        self.last_sent = Some(current);
        Some(MovementUpdate {
            position: current.position,
            yaw: current.yaw,
        })
    }
}
