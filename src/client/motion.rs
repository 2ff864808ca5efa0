//! Local motion
//!
//! The locally authoritative transform of the player this client controls.

use glam::{Quat, Vec3};

use crate::client::input::InputCommand;
use crate::config::ClientConfig;
use crate::protocol::{wrap_degrees, Transform};

/// Source of the local player's transform
pub trait LocalMotion {
    /// Current transform, read once per tick
    fn transform(&self) -> Transform;

    /// Teleport to `transform`, used when the local entity spawns
    fn place(&mut self, transform: Transform);

    /// Advance by `dt` seconds using this tick's commands
    fn integrate(&mut self, commands: &[InputCommand], dt: f32);
}

/// Constant-speed planar motion with no physics
#[derive(Debug, Clone)]
pub struct KinematicMotion {
    position: Vec3,
    yaw: f32,
    move_speed: f32,
    rotate_speed: f32,
}

impl KinematicMotion {
    pub fn new(move_speed: f32, rotate_speed: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            yaw: 0.0,
            move_speed,
            rotate_speed,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.move_speed, config.rotate_speed)
    }
}

impl LocalMotion for KinematicMotion {
    fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            yaw: self.yaw,
        }
    }

    fn place(&mut self, transform: Transform) {
        self.position = transform.position;
        self.yaw = wrap_degrees(transform.yaw);
    }

    fn integrate(&mut self, commands: &[InputCommand], dt: f32) {
        let mut strafe = 0.0;
        let mut forward = 0.0;
        let mut turn = 0.0;
        for command in commands {
            match *command {
                InputCommand::Move {
                    strafe: s,
                    forward: f,
                } => {
                    strafe += s;
                    forward += f;
                }
                InputCommand::Rotate(axis) => turn += axis,
            }
        }

        let turn = f32::clamp(turn, -1.0, 1.0);
        self.yaw = wrap_degrees(self.yaw + turn * self.rotate_speed * dt);

        // Diagonal input is no faster than straight input
        let mut local = Vec3::new(strafe, 0.0, forward);
        if local.length_squared() > 1.0 {
            local = local.normalize();
        }
        let heading = Quat::from_rotation_y(self.yaw.to_radians());
        self.position += heading * local * self.move_speed * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Vec3, expected: Vec3) {
        assert!(
            actual.abs_diff_eq(expected, 1e-4),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_forward_at_zero_yaw() {
        let mut motion = KinematicMotion::new(5.0, 150.0);
        motion.integrate(
            &[InputCommand::Move {
                strafe: 0.0,
                forward: 1.0,
            }],
            0.1,
        );
        assert_close(motion.transform().position, Vec3::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn test_forward_follows_yaw() {
        let mut motion = KinematicMotion::new(2.0, 150.0);
        motion.place(Transform::new(Vec3::ZERO, 90.0));
        motion.integrate(
            &[InputCommand::Move {
                strafe: 0.0,
                forward: 1.0,
            }],
            1.0,
        );
        assert_close(motion.transform().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_diagonal_is_normalized() {
        let mut motion = KinematicMotion::new(1.0, 0.0);
        motion.integrate(
            &[InputCommand::Move {
                strafe: 1.0,
                forward: 1.0,
            }],
            1.0,
        );
        assert!((motion.transform().position.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_rotation_wraps() {
        let mut motion = KinematicMotion::new(0.0, 100.0);
        motion.place(Transform::new(Vec3::ZERO, 350.0));
        motion.integrate(&[InputCommand::Rotate(1.0)], 0.2);
        assert!((motion.transform().yaw - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_no_commands_no_motion() {
        let mut motion = KinematicMotion::new(5.0, 150.0);
        motion.place(Transform::new(Vec3::Y, 45.0));
        motion.integrate(&[], 0.02);
        assert_eq!(motion.transform(), Transform::new(Vec3::Y, 45.0));
    }
}
