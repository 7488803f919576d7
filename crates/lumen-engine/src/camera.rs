//! First-person camera, perspective projection and model transforms.

use glam::{Mat4, Vec3};

use crate::input::{InputSnapshot, Key};

/// Pitch is clamped to this many degrees either side of the horizon.
pub const PITCH_LIMIT: f32 = 89.0;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraConfig {
    pub position: Vec3,
    pub world_up: Vec3,
    /// Degrees. -90 looks down -Z.
    pub yaw: f32,
    /// Degrees.
    pub pitch: f32,
    /// World units per second.
    pub move_speed: f32,
    /// Degrees per logical pixel of cursor motion.
    pub turn_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            world_up: Vec3::Y,
            yaw: -90.0,
            pitch: 0.0,
            move_speed: 5.0,
            turn_speed: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    front: Vec3,
    up: Vec3,
    right: Vec3,
    world_up: Vec3,

    yaw: f32,
    pitch: f32,

    move_speed: f32,
    turn_speed: f32,
}

impl Camera {
    pub fn new(config: CameraConfig) -> Self {
        let mut camera = Self {
            position: config.position,
            front: Vec3::NEG_Z,
            up: config.world_up,
            right: Vec3::X,
            world_up: config.world_up,
            yaw: config.yaw,
            pitch: config.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            move_speed: config.move_speed,
            turn_speed: config.turn_speed,
        };
        camera.update();
        camera
    }

    /// WASD movement along the view direction, scaled by `dt` seconds.
    pub fn key_control(&mut self, input: &InputSnapshot<'_>, dt: f32) {
        let step = self.move_speed * dt;

        if input.key_down(Key::W) {
            self.position += self.front * step;
        }
        if input.key_down(Key::S) {
            self.position -= self.front * step;
        }
        if input.key_down(Key::A) {
            self.position -= self.right * step;
        }
        if input.key_down(Key::D) {
            self.position += self.right * step;
        }
    }

    /// Turns by a cursor delta in window space (`dy` grows downwards).
    pub fn mouse_control(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }

        self.yaw += dx * self.turn_speed;
        self.pitch = (self.pitch - dy * self.turn_speed).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.update();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    fn update(&mut self) {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        self.front = Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize();
        self.right = self.front.cross(self.world_up).normalize();
        self.up = self.right.cross(self.front).normalize();
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(CameraConfig::default())
    }
}

/// Perspective projection with a 0..1 depth range.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Projection {
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self { fov_y: 45.0, near: 0.1, far: 100.0 }
    }
}

impl Projection {
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y.to_radians(), aspect, self.near, self.far)
    }
}

/// Translate, then rotate about an axis, then scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub axis: Vec3,
    /// Radians.
    pub angle: f32,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            axis: Vec3::Y,
            angle: 0.0,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self {
            translation: Vec3::new(x, y, z),
            ..Default::default()
        }
    }

    pub fn rotated(mut self, axis: Vec3, angle: f32) -> Self {
        self.axis = axis;
        self.angle = angle;
        self
    }

    pub fn scaled(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        let axis = self.axis.try_normalize().unwrap_or(Vec3::Y);
        Mat4::from_translation(self.translation)
            * Mat4::from_axis_angle(axis, self.angle)
            * Mat4::from_scale(self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputEvent, InputFrame, InputState, KeyState};

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn starts_looking_down_negative_z() {
        let camera = Camera::default();
        assert!(approx(camera.front(), Vec3::NEG_Z));

        let eye = camera.view_matrix().transform_point3(Vec3::new(0.0, 0.0, -2.0));
        assert!(approx(eye, Vec3::new(0.0, 0.0, -2.0)));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.mouse_control(0.0, -10_000.0);
        assert_eq!(camera.pitch(), PITCH_LIMIT);
        camera.mouse_control(0.0, 10_000.0);
        assert_eq!(camera.pitch(), -PITCH_LIMIT);
        assert!(camera.front().is_finite());
    }

    #[test]
    fn cursor_right_turns_right() {
        let mut camera = Camera::default();
        camera.mouse_control(180.0, 0.0);
        assert!((camera.yaw() - 0.0).abs() < 1e-5);
        assert!(approx(camera.front(), Vec3::X));
    }

    #[test]
    fn wasd_scales_with_delta_time() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();
        state.apply_event(
            &mut frame,
            InputEvent::Key { key: Key::W, state: KeyState::Pressed, repeat: false },
        );
        state.apply_event(
            &mut frame,
            InputEvent::Key { key: Key::D, state: KeyState::Pressed, repeat: false },
        );

        let mut camera = Camera::default();
        camera.key_control(&InputSnapshot::new(&state, &frame), 0.5);
        assert!(approx(camera.position(), Vec3::new(2.5, 0.0, -2.5)));
    }

    #[test]
    fn transform_scales_before_translating() {
        let m = Transform::from_xyz(0.0, 0.0, -2.5).scaled(0.4).matrix();
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(p, Vec3::new(0.4, 0.0, -2.5)));
    }

    #[test]
    fn transform_rotates_about_axis() {
        let m = Transform::default()
            .rotated(Vec3::Z, std::f32::consts::FRAC_PI_2)
            .matrix();
        assert!(approx(m.transform_point3(Vec3::X), Vec3::Y));
    }

    #[test]
    fn projection_maps_near_plane_to_zero_depth() {
        let proj = Projection::default().matrix(4.0 / 3.0);
        let clip = proj * glam::Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-5);
    }
}
