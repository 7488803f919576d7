use std::fmt;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Uniform names every transform-driven demo program exposes.
pub const MODEL: &str = "model";
pub const VIEW: &str = "view";
pub const PROJECTION: &str = "projection";

/// Names resolved eagerly when a program links.
pub const WELL_KNOWN: [&str; 3] = [MODEL, VIEW, PROJECTION];

/// Location of a uniform inside a linked program.
///
/// Follows graphics-API convention: `-1` means "not present in the program".
/// Setting a value through an absent location is a silent no-op.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformLocation(i32);

impl UniformLocation {
    pub const ABSENT: UniformLocation = UniformLocation(-1);

    pub fn new(raw: i32) -> Self {
        if raw < 0 { Self::ABSENT } else { Self(raw) }
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0 < 0
    }

    /// Dense index for drivers that keep per-location tables.
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl Default for UniformLocation {
    fn default() -> Self {
        Self::ABSENT
    }
}

impl fmt::Display for UniformLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CPU-side value pushed into a uniform slot.
///
/// Matrices are column-major, matching both WGSL and `glam`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
}

impl UniformValue {
    /// Component values in column-major order.
    pub fn components(&self) -> &[f32] {
        match self {
            UniformValue::Float(v) => std::slice::from_ref(v),
            UniformValue::Vec2(v) => v,
            UniformValue::Vec3(v) => v,
            UniformValue::Vec4(v) => v,
            UniformValue::Mat3(v) => v,
            UniformValue::Mat4(v) => v,
        }
    }

    /// `(columns, rows)`; scalars and vectors report a single column.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            UniformValue::Float(_) => (1, 1),
            UniformValue::Vec2(_) => (1, 2),
            UniformValue::Vec3(_) => (1, 3),
            UniformValue::Vec4(_) => (1, 4),
            UniformValue::Mat3(_) => (3, 3),
            UniformValue::Mat4(_) => (4, 4),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "f32",
            UniformValue::Vec2(_) => "vec2<f32>",
            UniformValue::Vec3(_) => "vec3<f32>",
            UniformValue::Vec4(_) => "vec4<f32>",
            UniformValue::Mat3(_) => "mat3x3<f32>",
            UniformValue::Mat4(_) => "mat4x4<f32>",
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v.to_array())
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v.to_array())
    }
}

impl From<Mat3> for UniformValue {
    fn from(m: Mat3) -> Self {
        UniformValue::Mat3(m.to_cols_array())
    }
}

impl From<Mat4> for UniformValue {
    fn from(m: Mat4) -> Self {
        UniformValue::Mat4(m.to_cols_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_raw_collapses_to_absent() {
        assert_eq!(UniformLocation::new(-7), UniformLocation::ABSENT);
        assert!(UniformLocation::new(-1).is_absent());
        assert_eq!(UniformLocation::ABSENT.index(), None);
    }

    #[test]
    fn valid_location_has_index() {
        let loc = UniformLocation::new(3);
        assert!(!loc.is_absent());
        assert_eq!(loc.index(), Some(3));
        assert_eq!(loc.raw(), 3);
    }

    #[test]
    fn mat4_is_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let UniformValue::Mat4(cols) = UniformValue::from(m) else {
            panic!("expected mat4");
        };
        assert_eq!(&cols[12..15], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn shapes() {
        assert_eq!(UniformValue::Float(1.0).shape(), (1, 1));
        assert_eq!(UniformValue::Vec3([0.0; 3]).shape(), (1, 3));
        assert_eq!(UniformValue::Mat4([0.0; 16]).shape(), (4, 4));
        assert_eq!(UniformValue::Mat3([0.0; 9]).components().len(), 9);
    }
}
