//! Small math value types shared by the scene model and the payload cache.

/// A point or direction in scene space.
///
/// Pod so vertex arrays can be spilled to a scratch file as raw bytes.
#[derive(Clone, Copy, PartialEq, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
    pub fn set(&mut self, x: f64, y: f64, z: f64) {
        *self = Self { x, y, z };
    }
}

/// Position and orientation of an object within the scene.
///
/// Orientation is a plain xyz euler triple - the richer rotation machinery
/// belongs to the geometry model, which is out of scope here.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct CoordinateSystem {
    origin: Vec3,
    orientation: [f64; 3],
}

impl CoordinateSystem {
    #[must_use]
    pub fn new(origin: Vec3, orientation: [f64; 3]) -> Self {
        Self {
            origin,
            orientation,
        }
    }
    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }
    #[must_use]
    pub fn orientation(&self) -> [f64; 3] {
        self.orientation
    }
    pub fn set_orientation(&mut self, x: f64, y: f64, z: f64) {
        self.orientation = [x, y, z];
    }
    /// Overwrite this coordinate system in place, keeping the identity of the
    /// value other code may be pointing at.
    pub fn copy_from(&mut self, other: &CoordinateSystem) {
        self.origin = other.origin;
        self.orientation = other.orientation;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn copy_in_place() {
        let mut a = CoordinateSystem::default();
        let b = CoordinateSystem::new(Vec3::new(1.0, 2.0, 3.0), [0.0, 90.0, 0.0]);
        a.copy_from(&b);
        assert_eq!(a, b);
    }
}
