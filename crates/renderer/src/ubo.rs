//! Uniform buffer layouts shared with shaders.
//!
//! Layouts follow std140: every member is 16-byte aligned and the structs
//! carry explicit padding so `bytemuck` can treat them as plain bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Point lights the global buffer has room for.
pub const MAX_LIGHTS: usize = 10;

/// One point light.
///
/// `position.w` is unused; `color.w` is the intensity.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// World-space position.
    pub position: Vec4,
    /// Linear RGB color and intensity.
    pub color: Vec4,
}

impl PointLight {
    /// Creates a light at `position` with `color` scaled by `intensity`.
    pub fn new(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: position.extend(1.0),
            color: color.extend(intensity),
        }
    }
}

/// Per-frame data bound at set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GlobalUbo {
    /// Camera projection matrix.
    pub projection: Mat4,
    /// World-to-camera matrix.
    pub view: Mat4,
    /// Camera-to-world matrix; its last column is the camera position.
    pub inverse_view: Mat4,
    /// `w` is the ambient intensity.
    pub ambient_light_color: Vec4,
    /// Only the first `num_lights` entries are read by shaders.
    pub point_lights: [PointLight; MAX_LIGHTS],
    pub num_lights: i32,
    _padding: [i32; 3],
}

impl GlobalUbo {
    /// Size in bytes, the instance size of the per-frame uniform buffer.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Camera matrices with default ambient light and no point lights.
    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection,
            view,
            inverse_view: view.inverse(),
            ..Self::default()
        }
    }

    /// Append a light. Returns false once all slots are taken.
    pub fn push_light(&mut self, light: PointLight) -> bool {
        let count = self.num_lights as usize;
        if count >= MAX_LIGHTS {
            return false;
        }
        self.point_lights[count] = light;
        self.num_lights += 1;
        true
    }

    pub fn lights(&self) -> &[PointLight] {
        &self.point_lights[..self.num_lights as usize]
    }
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
            ambient_light_color: Vec4::new(1.0, 1.0, 1.0, 0.02),
            point_lights: [PointLight::default(); MAX_LIGHTS],
            num_lights: 0,
            _padding: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_light_size() {
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
    }

    #[test]
    fn test_global_ubo_size() {
        // 3 matrices + ambient + lights + count and padding
        assert_eq!(GlobalUbo::SIZE, 3 * 64 + 16 + MAX_LIGHTS * 32 + 16);
        assert_eq!(GlobalUbo::SIZE % 16, 0);
    }

    #[test]
    fn test_global_ubo_casts_to_bytes() {
        let ubo = GlobalUbo::default();
        assert_eq!(bytemuck::bytes_of(&ubo).len(), GlobalUbo::SIZE);
    }

    #[test]
    fn test_push_light_stops_at_capacity() {
        let mut ubo = GlobalUbo::default();
        for i in 0..MAX_LIGHTS {
            assert!(ubo.push_light(PointLight::new(Vec3::splat(i as f32), Vec3::ONE, 1.0)));
        }
        assert!(!ubo.push_light(PointLight::default()));
        assert_eq!(ubo.lights().len(), MAX_LIGHTS);
        assert_eq!(ubo.lights()[3].position, Vec4::new(3.0, 3.0, 3.0, 1.0));
    }

    #[test]
    fn test_new_inverts_view() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let ubo = GlobalUbo::new(Mat4::IDENTITY, view);
        let round_trip = ubo.view * ubo.inverse_view;
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
