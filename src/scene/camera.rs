use nalgebra::{Isometry3, Matrix4, Perspective3, Point2, Point3, Vector3};

pub const DEFAULT_FOV_DEG: f32 = 75.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

/// Perspective camera looking down -Z at the origin.
#[derive(Clone, Debug)]
pub struct PerspectiveCamera {
    fov_deg: f32,
    aspect: f32,
    near: f32,
    far: f32,
    eye: Point3<f32>,
    view_projection: Matrix4<f32>,
}

/// Width over height of a `width` x `height` viewport, or 1.0 when either
/// side is zero.
pub fn viewport_aspect(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    width as f32 / height as f32
}

impl PerspectiveCamera {
    /// Out-of-range lens values fall back to the defaults.
    pub fn new(fov_deg: f32, aspect: f32, near: f32, far: f32, distance: f32) -> Self {
        let fov_deg = if fov_deg > 0.0 && fov_deg < 180.0 {
            fov_deg
        } else {
            DEFAULT_FOV_DEG
        };
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        let near = if near.is_finite() && near > 0.0 {
            near
        } else {
            DEFAULT_NEAR
        };
        let far = if far.is_finite() && far > near * 2.0 {
            far
        } else {
            (near * 2.0).max(DEFAULT_FAR)
        };
        let distance = if distance.is_finite() { distance } else { 0.0 };
        let eye = Point3::new(0.0, 0.0, distance);
        let mut camera = Self {
            fov_deg,
            aspect,
            near,
            far,
            eye,
            view_projection: Matrix4::identity(),
        };
        camera.rebuild();
        camera
    }

    /// Camera with the default lens at `distance` units from the origin.
    pub fn with_aspect(aspect: f32, distance: f32) -> Self {
        Self::new(DEFAULT_FOV_DEG, aspect, DEFAULT_NEAR, DEFAULT_FAR, distance)
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 && aspect != self.aspect {
            self.aspect = aspect;
            self.rebuild();
        }
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fov_deg(&self) -> f32 {
        self.fov_deg
    }

    pub fn eye(&self) -> Point3<f32> {
        self.eye
    }

    fn rebuild(&mut self) {
        let projection = Perspective3::new(
            self.aspect,
            self.fov_deg.to_radians(),
            self.near,
            self.far,
        );
        let view = Isometry3::look_at_rh(&self.eye, &Point3::origin(), &Vector3::y());
        self.view_projection = projection.as_matrix() * view.to_homogeneous();
    }

    /// Project a scene point onto a `width` x `height` viewport.
    ///
    /// Returns `None` for points at or behind the near plane.
    pub fn project(&self, point: &Point3<f32>, width: u32, height: u32) -> Option<Point2<f32>> {
        let clip = self.view_projection * point.to_homogeneous();
        if clip.w < self.near {
            return None;
        }
        let ndc_x = clip.x / clip.w;
        let ndc_y = clip.y / clip.w;
        Some(Point2::new(
            (ndc_x + 1.0) * 0.5 * width as f32,
            (1.0 - ndc_y) * 0.5 * height as f32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_projects_to_viewport_center() {
        let camera = PerspectiveCamera::with_aspect(640.0 / 480.0, 5.0);
        let p = camera.project(&Point3::origin(), 640, 480).unwrap();
        assert!((p.x - 320.0).abs() < 1e-3);
        assert!((p.y - 240.0).abs() < 1e-3);
    }

    #[test]
    fn up_is_up_and_right_is_right() {
        let camera = PerspectiveCamera::with_aspect(1.0, 5.0);
        let up = camera.project(&Point3::new(0.0, 1.0, 0.0), 100, 100).unwrap();
        let right = camera.project(&Point3::new(1.0, 0.0, 0.0), 100, 100).unwrap();
        assert!(up.y < 50.0);
        assert!(right.x > 50.0);
    }

    #[test]
    fn edge_of_frustum_hits_viewport_edge() {
        let camera = PerspectiveCamera::with_aspect(1.0, 5.0);
        let half_height = 5.0 * (DEFAULT_FOV_DEG.to_radians() / 2.0).tan();
        let top = camera
            .project(&Point3::new(0.0, half_height, 0.0), 100, 100)
            .unwrap();
        assert!(top.y.abs() < 1e-2);
    }

    #[test]
    fn degenerate_lens_values_fall_back() {
        assert_eq!(viewport_aspect(0, 36), 1.0);
        assert_eq!(viewport_aspect(64, 0), 1.0);
        assert_eq!(viewport_aspect(64, 32), 2.0);

        let camera = PerspectiveCamera::new(f32::NAN, 0.0, 0.0, 0.0, 5.0);
        assert_eq!(camera.aspect(), 1.0);
        assert_eq!(camera.fov_deg(), DEFAULT_FOV_DEG);
        let p = camera.project(&Point3::origin(), 100, 100).unwrap();
        assert!((p.x - 50.0).abs() < 1e-3);
    }

    #[test]
    fn set_aspect_ignores_invalid_values() {
        let mut camera = PerspectiveCamera::with_aspect(1.0, 5.0);
        camera.set_aspect(0.0);
        camera.set_aspect(f32::INFINITY);
        assert_eq!(camera.aspect(), 1.0);
        camera.set_aspect(16.0 / 9.0);
        assert_eq!(camera.aspect(), 16.0 / 9.0);
    }

    #[test]
    fn points_behind_camera_are_rejected() {
        let camera = PerspectiveCamera::with_aspect(1.0, 5.0);
        assert!(camera.project(&Point3::new(0.0, 0.0, 6.0), 100, 100).is_none());
    }
}
