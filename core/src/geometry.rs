use nalgebra::{Point2, Point3};

/// Pinhole intrinsics of the depth camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Square pixels, principal point at the image center, focal length equal to the width.
    pub fn new_ideal(width: u32, height: u32) -> Self {
        Self {
            fx: width as f32,
            fy: width as f32,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
    }

    /// Project a camera-space point. Points on or behind the image plane have no projection.
    pub fn project(&self, point: &Point3<f32>) -> Option<Point2<f32>> {
        if point.z <= 0.0 {
            return None;
        }
        let x = point.x / point.z;
        let y = point.y / point.z;
        Some(Point2::new(x * self.fx + self.cx, y * self.fy + self.cy))
    }

    pub fn unproject(&self, pixel: Point2<f32>, depth: f32) -> Point3<f32> {
        let x = (pixel.x - self.cx) / self.fx;
        let y = (pixel.y - self.cy) / self.fy;
        Point3::new(x * depth, y * depth, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_unproject() {
        let k = CameraIntrinsics::new(100.0, 120.0, 32.0, 24.0);
        let p = k.unproject(Point2::new(10.0, 40.0), 2.5);
        let px = k.project(&p).unwrap();
        assert!((px.x - 10.0).abs() < 1e-4);
        assert!((px.y - 40.0).abs() < 1e-4);
        assert!((p.z - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_project_behind_camera() {
        let k = CameraIntrinsics::new_ideal(64, 48);
        assert!(k.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        assert!(k.project(&Point3::new(0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_validity() {
        assert!(CameraIntrinsics::new_ideal(64, 48).is_valid());
        assert!(!CameraIntrinsics::new(0.0, 1.0, 0.0, 0.0).is_valid());
        assert!(!CameraIntrinsics::new(f32::NAN, 1.0, 0.0, 0.0).is_valid());
    }
}
