//! RGB-D frame input.
//!
//! A frame bundles what the capture/tracking collaborators hand to the fusion
//! core: a metric depth map, a color image, pinhole intrinsics of the depth
//! camera and the camera pose.
//!
//! ## Conventions
//!
//! - Camera space is the usual vision convention: +Z forward, +X right, +Y down.
//! - `pose` maps **world → camera**. The inverse (camera → world) is computed
//!   once at construction.
//! - A depth sample of `0`, a negative value or a non-finite value means
//!   "no data" for that pixel.
//! - The color image may have a different resolution than the depth map; color
//!   lookups scale depth-pixel coordinates into the color image.

use image::{DynamicImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use nalgebra::Matrix4;

use crate::geometry::CameraIntrinsics;
use crate::{Error, Result};

/// Single-channel metric depth map.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone)]
pub struct RgbdFrame {
    depth: DepthImage,
    color: RgbImage,
    intrinsics: CameraIntrinsics,
    pose: Matrix4<f32>,
    camera_to_world: Matrix4<f32>,
}

impl RgbdFrame {
    pub fn new(
        depth: DepthImage,
        color: RgbImage,
        intrinsics: CameraIntrinsics,
        pose: Matrix4<f32>,
    ) -> Result<Self> {
        if depth.width() == 0 || depth.height() == 0 {
            return Err(Error::InvalidInput("depth map has zero size".to_string()));
        }
        if !intrinsics.is_valid() {
            return Err(Error::InvalidInput(format!(
                "invalid camera intrinsics: {intrinsics:?}"
            )));
        }
        let camera_to_world = pose
            .try_inverse()
            .ok_or_else(|| Error::InvalidInput("camera pose is not invertible".to_string()))?;

        Ok(Self {
            depth,
            color,
            intrinsics,
            pose,
            camera_to_world,
        })
    }

    /// Build a frame from a row-major depth buffer.
    pub fn from_depth_buffer(
        width: u32,
        height: u32,
        depth: Vec<f32>,
        color: RgbImage,
        intrinsics: CameraIntrinsics,
        pose: Matrix4<f32>,
    ) -> Result<Self> {
        let len = depth.len();
        let depth = DepthImage::from_raw(width, height, depth).ok_or_else(|| {
            Error::InvalidInput(format!(
                "depth buffer of {len} samples does not match {width}x{height}"
            ))
        })?;
        Self::new(depth, color, intrinsics, pose)
    }

    pub fn from_rgba(
        depth: DepthImage,
        color: &RgbaImage,
        intrinsics: CameraIntrinsics,
        pose: Matrix4<f32>,
    ) -> Result<Self> {
        let rgb = DynamicImage::ImageRgba8(color.clone()).to_rgb8();
        Self::new(depth, rgb, intrinsics, pose)
    }

    /// Frame without color. Voxel colors are left untouched when it is fused.
    pub fn depth_only(
        depth: DepthImage,
        intrinsics: CameraIntrinsics,
        pose: Matrix4<f32>,
    ) -> Result<Self> {
        Self::new(depth, RgbImage::new(0, 0), intrinsics, pose)
    }

    pub fn width(&self) -> u32 {
        self.depth.width()
    }

    pub fn height(&self) -> u32 {
        self.depth.height()
    }

    pub fn depth(&self) -> &DepthImage {
        &self.depth
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// World → camera transform.
    pub fn pose(&self) -> &Matrix4<f32> {
        &self.pose
    }

    pub fn camera_to_world(&self) -> &Matrix4<f32> {
        &self.camera_to_world
    }

    /// Valid depth at pixel `(u, v)`, or `None` for out-of-bounds or invalid samples.
    #[inline]
    pub fn depth_at(&self, u: u32, v: u32) -> Option<f32> {
        if u >= self.depth.width() || v >= self.depth.height() {
            return None;
        }
        let d = self.depth.get_pixel(u, v).0[0];
        (d.is_finite() && d > 0.0).then_some(d)
    }

    /// Color at continuous depth-pixel coordinates `(u, v)`.
    pub fn color_at(&self, u: f32, v: f32) -> Option<[u8; 3]> {
        let (cw, ch) = self.color.dimensions();
        if cw == 0 || ch == 0 || u < 0.0 || v < 0.0 {
            return None;
        }
        let x = (u * cw as f32 / self.depth.width() as f32).floor();
        let y = (v * ch as f32 / self.depth.height() as f32).floor();
        if x >= cw as f32 || y >= ch as f32 {
            return None;
        }
        Some(self.color.get_pixel(x as u32, y as u32).0)
    }
}
