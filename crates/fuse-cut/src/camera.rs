//! Calibrated cameras, depth maps and structure-from-motion landmarks.
//!
//! These are the inputs handed over by the calibration and depth-estimation
//! stages. Cameras are pinhole with no distortion: a world point `X` maps to
//! `K * R * (X - C)`.

use hashbrown::HashMap;
use mvs_mesh::VertexColor;
use nalgebra::{Matrix3, Point2, Point3, Unit, Vector3};

use crate::error::{FuseCutError, FuseCutResult};

/// A calibrated pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Intrinsics. Skew is ignored.
    pub k: Matrix3<f64>,
    /// World-to-camera rotation.
    pub r: Matrix3<f64>,
    /// Optical center in world coordinates.
    pub center: Point3<f64>,
    pub width: u32,
    pub height: u32,
}

impl Camera {
    pub fn new(k: Matrix3<f64>, r: Matrix3<f64>, center: Point3<f64>, width: u32, height: u32) -> Self {
        Self {
            k,
            r,
            center,
            width,
            height,
        }
    }

    /// Camera at `center` looking at `target`, principal point at the image center.
    ///
    /// `up` only needs to be non-parallel to the viewing direction; the image y
    /// axis points away from it.
    pub fn look_at(
        center: Point3<f64>,
        target: Point3<f64>,
        up: Vector3<f64>,
        focal: f64,
        width: u32,
        height: u32,
    ) -> Self {
        let z = (target - center).normalize();
        let x = z.cross(&up).normalize();
        let y = z.cross(&x);
        let r = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
        let k = Matrix3::new(
            focal,
            0.0,
            width as f64 / 2.0,
            0.0,
            focal,
            height as f64 / 2.0,
            0.0,
            0.0,
            1.0,
        );
        Self::new(k, r, center, width, height)
    }

    #[inline]
    pub fn focal(&self) -> f64 {
        self.k[(0, 0)]
    }

    /// Viewing direction in world coordinates.
    pub fn optical_axis(&self) -> Vector3<f64> {
        self.r.row(2).transpose()
    }

    /// Pixel coordinates of `p`, `None` when `p` is not in front of the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let q = self.k * (self.r * (p - self.center));
        (q.z > 0.0).then(|| Point2::new(q.x / q.z, q.y / q.z))
    }

    /// Unit world-space direction of the ray through pixel `(x, y)`.
    pub fn pixel_ray(&self, x: f64, y: f64) -> Unit<Vector3<f64>> {
        let local = Vector3::new(
            (x - self.k[(0, 2)]) / self.k[(0, 0)],
            (y - self.k[(1, 2)]) / self.k[(1, 1)],
            1.0,
        );
        Unit::new_normalize(self.r.transpose() * local)
    }

    /// World point at `depth` along the normalized ray through `(x, y)`.
    pub fn back_project(&self, x: f64, y: f64, depth: f64) -> Point3<f64> {
        self.center + self.pixel_ray(x, y).into_inner() * depth
    }

    /// World-space footprint of one pixel at the distance of `p`.
    #[inline]
    pub fn pixel_size_at(&self, p: &Point3<f64>) -> f64 {
        (p - self.center).norm() / self.focal()
    }

    pub fn contains_pixel(&self, pixel: &Point2<f64>) -> bool {
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x < self.width as f64
            && pixel.y < self.height as f64
    }
}

/// The calibrated camera set, indexed by camera id.
#[derive(Debug, Clone, Default)]
pub struct MultiViewParams {
    pub cameras: Vec<Camera>,
}

impl MultiViewParams {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self { cameras }
    }

    pub fn camera(&self, id: u32) -> FuseCutResult<&Camera> {
        self.cameras
            .get(id as usize)
            .ok_or(FuseCutError::UnknownCamera {
                camera: id,
                camera_count: self.cameras.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Check every id of `cams` before any work starts.
    pub fn check_ids(&self, cams: &[u32]) -> FuseCutResult<()> {
        cams.iter().try_for_each(|&c| self.camera(c).map(|_| ()))
    }
}

/// Per-pixel depth and similarity of one camera. Row-major, `depth <= 0` is invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub depths: Vec<f32>,
    pub sims: Vec<f32>,
}

impl DepthMap {
    /// Depth map with every pixel invalid.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            depths: vec![-1.0; len],
            sims: vec![1.0; len],
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn depth(&self, x: u32, y: u32) -> f32 {
        self.depths[self.index(x, y)]
    }

    /// Photo-consistency cost; lower is better.
    pub fn sim(&self, x: u32, y: u32) -> f32 {
        self.sims[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, depth: f32, sim: f32) {
        let i = self.index(x, y);
        self.depths[i] = depth;
        self.sims[i] = sim;
    }

    pub fn valid_count(&self) -> usize {
        self.depths.iter().filter(|&&d| d > 0.0).count()
    }
}

/// Supplies depth maps per camera id.
pub trait DepthMapSource: Sync {
    /// `Ok(None)` when the camera has no depth map.
    fn depth_map(&self, cam: u32) -> FuseCutResult<Option<DepthMap>>;
}

/// Depth maps held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDepthMaps {
    maps: HashMap<u32, DepthMap>,
}

impl InMemoryDepthMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cam: u32, map: DepthMap) {
        self.maps.insert(cam, map);
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl DepthMapSource for InMemoryDepthMaps {
    fn depth_map(&self, cam: u32) -> FuseCutResult<Option<DepthMap>> {
        Ok(self.maps.get(&cam).cloned())
    }
}

/// A sparse 3D point with the ids of the cameras that observed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub position: Point3<f64>,
    pub observations: Vec<u32>,
    pub color: VertexColor,
}

impl Landmark {
    pub fn new(position: Point3<f64>, observations: Vec<u32>) -> Self {
        Self {
            position,
            observations,
            color: VertexColor::default(),
        }
    }
}

/// Structure-from-motion output.
#[derive(Debug, Clone, Default)]
pub struct SfmData {
    pub landmarks: Vec<Landmark>,
}

impl SfmData {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn front_camera() -> Camera {
        Camera::look_at(
            Point3::new(0.0, 0.0, -5.0),
            Point3::origin(),
            Vector3::y(),
            100.0,
            200,
            100,
        )
    }

    #[test]
    fn test_project_center() {
        let cam = front_camera();
        let px = cam.project(&Point3::origin()).unwrap();
        assert_relative_eq!(px.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(px.y, 50.0, epsilon = 1e-9);
        assert!(cam.project(&Point3::new(0.0, 0.0, -6.0)).is_none());
    }

    #[test]
    fn test_back_project_inverts_project() {
        let cam = front_camera();
        let p = Point3::new(0.3, -0.2, 1.0);
        let px = cam.project(&p).unwrap();
        let depth = (p - cam.center).norm();
        let q = cam.back_project(px.x, px.y, depth);
        assert_relative_eq!(p, q, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_size() {
        let cam = front_camera();
        assert_relative_eq!(cam.pixel_size_at(&Point3::origin()), 0.05, epsilon = 1e-9);
        assert_relative_eq!(cam.optical_axis().z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unknown_camera() {
        let mp = MultiViewParams::new(vec![front_camera()]);
        assert!(mp.camera(0).is_ok());
        let err = mp.check_ids(&[0, 3]).unwrap_err();
        assert!(matches!(err, FuseCutError::UnknownCamera { camera: 3, camera_count: 1 }));
    }

    #[test]
    fn test_depth_map_access() {
        let mut dm = DepthMap::new(4, 3);
        assert_eq!(dm.valid_count(), 0);
        dm.set(3, 2, 2.5, 0.1);
        assert_eq!(dm.depth(3, 2), 2.5);
        assert_eq!(dm.sim(3, 2), 0.1);
        assert_eq!(dm.valid_count(), 1);

        let mut maps = InMemoryDepthMaps::new();
        maps.insert(7, dm);
        assert!(maps.depth_map(7).unwrap().is_some());
        assert!(maps.depth_map(1).unwrap().is_none());
    }
}
