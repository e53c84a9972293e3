//! Bounding hexahedron for reconstruction regions.

use nalgebra::{Point3, Vector3};

/// Corner indices of the six quadrilateral faces.
const FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [1, 2, 6, 5],
    [2, 3, 7, 6],
    [3, 0, 4, 7],
];

/// A convex 8-corner box.
///
/// Corners 0..3 form the bottom face (in order around the face) and corners
/// 4..7 the top face, with corner `i + 4` above corner `i`. The box does not
/// need to be axis-aligned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hexahedron {
    pub corners: [Point3<f64>; 8],
}

impl Hexahedron {
    pub fn new(corners: [Point3<f64>; 8]) -> Self {
        Self { corners }
    }

    /// Axis-aligned box between two corners.
    pub fn from_bounds(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self {
            corners: [
                Point3::new(min.x, min.y, min.z),
                Point3::new(max.x, min.y, min.z),
                Point3::new(max.x, max.y, min.z),
                Point3::new(min.x, max.y, min.z),
                Point3::new(min.x, min.y, max.z),
                Point3::new(max.x, min.y, max.z),
                Point3::new(max.x, max.y, max.z),
                Point3::new(min.x, max.y, max.z),
            ],
        }
    }

    pub fn center(&self) -> Point3<f64> {
        let sum = self
            .corners
            .iter()
            .fold(Vector3::zeros(), |acc, c| acc + c.coords);
        Point3::from(sum / 8.0)
    }

    /// Centers of the six faces, in the order bottom, top, then the four sides.
    pub fn face_centers(&self) -> [Point3<f64>; 6] {
        FACES.map(|face| {
            let sum = face
                .iter()
                .fold(Vector3::zeros(), |acc, &i| acc + self.corners[i].coords);
            Point3::from(sum / 4.0)
        })
    }

    /// A copy scaled by `factor` around the center.
    pub fn enlarged(&self, factor: f64) -> Self {
        let c = self.center();
        Self {
            corners: self.corners.map(|p| c + (p - c) * factor),
        }
    }

    /// Trilinear point for box coordinates `u`, `v`, `w` in [0, 1]: `u` runs from
    /// corner 0 toward corner 1, `v` toward corner 3 and `w` toward corner 4.
    pub fn point_at(&self, u: f64, v: f64, w: f64) -> Point3<f64> {
        let c = &self.corners;
        let face = |o: usize| {
            c[o].coords * ((1.0 - u) * (1.0 - v))
                + c[o + 1].coords * (u * (1.0 - v))
                + c[o + 2].coords * (u * v)
                + c[o + 3].coords * ((1.0 - u) * v)
        };
        Point3::from(face(0) * (1.0 - w) + face(4) * w)
    }

    /// Axis-aligned bounding box of the corners.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let mut min = self.corners[0];
        let mut max = self.corners[0];
        for p in &self.corners[1..] {
            min = min.inf(p);
            max = max.sup(p);
        }
        (min, max)
    }

    /// Length of the main diagonal.
    pub fn diagonal(&self) -> f64 {
        let (min, max) = self.bounds();
        (max - min).norm()
    }

    /// True if `p` lies inside or on the boundary.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        let center = self.center();
        let tolerance = 1e-12 * self.diagonal().max(f64::MIN_POSITIVE);
        FACES.iter().all(|face| {
            let a = self.corners[face[0]];
            let b = self.corners[face[1]];
            let c = self.corners[face[2]];
            let mut n = (b - a).cross(&(c - a));
            if n.dot(&(center - a)) > 0.0 {
                n = -n;
            }
            let len = n.norm();
            len == 0.0 || n.dot(&(p - a)) / len <= tolerance
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Hexahedron {
        Hexahedron::from_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_contains() {
        let hex = unit_box();
        assert!(hex.contains(&Point3::new(0.5, 0.5, 0.5)));
        assert!(hex.contains(&Point3::new(0.0, 0.0, 0.0)));
        assert!(!hex.contains(&Point3::new(1.1, 0.5, 0.5)));
        assert!(!hex.contains(&Point3::new(0.5, -0.01, 0.5)));
    }

    #[test]
    fn test_contains_rotated_box() {
        // Unit box rotated 45 degrees around Z.
        let rot = nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_4);
        let hex = Hexahedron::new(unit_box().corners.map(|p| rot * p));
        assert!(hex.contains(&(rot * Point3::new(0.9, 0.9, 0.5))));
        assert!(!hex.contains(&Point3::new(0.9, 0.9, 0.5)));
    }

    #[test]
    fn test_face_centers_and_enlarge() {
        let hex = unit_box();
        let centers = hex.face_centers();
        assert_eq!(centers[0], Point3::new(0.5, 0.5, 0.0));
        assert_eq!(centers[1], Point3::new(0.5, 0.5, 1.0));

        let big = hex.enlarged(2.0);
        let (min, max) = big.bounds();
        assert_eq!(min, Point3::new(-0.5, -0.5, -0.5));
        assert_eq!(max, Point3::new(1.5, 1.5, 1.5));
    }

    #[test]
    fn test_point_at_corners_and_center() {
        let hex = Hexahedron::from_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 4.0, 6.0));
        assert_eq!(hex.point_at(0.0, 0.0, 0.0), hex.corners[0]);
        assert_eq!(hex.point_at(1.0, 0.0, 0.0), hex.corners[1]);
        assert_eq!(hex.point_at(1.0, 1.0, 0.0), hex.corners[2]);
        assert_eq!(hex.point_at(0.0, 1.0, 1.0), hex.corners[7]);
        assert_eq!(hex.point_at(0.5, 0.5, 0.5), hex.center());
    }
}
