use cgmath::{Matrix4, Point3};

/// An axis-aligned bounding box (AABB) in 3D space.
///
/// The transform core only seeds and invalidates bounding volumes; the
/// intersection math lives with the collaborators that consume them.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// Creates a new AABB from min and max points.
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// Creates an AABB that encompasses all the given points.
    /// Returns None if the points slice is empty.
    pub fn from_points(points: &[Point3<f32>]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut min = points[0];
        let mut max = points[0];

        for point in points.iter().skip(1) {
            min.x = min.x.min(point.x);
            min.y = min.y.min(point.y);
            min.z = min.z.min(point.z);

            max.x = max.x.max(point.x);
            max.y = max.y.max(point.y);
            max.z = max.z.max(point.z);
        }

        Some(Self { min, max })
    }

    /// Returns the 8 corner points of the AABB.
    pub fn corners(&self) -> [Point3<f32>; 8] {
        [
            Point3::new(self.min.x, self.min.y, self.min.z),
            Point3::new(self.max.x, self.min.y, self.min.z),
            Point3::new(self.min.x, self.max.y, self.min.z),
            Point3::new(self.max.x, self.max.y, self.min.z),
            Point3::new(self.min.x, self.min.y, self.max.z),
            Point3::new(self.max.x, self.min.y, self.max.z),
            Point3::new(self.min.x, self.max.y, self.max.z),
            Point3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    /// Transforms the AABB by the given 4x4 transformation matrix.
    ///
    /// Handles rotation/scaling/shearing by transforming all 8 corners and
    /// computing a new axis-aligned box around them.
    pub fn transform(&self, matrix: &Matrix4<f32>) -> Self {
        let corners = self.corners();

        let transformed_corners: Vec<Point3<f32>> = corners
            .iter()
            .map(|corner| {
                let homogeneous = matrix * corner.to_homogeneous();
                Point3::from_homogeneous(homogeneous)
            })
            .collect();

        // Unwrap is safe because we know we have 8 corners
        Self::from_points(&transformed_corners).unwrap()
    }

    /// Returns the smallest AABB containing both this box and `other`.
    pub fn merge(&self, other: &Aabb) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Returns this box grown by `padding` on every side.
    ///
    /// A non-positive padding returns the box unchanged.
    pub fn expanded(&self, padding: f32) -> Self {
        if padding <= 0.0 {
            return *self;
        }
        Self {
            min: Point3::new(
                self.min.x - padding,
                self.min.y - padding,
                self.min.z - padding,
            ),
            max: Point3::new(
                self.max.x + padding,
                self.max.y + padding,
                self.max.z + padding,
            ),
        }
    }

    /// Returns the center point of the box.
    pub fn center(&self) -> Point3<f32> {
        Point3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }
}
