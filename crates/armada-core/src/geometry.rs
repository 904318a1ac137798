//! Owned value structs embedded in their owning entities. None of these have
//! an identity or a lifecycle of their own.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Orientation {
    /// Identity quaternion.
    #[must_use]
    pub fn identity() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// A robot pose in the localization frame of its inspection area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    pub orientation: Orientation,
    pub frame: PoseFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseFrame {
    Asset,
    Robot,
}

impl Pose {
    #[must_use]
    pub fn new(position: Position, orientation: Orientation) -> Self {
        Self { position, orientation, frame: PoseFrame::Asset }
    }
}

/// Horizontal polygon plus a z-range, scoping an inspection area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub polygon: Vec<[f64; 2]>,
    pub z_min: f64,
    pub z_max: f64,
}

impl Boundary {
    /// Point-in-polygon by ray casting, including the z-range check.
    #[must_use]
    pub fn contains(&self, point: &Position) -> bool {
        if point.z < self.z_min || point.z > self.z_max {
            return false;
        }
        let mut inside = false;
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.polygon[i];
            let [xj, yj] = self.polygon[j];
            if (yi > point.y) != (yj > point.y)
                && point.x < (xj - xi) * (point.y - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Affine mapping from localization coordinates to map pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformationMatrices {
    pub c1: f64,
    pub c2: f64,
    pub d1: f64,
    pub d2: f64,
}

impl TransformationMatrices {
    #[must_use]
    pub fn apply(&self, position: &Position) -> (f64, f64) {
        (self.c1 * position.x + self.d1, self.c2 * position.y + self.d2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata {
    pub map_name: String,
    pub boundary: Boundary,
    pub transformation_matrices: TransformationMatrices,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Boundary {
        Boundary {
            polygon: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            z_min: 0.0,
            z_max: 2.0,
        }
    }

    #[test]
    fn boundary_contains_interior_point() {
        assert!(unit_square().contains(&Position::new(0.5, 0.5, 1.0)));
    }

    #[test]
    fn boundary_rejects_point_outside_polygon() {
        assert!(!unit_square().contains(&Position::new(1.5, 0.5, 1.0)));
    }

    #[test]
    fn boundary_rejects_point_outside_z_range() {
        assert!(!unit_square().contains(&Position::new(0.5, 0.5, 5.0)));
    }

    #[test]
    fn transformation_maps_origin_to_offset() {
        let t = TransformationMatrices { c1: 2.0, c2: 2.0, d1: 10.0, d2: 20.0 };
        assert_eq!(t.apply(&Position::new(0.0, 0.0, 0.0)), (10.0, 20.0));
    }
}
