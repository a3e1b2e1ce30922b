//! Planar extents and raster sizes.

use serde::{Deserialize, Serialize};

/// Axis-aligned 2D extents (lower-left / upper-right corners).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents2 {
    pub ll: [f64; 2],
    pub ur: [f64; 2],
}

impl Extents2 {
    /// Creates extents from corner coordinates.
    pub fn new(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        Self {
            ll: [llx, lly],
            ur: [urx, ury],
        }
    }

    pub fn width(&self) -> f64 {
        self.ur[0] - self.ll[0]
    }

    pub fn height(&self) -> f64 {
        self.ur[1] - self.ll[1]
    }

    /// Returns true when the extents enclose a non-empty area.
    pub fn is_valid(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.ll[0] + self.ur[0]) / 2.0,
            (self.ll[1] + self.ur[1]) / 2.0,
        ]
    }

    /// Returns true if the two extents overlap with non-zero area.
    pub fn overlaps(&self, other: &Extents2) -> bool {
        self.ll[0] < other.ur[0]
            && other.ll[0] < self.ur[0]
            && self.ll[1] < other.ur[1]
            && other.ll[1] < self.ur[1]
    }
}

/// Full 3D extents, used for geodata metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents3 {
    pub ll: [f64; 3],
    pub ur: [f64; 3],
}

impl Extents3 {
    /// Extents that contain nothing; updating them with a point yields that point.
    pub fn invalid() -> Self {
        Self {
            ll: [f64::INFINITY; 3],
            ur: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn update(&mut self, p: [f64; 3]) {
        for (i, v) in p.iter().enumerate() {
            self.ll[i] = self.ll[i].min(*v);
            self.ur[i] = self.ur[i].max(*v);
        }
    }

    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.ll[i] <= self.ur[i])
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.ll[0] + self.ur[0]) / 2.0,
            (self.ll[1] + self.ur[1]) / 2.0,
            (self.ll[2] + self.ur[2]) / 2.0,
        ]
    }
}

/// Raster size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size2 {
    pub width: u32,
    pub height: u32,
}

impl Size2 {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extents2_geometry() {
        let e = Extents2::new(-10.0, -5.0, 10.0, 5.0);
        assert_eq!(e.width(), 20.0);
        assert_eq!(e.height(), 10.0);
        assert_eq!(e.center(), [0.0, 0.0]);
        assert!(e.is_valid());
        assert!(!Extents2::new(0.0, 0.0, 0.0, 1.0).is_valid());
    }

    #[test]
    fn test_extents2_overlap_excludes_touching() {
        let a = Extents2::new(0.0, 0.0, 1.0, 1.0);
        let b = Extents2::new(1.0, 0.0, 2.0, 1.0);
        let c = Extents2::new(0.5, 0.5, 1.5, 1.5);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_extents3_update() {
        let mut e = Extents3::invalid();
        assert!(!e.is_valid());
        e.update([1.0, 2.0, 3.0]);
        e.update([-1.0, 4.0, 0.0]);
        assert!(e.is_valid());
        assert_eq!(e.ll, [-1.0, 2.0, 0.0]);
        assert_eq!(e.ur, [1.0, 4.0, 3.0]);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn extents() -> impl Strategy<Value = Extents2> {
            (-1000i32..1000, -1000i32..1000, 1i32..500, 1i32..500).prop_map(|(x, y, w, h)| {
                Extents2::new(x as f64, y as f64, (x + w) as f64, (y + h) as f64)
            })
        }

        proptest! {
            #[test]
            fn test_overlap_is_symmetric(a in extents(), b in extents()) {
                prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
            }

            #[test]
            fn test_valid_extents_contain_center(e in extents()) {
                prop_assert!(e.is_valid());
                prop_assert!(e.overlaps(&e));
                let [cx, cy] = e.center();
                prop_assert!(e.ll[0] < cx && cx < e.ur[0]);
                prop_assert!(e.ll[1] < cy && cy < e.ur[1]);
            }
        }
    }
}
