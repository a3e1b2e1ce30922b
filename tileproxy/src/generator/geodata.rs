//! Geodata documents: feature layers serialized as quantized JSON.
//!
//! Output layout:
//!
//! ```text
//! {
//!   "version": 1,
//!   "groups": [{
//!     "id": "<layer>",
//!     "bbox": [[llx, lly, llz], [urx, ury, urz]],
//!     "resolution": 4096,
//!     "polygons": [{ "id", "properties", "vertices": [...], "surface": [...] }],
//!     "lines": [{ "id", "properties", "lines": [[...]] }]
//!   }]
//! }
//! ```
//!
//! Vertices are stored as integers in `0..=resolution` relative to the
//! group's bounding box.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::geo::CsConvertor;

/// Geometry of a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Triangulated surface: vertices plus index triples.
    Surface {
        vertices: Vec<[f64; 3]>,
        faces: Vec<[u32; 3]>,
    },
    /// Closed ring, e.g. a footprint outline.
    Ring(Vec<[f64; 3]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: u64,
    pub properties: Map<String, Value>,
    pub geometry: Geometry,
}

impl Feature {
    fn points(&self) -> &[[f64; 3]] {
        match &self.geometry {
            Geometry::Surface { vertices, .. } => vertices,
            Geometry::Ring(ring) => ring,
        }
    }

    fn points_mut(&mut self) -> &mut [[f64; 3]] {
        match &mut self.geometry {
            Geometry::Surface { vertices, .. } => vertices,
            Geometry::Ring(ring) => ring,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
        }
    }
}

/// Axis-aligned 3D bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub ll: [f64; 3],
    pub ur: [f64; 3],
}

impl BoundingBox {
    fn of<'a>(points: impl IntoIterator<Item = &'a [f64; 3]>) -> Option<Self> {
        let mut out: Option<BoundingBox> = None;
        for p in points {
            match &mut out {
                Some(b) => {
                    for i in 0..3 {
                        b.ll[i] = b.ll[i].min(p[i]);
                        b.ur[i] = b.ur[i].max(p[i]);
                    }
                }
                None => out = Some(BoundingBox { ll: *p, ur: *p }),
            }
        }
        out
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.ll[0] + self.ur[0]) / 2.0,
            (self.ll[1] + self.ur[1]) / 2.0,
            (self.ll[2] + self.ur[2]) / 2.0,
        ]
    }

    pub fn as_array(&self) -> [f64; 6] {
        [
            self.ll[0], self.ll[1], self.ll[2], self.ur[0], self.ur[1], self.ur[2],
        ]
    }
}

/// Collection of feature layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureLayers {
    pub layers: Vec<Layer>,
}

impl FeatureLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of(
            self.layers
                .iter()
                .flat_map(|l| l.features.iter())
                .flat_map(|f| f.points().iter()),
        )
    }

    /// Converts every vertex horizontally; heights are kept.
    ///
    /// # Errors
    ///
    /// `Internal` if a vertex cannot be converted.
    pub fn transform(&mut self, conv: &CsConvertor) -> Result<()> {
        if conv.is_identity() {
            return Ok(());
        }
        for feature in self.layers.iter_mut().flat_map(|l| l.features.iter_mut()) {
            for p in feature.points_mut() {
                let (x, y) = conv.convert(p[0], p[1]).ok_or_else(|| {
                    Error::internal(format!("Cannot convert vertex ({}, {}).", p[0], p[1]))
                })?;
                p[0] = x;
                p[1] = y;
            }
        }
        Ok(())
    }

    /// Scales heights by the Mercator scale factor `1 / cos(lat)` of each
    /// vertex. `to_geographic` converts vertices to WGS84.
    ///
    /// # Errors
    ///
    /// `Internal` if a vertex cannot be converted.
    pub fn adjust_vertical(&mut self, to_geographic: &CsConvertor) -> Result<()> {
        for feature in self.layers.iter_mut().flat_map(|l| l.features.iter_mut()) {
            for p in feature.points_mut() {
                let (_, lat) = to_geographic.convert(p[0], p[1]).ok_or_else(|| {
                    Error::internal(format!("Cannot convert vertex ({}, {}).", p[0], p[1]))
                })?;
                p[2] /= lat.to_radians().cos();
            }
        }
        Ok(())
    }

    /// Serializes the layers with coordinates quantized to `resolution`.
    pub fn to_geodata_json(&self, resolution: u32) -> Result<Vec<u8>> {
        let groups: Vec<Group> = self
            .layers
            .iter()
            .filter_map(|layer| Group::build(layer, resolution))
            .collect();
        serde_json::to_vec(&Document { version: 1, groups })
            .map_err(|e| Error::internal(format!("Cannot serialize geodata: {}", e)))
    }
}

#[derive(Serialize)]
struct Document {
    version: u32,
    groups: Vec<Group>,
}

#[derive(Serialize)]
struct Group {
    id: String,
    bbox: [[f64; 3]; 2],
    resolution: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    polygons: Vec<Polygon>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    lines: Vec<Lines>,
}

#[derive(Serialize)]
struct Polygon {
    id: u64,
    properties: Map<String, Value>,
    vertices: Vec<u32>,
    surface: Vec<u32>,
}

#[derive(Serialize)]
struct Lines {
    id: u64,
    properties: Map<String, Value>,
    lines: Vec<Vec<[u32; 3]>>,
}

impl Group {
    fn build(layer: &Layer, resolution: u32) -> Option<Self> {
        let bbox = BoundingBox::of(layer.features.iter().flat_map(|f| f.points().iter()))?;
        let quantize = |p: &[f64; 3]| -> [u32; 3] {
            let mut q = [0u32; 3];
            for i in 0..3 {
                let size = bbox.ur[i] - bbox.ll[i];
                if size > 0.0 {
                    let v = ((p[i] - bbox.ll[i]) / size * resolution as f64).round();
                    q[i] = v.clamp(0.0, resolution as f64) as u32;
                }
            }
            q
        };

        let mut polygons = Vec::new();
        let mut lines = Vec::new();
        for feature in &layer.features {
            match &feature.geometry {
                Geometry::Surface { vertices, faces } => polygons.push(Polygon {
                    id: feature.id,
                    properties: feature.properties.clone(),
                    vertices: vertices.iter().flat_map(quantize).collect(),
                    surface: faces.iter().flatten().copied().collect(),
                }),
                Geometry::Ring(ring) => {
                    let mut closed: Vec<[u32; 3]> = ring.iter().map(quantize).collect();
                    if let Some(first) = closed.first().copied() {
                        if closed.last() != Some(&first) {
                            closed.push(first);
                        }
                    }
                    lines.push(Lines {
                        id: feature.id,
                        properties: feature.properties.clone(),
                        lines: vec![closed],
                    });
                }
            }
        }

        Some(Group {
            id: layer.name.clone(),
            bbox: [bbox.ll, bbox.ur],
            resolution,
            polygons,
            lines,
        })
    }
}

/// Groups features into layers by name, keeping first-seen order.
pub fn layers_by_name(features: impl IntoIterator<Item = (String, Feature)>) -> FeatureLayers {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: BTreeMap<String, Vec<Feature>> = BTreeMap::new();
    for (name, feature) in features {
        if !by_name.contains_key(&name) {
            order.push(name.clone());
        }
        by_name.entry(name).or_default().push(feature);
    }
    FeatureLayers {
        layers: order
            .into_iter()
            .map(|name| {
                let features = by_name.remove(&name).unwrap_or_default();
                Layer { name, features }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn triangle(id: u64, offset: f64) -> Feature {
        Feature {
            id,
            properties: Map::new(),
            geometry: Geometry::Surface {
                vertices: vec![
                    [offset, 0.0, 0.0],
                    [offset + 10.0, 0.0, 0.0],
                    [offset, 10.0, 5.0],
                ],
                faces: vec![[0, 1, 2]],
            },
        }
    }

    #[test]
    fn test_quantized_output() {
        let mut layer = Layer::new("mesh");
        layer.features.push(triangle(1, 0.0));
        let fl = FeatureLayers {
            layers: vec![layer],
        };

        let doc: Value = serde_json::from_slice(&fl.to_geodata_json(100).unwrap()).unwrap();
        let group = &doc["groups"][0];
        assert_eq!(group["id"], "mesh");
        assert_eq!(group["bbox"], json!([[0.0, 0.0, 0.0], [10.0, 10.0, 5.0]]));
        assert_eq!(
            group["polygons"][0]["vertices"],
            json!([0, 0, 0, 100, 0, 0, 0, 100, 100])
        );
        assert_eq!(group["polygons"][0]["surface"], json!([0, 1, 2]));
        assert!(group.get("lines").is_none());
    }

    #[test]
    fn test_rings_are_closed() {
        let mut layer = Layer::new("building");
        layer.features.push(Feature {
            id: 7,
            properties: Map::new(),
            geometry: Geometry::Ring(vec![[0.0, 0.0, 1.0], [4.0, 0.0, 1.0], [4.0, 4.0, 1.0]]),
        });
        let fl = FeatureLayers {
            layers: vec![layer],
        };

        let doc: Value = serde_json::from_slice(&fl.to_geodata_json(4).unwrap()).unwrap();
        let ring = &doc["groups"][0]["lines"][0]["lines"][0];
        assert_eq!(ring.as_array().unwrap().len(), 4);
        assert_eq!(ring[0], ring[3]);
    }

    #[test]
    fn test_bounding_box_spans_layers() {
        let fl = layers_by_name(vec![
            ("a".to_string(), triangle(1, 0.0)),
            ("b".to_string(), triangle(2, 100.0)),
            ("a".to_string(), triangle(3, 50.0)),
        ]);
        assert_eq!(fl.layers.len(), 2);
        assert_eq!(fl.layers[0].name, "a");
        assert_eq!(fl.layers[0].features.len(), 2);
        assert_eq!(fl.feature_count(), 3);

        let bbox = fl.bounding_box().unwrap();
        assert_eq!(bbox.ll, [0.0, 0.0, 0.0]);
        assert_eq!(bbox.ur, [110.0, 10.0, 5.0]);
        assert_eq!(bbox.center(), [55.0, 5.0, 2.5]);
    }

    #[test]
    fn test_adjust_vertical_scales_with_latitude() {
        let mut layer = Layer::new("tower");
        layer.features.push(Feature {
            id: 1,
            properties: Map::new(),
            geometry: Geometry::Ring(vec![[14.0, 0.0, 5.0], [14.0, 60.0, 5.0]]),
        });
        let mut fl = FeatureLayers {
            layers: vec![layer],
        };
        let wgs84 = crate::geo::SrsDefinition::epsg(4326);
        fl.adjust_vertical(&CsConvertor::new(&wgs84, &wgs84).unwrap())
            .unwrap();

        let Geometry::Ring(ring) = &fl.layers[0].features[0].geometry else {
            panic!("ring expected");
        };
        assert!((ring[0][2] - 5.0).abs() < 1e-9);
        assert!((ring[1][2] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_layers_are_skipped() {
        let fl = FeatureLayers {
            layers: vec![Layer::new("empty")],
        };
        let doc: Value = serde_json::from_slice(&fl.to_geodata_json(10).unwrap()).unwrap();
        assert_eq!(doc["groups"], json!([]));
        assert!(fl.bounding_box().is_none());
    }
}
