//! `mapConfig.json` documents and the layer definitions they reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tiling::{LodRange, ReferenceFrame, TileRange};

use super::sink::{FileClass, Sink, SinkFileInfo};

/// Reference frame as published to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub id: String,
    pub description: String,
    pub srs: String,
    pub extents: [f64; 4],
    pub max_lod: u8,
    pub meta_binary_order: u8,
}

impl From<&ReferenceFrame> for FrameInfo {
    fn from(rf: &ReferenceFrame) -> Self {
        let e = rf.extents();
        Self {
            id: rf.id().to_string(),
            description: rf.description().to_string(),
            srs: rf.srs().as_str().to_string(),
            extents: [e.ll[0], e.ll[1], e.ur[0], e.ur[1]],
            max_lod: rf.max_lod(),
            meta_binary_order: rf.meta_binary_order(),
        }
    }
}

/// Initial camera position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(rename = "type")]
    pub kind: String,
    pub height_mode: String,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
    pub vertical_extent: f64,
    pub vertical_fov: f64,
}

impl Position {
    /// Camera looking straight down at `center`, seeing `vertical_extent`.
    pub fn looking_down(center: [f64; 2], vertical_extent: f64) -> Self {
        Self {
            kind: "objective".into(),
            height_mode: "floating".into(),
            position: [center[0], center[1], 0.0],
            orientation: [0.0, -90.0, 0.0],
            vertical_extent,
            vertical_fov: 55.0,
        }
    }
}

/// Surface entry of a map configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceEntry {
    pub id: String,
    pub url: String,
    pub lod_range: LodRange,
    pub tile_range: TileRange,
    pub textures: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub surfaces: BTreeMap<String, Vec<String>>,
    pub free_layers: BTreeMap<String, serde_json::Value>,
}

/// Map configuration of one resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub reference_frame: FrameInfo,
    pub surfaces: Vec<SurfaceEntry>,
    /// Bound layer id -> URL of its `boundlayer.json`.
    pub bound_layers: BTreeMap<String, String>,
    /// Free layer id -> URL of its `freelayer.json`.
    pub free_layers: BTreeMap<String, String>,
    pub view: View,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl MapConfig {
    pub fn new(rf: &ReferenceFrame) -> Self {
        Self {
            reference_frame: FrameInfo::from(rf),
            surfaces: Vec::new(),
            bound_layers: BTreeMap::new(),
            free_layers: BTreeMap::new(),
            view: View::default(),
            position: None,
        }
    }

    /// Adds a free layer and shows it in the view.
    pub fn with_free_layer(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        self.view
            .free_layers
            .insert(id.clone(), serde_json::Value::Object(Default::default()));
        self.free_layers.insert(id, url.into());
        self
    }

    pub fn with_bound_layer(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.bound_layers.insert(id.into(), url.into());
        self
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn serve(&self, sink: &mut dyn Sink) -> Result<()> {
        serve_json(self, sink)
    }
}

/// Serializes a configuration document.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| Error::internal(format!("Cannot serialize document: {}", e)))
}

/// Sends a layer definition or configuration document.
pub fn serve_json<T: Serialize>(value: &T, sink: &mut dyn Sink) -> Result<()> {
    sink.content(&to_json(value)?, &SinkFileInfo::json(FileClass::Config))
}
