//! Resources: configured units of servable content and their definitions.
//!
//! A resource document looks like:
//!
//! ```json
//! {
//!     "referenceFrame": "webmerc",
//!     "group": "base",
//!     "id": "ortho",
//!     "type": "tms",
//!     "driver": "tms-raster",
//!     "lodRange": [0, 12],
//!     "tileRange": [0, 0, 0, 0],
//!     "revision": 2,
//!     "comment": "Orthophoto",
//!     "definition": { "dataset": "ortho.png" }
//! }
//! ```
//!
//! `lodRange`/`tileRange` may be left out for drivers whose ranges are
//! derived from the data.

mod changed;
pub mod definition;
mod fields;

pub use changed::Changed;
pub use definition::{Definition, Variant};

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::tiling::{LodRange, TileRange};

/// Full identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub reference_frame: String,
    pub group: String,
    pub id: String,
}

impl ResourceId {
    pub fn new(
        reference_frame: impl Into<String>,
        group: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            reference_frame: reference_frame.into(),
            group: group.into(),
            id: id.into(),
        }
    }

    /// `group-id`, unique within a reference frame.
    pub fn full_id(&self) -> String {
        format!("{}-{}", self.group, self.id)
    }

    /// Directory of this resource under `store_root`.
    pub fn root(&self, store_root: &Path) -> PathBuf {
        store_root
            .join(&self.reference_frame)
            .join(&self.group)
            .join(&self.id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.reference_frame, self.group, self.id)
    }
}

/// Kind of generator serving a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    Tms,
    Surface,
    Geodata,
}

impl FromStr for GeneratorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tms" => Ok(GeneratorType::Tms),
            "surface" => Ok(GeneratorType::Surface),
            "geodata" => Ok(GeneratorType::Geodata),
            other => Err(format!("not a generator type: {}", other)),
        }
    }
}

impl fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeneratorType::Tms => "tms",
            GeneratorType::Surface => "surface",
            GeneratorType::Geodata => "geodata",
        })
    }
}

/// A configured resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub generator_type: GeneratorType,
    pub lod_range: Option<LodRange>,
    pub tile_range: Option<TileRange>,
    pub revision: u32,
    pub comment: String,
    pub definition: Definition,
}

impl Resource {
    /// Parses a resource document.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed documents, `NotFound` for unknown drivers.
    pub fn parse(doc: &Value) -> Result<Self> {
        let obj = fields::as_object(doc, "resource")?;
        let id = ResourceId::new(
            fields::string(obj, "referenceFrame")?,
            fields::string(obj, "group")?,
            fields::string(obj, "id")?,
        );
        let generator_type: GeneratorType = fields::parsed(obj, "type")?;
        let driver = fields::string(obj, "driver")?;
        let definition = Definition::parse(&driver, fields::required(obj, "definition")?)?;

        if definition.generator_type() != generator_type {
            return Err(Error::parse(
                "type",
                format!(
                    "driver <{}> serves <{}> resources, not <{}>",
                    driver,
                    definition.generator_type(),
                    generator_type
                ),
            ));
        }

        let lod_range = fields::has(obj, "lodRange")
            .then(|| fields::u32_array::<2>(obj, "lodRange"))
            .transpose()?
            .map(|[min, max]| -> Result<LodRange> {
                let lod = |v: u32| {
                    u8::try_from(v).map_err(|_| Error::parse("lodRange", "LOD out of range"))
                };
                Ok(LodRange::new(lod(min)?, lod(max)?))
            })
            .transpose()?;
        if lod_range.is_some_and(|r| r.is_empty()) {
            return Err(Error::parse("lodRange", "min is greater than max"));
        }

        let tile_range = fields::has(obj, "tileRange")
            .then(|| fields::u32_array::<4>(obj, "tileRange"))
            .transpose()?
            .map(|[llx, lly, urx, ury]| TileRange::new(llx, lly, urx, ury));
        if tile_range.is_some_and(|r| r.ll[0] > r.ur[0] || r.ll[1] > r.ur[1]) {
            return Err(Error::parse("tileRange", "lower corner exceeds upper corner"));
        }

        if !definition.needs_ranges() {
            if lod_range.is_none() {
                return Err(Error::parse("lodRange", "missing required field"));
            }
            if tile_range.is_none() {
                return Err(Error::parse("tileRange", "missing required field"));
            }
        }

        Ok(Self {
            id,
            generator_type,
            lod_range,
            tile_range,
            revision: fields::u32_or(obj, "revision", 0)?,
            comment: fields::opt_string(obj, "comment")?.unwrap_or_default(),
            definition,
        })
    }

    /// Builds the resource document.
    pub fn build(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("referenceFrame".into(), json!(self.id.reference_frame));
        obj.insert("group".into(), json!(self.id.group));
        obj.insert("id".into(), json!(self.id.id));
        obj.insert("type".into(), json!(self.generator_type.to_string()));
        obj.insert("driver".into(), json!(self.driver()));
        if let Some(r) = self.lod_range {
            obj.insert("lodRange".into(), json!([r.min, r.max]));
        }
        if let Some(r) = self.tile_range {
            obj.insert("tileRange".into(), json!([r.ll[0], r.ll[1], r.ur[0], r.ur[1]]));
        }
        obj.insert("revision".into(), json!(self.revision));
        if !self.comment.is_empty() {
            obj.insert("comment".into(), json!(self.comment));
        }
        obj.insert("definition".into(), self.definition.build());
        Value::Object(obj)
    }

    pub fn driver(&self) -> &'static str {
        self.definition.driver()
    }

    /// Classifies the update from `self` to `other`.
    ///
    /// Range changes regenerate output, comment and revision changes only
    /// relabel it.
    ///
    /// # Errors
    ///
    /// `Internal` when the definitions are different variants.
    pub fn changed(&self, other: &Resource) -> Result<Changed> {
        let definition = self.definition.changed(&other.definition)?;
        Ok(definition
            .and(Changed::when(&self.id, &other.id, Changed::Yes))
            .and(Changed::when(&self.lod_range, &other.lod_range, Changed::Yes))
            .and(Changed::when(&self.tile_range, &other.tile_range, Changed::Yes))
            .and(Changed::when(&self.comment, &other.comment, Changed::Safely))
            .and(Changed::when(&self.revision, &other.revision, Changed::Safely)))
    }

    pub fn needs_resources(&self) -> BTreeSet<ResourceId> {
        self.definition.needs_resources(&self.id.reference_frame)
    }

    pub fn needs_ranges(&self) -> bool {
        self.definition.needs_ranges()
    }

    /// Loads a resource record saved by [`Resource::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let doc: Value = serde_json::from_str(&content).map_err(|e| {
            Error::internal(format!("Malformed resource file {}: {}", path.display(), e))
        })?;
        Self::parse(&doc)
    }

    /// Saves the resource record through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.build())
            .map_err(|e| Error::internal(format!("Cannot serialize resource: {}", e)))?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Reads a resources file: a JSON array of resource documents.
///
/// Every document is parsed independently; the first bad one fails the
/// whole file.
pub fn load_resources(path: &Path) -> Result<Vec<Resource>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(format!("No resources file at {}.", path.display()))
        } else {
            Error::from(e)
        }
    })?;
    let doc: Value = serde_json::from_str(&content)
        .map_err(|e| Error::parse("resources", format!("{}: {}", path.display(), e)))?;
    let items = doc
        .as_array()
        .ok_or_else(|| Error::parse("resources", "expected an array of resources"))?;
    items.iter().map(Resource::parse).collect()
}
