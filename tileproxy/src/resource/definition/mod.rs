//! Resource definition variants.
//!
//! Each driver owns one variant. Variants are parsed from and built into JSON
//! documents, and compared field by field to classify updates:
//!
//! | driver                   | regenerates (`yes`)                                    | relabels (`safely`)       |
//! |--------------------------|--------------------------------------------------------|---------------------------|
//! | `surface-meta`           | surface, tms                                           |                           |
//! | `tms-raster`             | dataset, mask, resampling                              | format, transparent       |
//! | `tms-raster-synthetic`   | mask                                                   | format                    |
//! | `geodata-mesh`           | dataset, srs, center, adjustVertical, format, resolution | displaySize, styleUrl   |
//! | `geodata-semantic-tiled` | dataset, dem, format, resolution                       | displaySize, styleUrl     |
//!
//! The most severe field wins.

mod geodata;
mod surface;
mod tms;

pub use geodata::{
    GeodataFormat, GeodataMesh, GeodataSemanticTiled, Presentation, DEFAULT_DISPLAY_SIZE,
    DEFAULT_RESOLUTION,
};
pub use surface::{ResourceRef, SurfaceMeta};
pub use tms::{RasterFormat, TmsRaster, TmsRasterSynthetic};

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::fields;
use super::{Changed, GeneratorType, ResourceId};

/// Contract of a single definition variant.
pub trait Variant: Sized {
    /// Driver name selecting this variant.
    const DRIVER: &'static str;
    const TYPE: GeneratorType;

    fn parse(obj: &Map<String, Value>) -> Result<Self>;

    /// Writes every declared field into `obj`.
    fn build(&self, obj: &mut Map<String, Value>);

    fn changed(&self, other: &Self) -> Changed;

    /// Other resources this one is built from.
    fn needs_resources(&self, _reference_frame: &str) -> BTreeSet<ResourceId> {
        BTreeSet::new()
    }

    /// Whether LOD and tile ranges are derived from the data.
    fn needs_ranges(&self) -> bool;
}

/// Parsed definition of one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    SurfaceMeta(SurfaceMeta),
    TmsRaster(TmsRaster),
    TmsRasterSynthetic(TmsRasterSynthetic),
    GeodataMesh(GeodataMesh),
    GeodataSemanticTiled(GeodataSemanticTiled),
}

/// Drivers with a definition variant, with their generator type.
pub const DRIVERS: &[(&str, GeneratorType)] = &[
    (SurfaceMeta::DRIVER, SurfaceMeta::TYPE),
    (TmsRaster::DRIVER, TmsRaster::TYPE),
    (TmsRasterSynthetic::DRIVER, TmsRasterSynthetic::TYPE),
    (GeodataMesh::DRIVER, GeodataMesh::TYPE),
    (GeodataSemanticTiled::DRIVER, GeodataSemanticTiled::TYPE),
];

/// Runs `$body` with `$v` bound to the variant payload.
macro_rules! dispatch {
    ($def:expr, $v:ident => $body:expr) => {
        match $def {
            Definition::SurfaceMeta($v) => $body,
            Definition::TmsRaster($v) => $body,
            Definition::TmsRasterSynthetic($v) => $body,
            Definition::GeodataMesh($v) => $body,
            Definition::GeodataSemanticTiled($v) => $body,
        }
    };
}

fn variant_driver<V: Variant>(_: &V) -> &'static str {
    V::DRIVER
}

fn variant_type<V: Variant>(_: &V) -> GeneratorType {
    V::TYPE
}

impl Definition {
    /// Parses the definition document of `driver`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown driver, `Parse` naming the offending field
    /// for a bad document.
    pub fn parse(driver: &str, doc: &Value) -> Result<Self> {
        let obj = fields::as_object(doc, "definition")?;
        Ok(match driver {
            SurfaceMeta::DRIVER => Definition::SurfaceMeta(SurfaceMeta::parse(obj)?),
            TmsRaster::DRIVER => Definition::TmsRaster(TmsRaster::parse(obj)?),
            TmsRasterSynthetic::DRIVER => {
                Definition::TmsRasterSynthetic(TmsRasterSynthetic::parse(obj)?)
            }
            GeodataMesh::DRIVER => Definition::GeodataMesh(GeodataMesh::parse(obj)?),
            GeodataSemanticTiled::DRIVER => {
                Definition::GeodataSemanticTiled(GeodataSemanticTiled::parse(obj)?)
            }
            other => {
                return Err(Error::not_found(format!("Unknown driver <{}>.", other)));
            }
        })
    }

    /// Builds the definition document.
    pub fn build(&self) -> Value {
        let mut obj = Map::new();
        dispatch!(self, v => v.build(&mut obj));
        Value::Object(obj)
    }

    pub fn driver(&self) -> &'static str {
        dispatch!(self, v => variant_driver(v))
    }

    pub fn generator_type(&self) -> GeneratorType {
        dispatch!(self, v => variant_type(v))
    }

    /// Classifies the update from `self` to `other`.
    ///
    /// # Errors
    ///
    /// `Internal` if the two definitions are different variants.
    pub fn changed(&self, other: &Definition) -> Result<Changed> {
        match (self, other) {
            (Definition::SurfaceMeta(a), Definition::SurfaceMeta(b)) => Ok(a.changed(b)),
            (Definition::TmsRaster(a), Definition::TmsRaster(b)) => Ok(a.changed(b)),
            (Definition::TmsRasterSynthetic(a), Definition::TmsRasterSynthetic(b)) => {
                Ok(a.changed(b))
            }
            (Definition::GeodataMesh(a), Definition::GeodataMesh(b)) => Ok(a.changed(b)),
            (Definition::GeodataSemanticTiled(a), Definition::GeodataSemanticTiled(b)) => {
                Ok(a.changed(b))
            }
            (a, b) => Err(Error::internal(format!(
                "Cannot compare <{}> definition with <{}> definition.",
                a.driver(),
                b.driver()
            ))),
        }
    }

    pub fn needs_resources(&self, reference_frame: &str) -> BTreeSet<ResourceId> {
        dispatch!(self, v => v.needs_resources(reference_frame))
    }

    pub fn needs_ranges(&self) -> bool {
        dispatch!(self, v => v.needs_ranges())
    }
}
