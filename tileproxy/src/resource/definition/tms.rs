//! TMS (bound layer) definitions.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::geo::Resampling;
use crate::resource::fields;
use crate::resource::{Changed, GeneratorType};

use super::Variant;

/// Output raster format of a TMS tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterFormat {
    Jpg,
    #[default]
    Png,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Jpg => "jpg",
            RasterFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RasterFormat::Jpg => "image/jpeg",
            RasterFormat::Png => "image/png",
        }
    }
}

impl FromStr for RasterFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "jpg" => Ok(RasterFormat::Jpg),
            "png" => Ok(RasterFormat::Png),
            other => Err(format!("not a raster format: {}", other)),
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// =============================================================================
// tms-raster
// =============================================================================

/// Bound layer warped from a raster dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct TmsRaster {
    pub dataset: String,
    pub mask: Option<String>,
    pub format: RasterFormat,
    pub transparent: bool,
    pub resampling: Resampling,
}

impl Variant for TmsRaster {
    const DRIVER: &'static str = "tms-raster";
    const TYPE: GeneratorType = GeneratorType::Tms;

    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            dataset: fields::string(obj, "dataset")?,
            mask: fields::opt_string(obj, "mask")?,
            format: fields::opt_parsed(obj, "format")?.unwrap_or_default(),
            transparent: fields::boolean(obj, "transparent", false)?,
            resampling: fields::opt_parsed(obj, "resampling")?.unwrap_or_default(),
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        obj.insert("dataset".into(), json!(self.dataset));
        if let Some(mask) = &self.mask {
            obj.insert("mask".into(), json!(mask));
        }
        obj.insert("format".into(), json!(self.format.to_string()));
        obj.insert("transparent".into(), json!(self.transparent));
        obj.insert("resampling".into(), json!(self.resampling.to_string()));
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(&self.dataset, &other.dataset, Changed::Yes)
            .and(Changed::when(&self.mask, &other.mask, Changed::Yes))
            .and(Changed::when(&self.resampling, &other.resampling, Changed::Yes))
            .and(Changed::when(&self.format, &other.format, Changed::Safely))
            .and(Changed::when(&self.transparent, &other.transparent, Changed::Safely))
    }

    fn needs_ranges(&self) -> bool {
        true
    }
}

// =============================================================================
// tms-raster-synthetic
// =============================================================================

/// Bound layer with generated (non-dataset) imagery, optionally masked.
#[derive(Debug, Clone, PartialEq)]
pub struct TmsRasterSynthetic {
    pub mask: Option<String>,
    pub format: RasterFormat,
}

impl Variant for TmsRasterSynthetic {
    const DRIVER: &'static str = "tms-raster-synthetic";
    const TYPE: GeneratorType = GeneratorType::Tms;

    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            mask: fields::opt_string(obj, "mask")?,
            format: fields::opt_parsed(obj, "format")?.unwrap_or_default(),
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        if let Some(mask) = &self.mask {
            obj.insert("mask".into(), json!(mask));
        }
        obj.insert("format".into(), json!(self.format.to_string()));
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(&self.mask, &other.mask, Changed::Yes)
            .and(Changed::when(&self.format, &other.format, Changed::Safely))
    }

    fn needs_ranges(&self) -> bool {
        false
    }
}
