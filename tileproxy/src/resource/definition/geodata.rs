//! Geodata (free layer) definitions.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::geo::SrsDefinition;
use crate::resource::fields;
use crate::resource::{Changed, GeneratorType};

use super::Variant;

/// Default quantization of geodata coordinates.
pub const DEFAULT_RESOLUTION: u32 = 4096;

/// Default display size of a geodata tile in pixels.
pub const DEFAULT_DISPLAY_SIZE: u32 = 256;

/// Vector output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeodataFormat {
    #[default]
    GeodataJson,
}

impl FromStr for GeodataFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "geodataJson" => Ok(GeodataFormat::GeodataJson),
            other => Err(format!("unsupported vector format: {}", other)),
        }
    }
}

impl fmt::Display for GeodataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeodataFormat::GeodataJson => f.write_str("geodataJson"),
        }
    }
}

/// Fields shared by the geodata variants that only affect presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub display_size: u32,
    /// Empty: built-in style; `file:<path>`: style served from a file;
    /// anything else is an external URL.
    pub style_url: String,
}

impl Presentation {
    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            display_size: fields::u32_or(obj, "displaySize", DEFAULT_DISPLAY_SIZE)?,
            style_url: fields::opt_string(obj, "styleUrl")?.unwrap_or_default(),
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        obj.insert("displaySize".into(), json!(self.display_size));
        if !self.style_url.is_empty() {
            obj.insert("styleUrl".into(), json!(self.style_url));
        }
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(self, other, Changed::Safely)
    }
}

// =============================================================================
// geodata-mesh
// =============================================================================

/// Free layer converted from a single mesh file.
#[derive(Debug, Clone, PartialEq)]
pub struct GeodataMesh {
    pub dataset: String,
    pub srs: SrsDefinition,
    /// Offset added to every mesh vertex.
    pub center: [f64; 3],
    pub adjust_vertical: bool,
    pub format: GeodataFormat,
    pub resolution: u32,
    pub presentation: Presentation,
}

impl Variant for GeodataMesh {
    const DRIVER: &'static str = "geodata-mesh";
    const TYPE: GeneratorType = GeneratorType::Geodata;

    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        let center = if fields::has(obj, "center") {
            fields::f64_array::<3>(obj, "center")?
        } else {
            [0.0; 3]
        };
        Ok(Self {
            dataset: fields::string(obj, "dataset")?,
            srs: SrsDefinition::new(fields::string(obj, "srs")?),
            center,
            adjust_vertical: fields::boolean(obj, "adjustVertical", false)?,
            format: fields::opt_parsed(obj, "format")?.unwrap_or_default(),
            resolution: fields::u32_or(obj, "resolution", DEFAULT_RESOLUTION)?,
            presentation: Presentation::parse(obj)?,
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        obj.insert("dataset".into(), json!(self.dataset));
        obj.insert("srs".into(), json!(self.srs.as_str()));
        obj.insert("center".into(), json!(self.center));
        obj.insert("adjustVertical".into(), json!(self.adjust_vertical));
        obj.insert("format".into(), json!(self.format.to_string()));
        obj.insert("resolution".into(), json!(self.resolution));
        self.presentation.build(obj);
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(&self.dataset, &other.dataset, Changed::Yes)
            .and(Changed::when(&self.srs, &other.srs, Changed::Yes))
            .and(Changed::when(&self.center, &other.center, Changed::Yes))
            .and(Changed::when(
                &self.adjust_vertical,
                &other.adjust_vertical,
                Changed::Yes,
            ))
            .and(Changed::when(&self.format, &other.format, Changed::Yes))
            .and(Changed::when(&self.resolution, &other.resolution, Changed::Yes))
            .and(self.presentation.changed(&other.presentation))
    }

    fn needs_ranges(&self) -> bool {
        false
    }
}

// =============================================================================
// geodata-semantic-tiled
// =============================================================================

/// Tiled free layer built from a semantic world draped over a DEM.
#[derive(Debug, Clone, PartialEq)]
pub struct GeodataSemanticTiled {
    pub dataset: String,
    pub dem: String,
    pub format: GeodataFormat,
    pub resolution: u32,
    pub presentation: Presentation,
}

impl Variant for GeodataSemanticTiled {
    const DRIVER: &'static str = "geodata-semantic-tiled";
    const TYPE: GeneratorType = GeneratorType::Geodata;

    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            dataset: fields::string(obj, "dataset")?,
            dem: fields::string(obj, "dem")?,
            format: fields::opt_parsed(obj, "format")?.unwrap_or_default(),
            resolution: fields::u32_or(obj, "resolution", DEFAULT_RESOLUTION)?,
            presentation: Presentation::parse(obj)?,
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        obj.insert("dataset".into(), json!(self.dataset));
        obj.insert("dem".into(), json!(self.dem));
        obj.insert("format".into(), json!(self.format.to_string()));
        obj.insert("resolution".into(), json!(self.resolution));
        self.presentation.build(obj);
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(&self.dataset, &other.dataset, Changed::Yes)
            .and(Changed::when(&self.dem, &other.dem, Changed::Yes))
            .and(Changed::when(&self.format, &other.format, Changed::Yes))
            .and(Changed::when(&self.resolution, &other.resolution, Changed::Yes))
            .and(self.presentation.changed(&other.presentation))
    }

    fn needs_ranges(&self) -> bool {
        true
    }
}
