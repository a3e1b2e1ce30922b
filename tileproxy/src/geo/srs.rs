//! Spatial reference systems and coordinate conversion.
//!
//! SRS definitions are either `EPSG:<code>` references, resolved through the
//! `crs-definitions` database, or raw PROJ.4 strings. Conversion between two
//! systems is done with `proj4rs`; identical definitions short-circuit to an
//! identity conversion.

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SRS definition as configured in resource definitions and requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SrsDefinition(String);

impl SrsDefinition {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into().trim().to_string())
    }

    /// `EPSG:<code>` definition.
    pub fn epsg(code: u16) -> Self {
        Self(format!("EPSG:{}", code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EPSG code if this is an `EPSG:<code>` reference.
    pub fn epsg_code(&self) -> Option<u16> {
        let upper = self.0.to_ascii_uppercase();
        upper.strip_prefix("EPSG:")?.trim().parse().ok()
    }

    /// Resolves the definition to a PROJ.4 string.
    pub fn proj4(&self) -> Result<String> {
        if let Some(code) = self.epsg_code() {
            return crs_definitions::from_code(code)
                .map(|def| def.proj4.to_string())
                .ok_or_else(|| Error::internal(format!("Unknown SRS <{}>.", self.0)));
        }
        if self.0.starts_with('+') {
            return Ok(self.0.clone());
        }
        Err(Error::internal(format!(
            "Unsupported SRS definition <{}>.",
            self.0
        )))
    }

    /// Returns true for longitude/latitude systems (coordinates in degrees).
    pub fn is_geographic(&self) -> Result<bool> {
        Ok(self.proj4()?.contains("+proj=longlat"))
    }
}

impl fmt::Display for SrsDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Projection {
    src: Proj,
    dst: Proj,
    src_geographic: bool,
    dst_geographic: bool,
}

/// Converts points from one SRS to another.
pub struct CsConvertor {
    projection: Option<Projection>,
}

impl CsConvertor {
    /// Creates a convertor between two systems.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if either definition cannot be resolved.
    pub fn new(src: &SrsDefinition, dst: &SrsDefinition) -> Result<Self> {
        if src == dst {
            return Ok(Self { projection: None });
        }

        let src_proj4 = src.proj4()?;
        let dst_proj4 = dst.proj4()?;
        let make = |def: &str, srs: &SrsDefinition| {
            Proj::from_proj_string(def)
                .map_err(|e| Error::internal(format!("Invalid SRS <{}>: {:?}", srs, e)))
        };

        Ok(Self {
            projection: Some(Projection {
                src: make(&src_proj4, src)?,
                dst: make(&dst_proj4, dst)?,
                src_geographic: src_proj4.contains("+proj=longlat"),
                dst_geographic: dst_proj4.contains("+proj=longlat"),
            }),
        })
    }

    /// Returns true if this is an identity conversion.
    pub fn is_identity(&self) -> bool {
        self.projection.is_none()
    }

    /// Converts a point; `None` if the point cannot be projected.
    pub fn convert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let Some(p) = &self.projection else {
            return Some((x, y));
        };

        // proj4rs works in radians for geographic systems
        let mut point = if p.src_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&p.src, &p.dst, &mut point).ok()?;

        let (ox, oy) = if p.dst_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        (ox.is_finite() && oy.is_finite()).then_some((ox, oy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsg_code_parsing() {
        assert_eq!(SrsDefinition::epsg(3857).epsg_code(), Some(3857));
        assert_eq!(SrsDefinition::new("epsg:4326").epsg_code(), Some(4326));
        assert_eq!(SrsDefinition::new("+proj=longlat").epsg_code(), None);
    }

    #[test]
    fn test_identity_convertor() {
        let srs = SrsDefinition::epsg(3857);
        let conv = CsConvertor::new(&srs, &srs).unwrap();
        assert!(conv.is_identity());
        assert_eq!(conv.convert(12.5, -3.0), Some((12.5, -3.0)));
    }

    #[test]
    fn test_geographic_detection() {
        assert!(SrsDefinition::epsg(4326).is_geographic().unwrap());
        assert!(!SrsDefinition::epsg(3857).is_geographic().unwrap());
    }

    #[test]
    fn test_lonlat_to_mercator_origin() {
        let conv = CsConvertor::new(&SrsDefinition::epsg(4326), &SrsDefinition::epsg(3857))
            .unwrap();
        let (x, y) = conv.convert(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_unsupported_definition() {
        let err = SrsDefinition::new("not-an-srs").proj4().unwrap_err();
        assert!(err.is_internal());
    }
}
