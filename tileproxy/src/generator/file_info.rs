//! Classification of requested file names.
//!
//! Each generator type understands its own set of files:
//!
//! | type    | files                                                                     |
//! |---------|---------------------------------------------------------------------------|
//! | tms     | `{lod}-{x}-{y}.{png,jpg}`, `.mask`, `.meta`, `boundlayer.json`            |
//! | geodata | `geo`, `{lod}-{x}-{y}.geo`, `.meta`, `freelayer.json`, `style.json`       |
//! | surface | `definition.json`                                                         |
//!
//! Every type also serves `mapConfig.json`, the support files and
//! `registry/...` passthrough. Query strings (revision suffixes) are ignored.

use std::sync::OnceLock;

use regex::Regex;

use crate::resource::definition::RasterFormat;
use crate::resource::GeneratorType;
use crate::tiling::TileId;

use super::support::{self, SupportFile};

/// What a file name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Raster tile.
    Tile { tile: TileId, format: RasterFormat },
    /// Validity mask of a raster tile.
    Mask(TileId),
    Metatile(TileId),
    /// Whole-layer geodata (`None`) or one geodata tile.
    Geodata(Option<TileId>),
    /// `mapConfig.json`
    Config,
    /// Layer definition document of the generator type.
    Definition,
    Style,
    Support(&'static SupportFile),
    /// Path below `registry/`.
    Registry(String),
    Unknown,
}

/// Parsed file request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub kind: FileKind,
}

/// Get the tile file regex pattern.
///
/// Pattern: `<lod>-<x>-<y>.<ext>`
/// Example: `12-2200-1343.png`
fn tile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})-(\d{1,10})-(\d{1,10})\.(png|jpg|jpeg|mask|meta|geo)$").unwrap()
    })
}

fn parse_tile(name: &str) -> Option<(TileId, &str)> {
    let caps = tile_pattern().captures(name)?;
    let lod = caps.get(1)?.as_str().parse().ok()?;
    let x = caps.get(2)?.as_str().parse().ok()?;
    let y = caps.get(3)?.as_str().parse().ok()?;
    Some((TileId::new(lod, x, y), caps.get(4)?.as_str()))
}

/// Name of the layer definition document served by each generator type.
pub fn definition_file(generator_type: GeneratorType) -> &'static str {
    match generator_type {
        GeneratorType::Tms => "boundlayer.json",
        GeneratorType::Geodata => "freelayer.json",
        GeneratorType::Surface => "definition.json",
    }
}

impl FileInfo {
    /// Classifies `name` for a generator of `generator_type`.
    pub fn parse(generator_type: GeneratorType, name: &str) -> Self {
        let path = name.split_once('?').map_or(name, |(path, _)| path);
        let kind = Self::classify(generator_type, path);
        Self {
            name: path.to_string(),
            kind,
        }
    }

    fn classify(generator_type: GeneratorType, path: &str) -> FileKind {
        if path == "mapConfig.json" {
            return FileKind::Config;
        }
        if path == definition_file(generator_type) {
            return FileKind::Definition;
        }
        if let Some(rest) = path.strip_prefix("registry/") {
            if !rest.is_empty() && !rest.split('/').any(|c| c == ".." || c.is_empty()) {
                return FileKind::Registry(rest.to_string());
            }
            return FileKind::Unknown;
        }
        if let Some(file) = support::find(path) {
            return FileKind::Support(file);
        }

        match generator_type {
            GeneratorType::Tms => match parse_tile(path) {
                Some((tile, "png")) => FileKind::Tile {
                    tile,
                    format: RasterFormat::Png,
                },
                Some((tile, "jpg" | "jpeg")) => FileKind::Tile {
                    tile,
                    format: RasterFormat::Jpg,
                },
                Some((tile, "mask")) => FileKind::Mask(tile),
                Some((tile, "meta")) => FileKind::Metatile(tile),
                _ => FileKind::Unknown,
            },
            GeneratorType::Geodata => {
                if path == "geo" {
                    return FileKind::Geodata(None);
                }
                if path == "style.json" {
                    return FileKind::Style;
                }
                match parse_tile(path) {
                    Some((tile, "geo")) => FileKind::Geodata(Some(tile)),
                    Some((tile, "meta")) => FileKind::Metatile(tile),
                    _ => FileKind::Unknown,
                }
            }
            GeneratorType::Surface => FileKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tms_files() {
        let info = FileInfo::parse(GeneratorType::Tms, "12-2200-1343.png?3");
        assert_eq!(info.name, "12-2200-1343.png");
        assert_eq!(
            info.kind,
            FileKind::Tile {
                tile: TileId::new(12, 2200, 1343),
                format: RasterFormat::Png
            }
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Tms, "3-1-2.mask").kind,
            FileKind::Mask(TileId::new(3, 1, 2))
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Tms, "3-0-0.meta").kind,
            FileKind::Metatile(TileId::new(3, 0, 0))
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Tms, "boundlayer.json").kind,
            FileKind::Definition
        );
        assert_eq!(FileInfo::parse(GeneratorType::Tms, "3-1-2.geo").kind, FileKind::Unknown);
        assert_eq!(FileInfo::parse(GeneratorType::Tms, "style.json").kind, FileKind::Unknown);
    }

    #[test]
    fn test_geodata_files() {
        assert_eq!(
            FileInfo::parse(GeneratorType::Geodata, "geo?2").kind,
            FileKind::Geodata(None)
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Geodata, "5-3-4.geo").kind,
            FileKind::Geodata(Some(TileId::new(5, 3, 4)))
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Geodata, "5-0-0.meta?gr=1&3").kind,
            FileKind::Metatile(TileId::new(5, 0, 0))
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Geodata, "freelayer.json").kind,
            FileKind::Definition
        );
        assert_eq!(
            FileInfo::parse(GeneratorType::Geodata, "style.json").kind,
            FileKind::Style
        );
    }

    #[test]
    fn test_common_files() {
        for t in [GeneratorType::Tms, GeneratorType::Geodata, GeneratorType::Surface] {
            assert_eq!(FileInfo::parse(t, "mapConfig.json").kind, FileKind::Config);
            assert!(matches!(
                FileInfo::parse(t, "index.html").kind,
                FileKind::Support(_)
            ));
            assert_eq!(
                FileInfo::parse(t, "registry/srs/3857.json").kind,
                FileKind::Registry("srs/3857.json".into())
            );
            assert_eq!(FileInfo::parse(t, "registry/../secret").kind, FileKind::Unknown);
        }
        assert_eq!(
            FileInfo::parse(GeneratorType::Surface, "definition.json").kind,
            FileKind::Definition
        );
    }

    #[test]
    fn test_out_of_range_numbers_are_unknown() {
        assert_eq!(
            FileInfo::parse(GeneratorType::Tms, "1-99999999999-0.png").kind,
            FileKind::Unknown
        );
        assert_eq!(FileInfo::parse(GeneratorType::Tms, "300-0-0.png").kind, FileKind::Unknown);
    }
}
