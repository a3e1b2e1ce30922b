//! `tms-raster-synthetic`: generated checkerboard imagery.
//!
//! Useful as a placeholder layer and for testing clients. Coverage is given
//! by the resource's LOD and tile ranges, optionally clipped by a mask
//! dataset warped through the warper.

use std::path::PathBuf;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

use crate::error::{Error, Result};
use crate::geo::{Raster, Size2};
use crate::resource::definition::{RasterFormat, TmsRasterSynthetic};
use crate::resource::Definition;
use crate::tiling::{LodRange, TileId, TileRange};
use crate::warper::{Operation, RasterRequest};

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::map_config::{self, MapConfig};
use super::sink::{FileClass, Sink, SinkFileInfo};
use super::tiled::TILE_SIZE;
use super::tms_raster::{encode_image, BoundLayer, METATILE_CONTENT_TYPE};
use super::{GeneratorDriver, GeneratorParams, Task};

/// Checkerboard fields per tile side.
const FIELDS: u32 = 8;

pub fn create(params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
    let Definition::TmsRasterSynthetic(definition) = &params.resource.definition else {
        return Err(Error::internal(
            "tms-raster-synthetic driver given a foreign definition",
        ));
    };
    let resource = &params.resource;
    let (Some(lod_range), Some(tile_range)) = (resource.lod_range, resource.tile_range) else {
        return Err(Error::parse("lodRange", "synthetic layers need explicit ranges"));
    };

    Ok(Box::new(SyntheticDriver {
        inner: Arc::new(Inner {
            mask: definition
                .mask
                .as_deref()
                .map(|m| params.absolute_dataset(m)),
            definition: definition.clone(),
            params: params.clone(),
            lod_range,
            tile_range,
        }),
    }))
}

struct SyntheticDriver {
    inner: Arc<Inner>,
}

struct Inner {
    params: GeneratorParams,
    definition: TmsRasterSynthetic,
    mask: Option<PathBuf>,
    lod_range: LodRange,
    tile_range: TileRange,
}

/// Checkerboard whose colors depend on the tile's LOD and position.
fn checkerboard(tile: TileId) -> RgbaImage {
    let hue = (tile.lod as u32 * 37) % 256;
    let light = Rgba([255, (128 + hue / 2) as u8, hue as u8, 255]);
    let dark = Rgba([(hue / 2) as u8, 64, (255 - hue) as u8, 255]);
    let field = TILE_SIZE / FIELDS;
    let shift = (tile.x + tile.y) % 2;

    RgbaImage::from_fn(TILE_SIZE, TILE_SIZE, |x, y| {
        if ((x / field + y / field + shift) % 2) == 0 {
            light
        } else {
            dark
        }
    })
}

impl Inner {
    fn covers(&self, tile: TileId) -> bool {
        self.lod_range.contains(tile.lod)
            && self.params.reference_frame.is_valid_tile(tile)
            && self
                .tile_range
                .at_lod(self.lod_range.min, tile.lod)
                .contains(tile.x, tile.y)
    }

    fn check_tile(&self, tile: TileId) -> Result<()> {
        if self.covers(tile) {
            Ok(())
        } else {
            Err(Error::not_found(format!("Tile {} is outside the layer.", tile)))
        }
    }

    /// Validity of the mask dataset over the tile, `None` without a mask.
    fn mask(&self, tile: TileId, sink: &dyn Sink, arsenal: &Arsenal) -> Result<Option<Raster>> {
        let Some(mask) = &self.mask else {
            return Ok(None);
        };
        let rf = &self.params.reference_frame;
        let request = RasterRequest::new(
            Operation::Mask,
            mask.clone(),
            rf.srs().clone(),
            rf.tile_extents(tile),
            Size2::new(TILE_SIZE, TILE_SIZE),
        )
        .with_mask(mask.clone());
        arsenal.warp(&request, sink).map(Some)
    }

    fn generate_tile(&self, tile: TileId, sink: &mut dyn Sink, arsenal: &Arsenal) -> Result<()> {
        self.check_tile(tile)?;
        let mut image = checkerboard(tile);
        if let Some(mask) = self.mask(tile, sink, arsenal)? {
            let alpha = mask
                .as_u8()
                .ok_or_else(|| Error::internal("Mask raster is not 8-bit."))?;
            for (px, a) in image.pixels_mut().zip(alpha) {
                px.0[3] = *a;
            }
        }

        let format = self.definition.format;
        let data = encode_image(DynamicImage::ImageRgba8(image), format)?;
        sink.content(
            &data,
            &SinkFileInfo::new(format.content_type(), FileClass::Data),
        )
    }

    fn generate_mask(&self, tile: TileId, sink: &mut dyn Sink, arsenal: &Arsenal) -> Result<()> {
        self.check_tile(tile)?;
        let image = match self.mask(tile, sink, arsenal)? {
            Some(mask) => mask.to_image()?,
            None => DynamicImage::ImageLuma8(GrayImage::from_pixel(
                TILE_SIZE,
                TILE_SIZE,
                Luma([255]),
            )),
        };
        let data = encode_image(image, RasterFormat::Png)?;
        sink.content(
            &data,
            &SinkFileInfo::new(RasterFormat::Png.content_type(), FileClass::Data),
        )
    }

    fn metatile(&self, origin: TileId) -> Result<Vec<u8>> {
        let side = 1u32 << self.params.reference_frame.meta_binary_order();
        if origin.x % side != 0 || origin.y % side != 0 {
            return Err(Error::not_found(format!("Metatile <{}> is not aligned.", origin)));
        }
        let flags: Vec<u8> = (origin.y..origin.y + side)
            .flat_map(|y| (origin.x..origin.x + side).map(move |x| (x, y)))
            .map(|(x, y)| u8::from(self.covers(TileId::new(origin.lod, x, y))))
            .collect();
        if flags.iter().all(|f| *f == 0) {
            return Err(Error::not_found(format!("Metatile <{}> is empty.", origin)));
        }
        Ok(flags)
    }
}

impl GeneratorDriver for SyntheticDriver {
    fn load_prepared(&self) -> Result<bool> {
        Ok(true)
    }

    fn prepare(&self, _arsenal: &Arsenal) -> Result<()> {
        if let Some(mask) = &self.inner.mask {
            crate::geo::GeoDataset::open_mask(mask)?;
        }
        Ok(())
    }

    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>> {
        let inner = &self.inner;
        match &file.kind {
            FileKind::Config => {
                MapConfig::new(&inner.params.reference_frame)
                    .with_bound_layer(inner.params.resource.id.full_id(), "boundlayer.json")
                    .serve(sink)?;
                Ok(None)
            }
            FileKind::Definition => {
                let format = inner.definition.format;
                let layer = BoundLayer::new(
                    &inner.params,
                    format,
                    inner.lod_range,
                    inner.tile_range,
                    inner.mask.is_some(),
                    inner.mask.is_some() && format == RasterFormat::Png,
                );
                map_config::serve_json(&layer, sink)?;
                Ok(None)
            }
            FileKind::Tile { tile, format } => {
                if *format != inner.definition.format {
                    return Err(Error::not_found(format!(
                        "Format <{}> is not served by this layer.",
                        format
                    )));
                }
                let (inner, tile) = (Arc::clone(inner), *tile);
                Ok(Some(Box::new(move |sink: &mut dyn Sink, arsenal: &Arsenal| {
                    inner.generate_tile(tile, sink, arsenal)
                })))
            }
            FileKind::Mask(tile) => {
                let (inner, tile) = (Arc::clone(inner), *tile);
                Ok(Some(Box::new(move |sink: &mut dyn Sink, arsenal: &Arsenal| {
                    inner.generate_mask(tile, sink, arsenal)
                })))
            }
            FileKind::Metatile(tile) => {
                let flags = inner.metatile(*tile)?;
                sink.content(
                    &flags,
                    &SinkFileInfo::new(METATILE_CONTENT_TYPE, FileClass::Data),
                )?;
                Ok(None)
            }
            _ => Err(Error::not_found(format!("{} not found.", file.name))),
        }
    }
}
