//! `tms-raster`: bound layer warped from a raster dataset.
//!
//! Prepare samples the dataset into a tile index. Tiles, masks and
//! metatiles are then answered from the delivery index and the warper:
//!
//! ```text
//!   {lod}-{x}-{y}.png ──► index check ──► warp Image (+ Mask if transparent)
//!                                             └──► encode png / jpg
//!   {lod}-{x}-{y}.mask ─► index check ──► warp Mask ──► encode png
//!   {lod}-{x}-{y}.meta ─► delivery index metatile flags
//! ```

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use image::{DynamicImage, GrayAlphaImage, ImageFormat, RgbaImage};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::{GeoDataset, Raster, Size2};
use crate::resource::definition::{RasterFormat, TmsRaster};
use crate::resource::Definition;
use crate::tiling::{self, LodRange, TileId, TileRange};
use crate::warper::{Operation, RasterRequest};

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::map_config::{self, MapConfig};
use super::sink::{FileClass, Sink, SinkFileInfo};
use super::support::with_revision;
use super::tiled::{self, PreparedSlot, TILE_SIZE};
use super::{GeneratorDriver, GeneratorParams, Task};

/// Content type of metatiles.
pub const METATILE_CONTENT_TYPE: &str = "application/octet-stream";

pub fn create(params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
    let Definition::TmsRaster(definition) = &params.resource.definition else {
        return Err(Error::internal("tms-raster driver given a foreign definition"));
    };
    Ok(Box::new(TmsRasterDriver {
        inner: Arc::new(Inner {
            dataset: params.absolute_dataset(&definition.dataset),
            mask: definition
                .mask
                .as_deref()
                .map(|m| params.absolute_dataset(m)),
            definition: definition.clone(),
            params: params.clone(),
            prepared: PreparedSlot::default(),
        }),
    }))
}

struct TmsRasterDriver {
    inner: Arc<Inner>,
}

struct Inner {
    params: GeneratorParams,
    definition: TmsRaster,
    dataset: PathBuf,
    mask: Option<PathBuf>,
    prepared: PreparedSlot,
}

/// `boundlayer.json` document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    pub meta_url: String,
    pub lod_range: LodRange,
    pub tile_range: TileRange,
    pub is_transparent: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl BoundLayer {
    /// Bound layer of a tms resource with the given ranges.
    pub fn new(
        params: &GeneratorParams,
        format: RasterFormat,
        lod_range: LodRange,
        tile_range: TileRange,
        with_mask: bool,
        is_transparent: bool,
    ) -> Self {
        let resource = &params.resource;
        let url = |ext: &str| {
            with_revision(&format!("{{lod}}-{{x}}-{{y}}.{}", ext), resource.revision, '?')
        };
        Self {
            id: resource.id.full_id(),
            kind: "raster",
            url: url(format.extension()),
            mask_url: with_mask.then(|| url("mask")),
            meta_url: url("meta"),
            lod_range,
            tile_range,
            is_transparent,
            comment: resource.comment.clone(),
        }
    }
}

/// Encodes an image, dropping alpha for formats without it.
pub fn encode_image(image: DynamicImage, format: RasterFormat) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let result = match format {
        RasterFormat::Png => image.write_to(&mut out, ImageFormat::Png),
        RasterFormat::Jpg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)
        }
    };
    result.map_err(|e| Error::internal(format!("Cannot encode {} image: {}", format, e)))?;
    Ok(out.into_inner())
}

/// Attaches a validity mask as the alpha channel.
fn with_alpha(raster: &Raster, mask: &Raster) -> Result<DynamicImage> {
    let (Some(data), Some(alpha)) = (raster.as_u8(), mask.as_u8()) else {
        return Err(Error::internal("Alpha needs 8-bit rasters."));
    };
    let size = raster.size();
    let bad = || Error::internal("Mask does not match the image.");
    if mask.size() != size || alpha.len() != size.area() {
        return Err(bad());
    }

    match raster.channels() {
        1 => {
            let buf = data.iter().zip(alpha).flat_map(|(v, a)| [*v, *a]).collect();
            Ok(DynamicImage::ImageLumaA8(
                GrayAlphaImage::from_raw(size.width, size.height, buf).ok_or_else(bad)?,
            ))
        }
        3 => {
            let buf = data
                .chunks_exact(3)
                .zip(alpha)
                .flat_map(|(px, a)| [px[0], px[1], px[2], *a])
                .collect();
            Ok(DynamicImage::ImageRgba8(
                RgbaImage::from_raw(size.width, size.height, buf).ok_or_else(bad)?,
            ))
        }
        _ => raster.to_image(),
    }
}

impl Inner {
    fn tile_request(&self, operation: Operation, tile: TileId) -> RasterRequest {
        let rf = &self.params.reference_frame;
        RasterRequest::new(
            operation,
            self.dataset.clone(),
            rf.srs().clone(),
            rf.tile_extents(tile),
            Size2::new(TILE_SIZE, TILE_SIZE),
        )
        .with_mask_opt(self.mask.clone())
        .with_resampling(self.definition.resampling)
    }

    fn check_tile(&self, tile: TileId) -> Result<()> {
        if self.prepared.with(|p| Ok(p.has_tile(tile)))? {
            Ok(())
        } else {
            Err(Error::not_found(format!("No data in tile {}.", tile)))
        }
    }

    fn generate_tile(&self, tile: TileId, sink: &mut dyn Sink, arsenal: &Arsenal) -> Result<()> {
        self.check_tile(tile)?;
        let format = self.definition.format;
        let raster = arsenal.warp(&self.tile_request(Operation::Image, tile), sink)?;

        let image = if self.definition.transparent && format == RasterFormat::Png {
            let mask = arsenal.warp(&self.tile_request(Operation::Mask, tile), sink)?;
            with_alpha(&raster, &mask)?
        } else {
            raster.to_image()?
        };

        let data = encode_image(image, format)?;
        sink.content(
            &data,
            &SinkFileInfo::new(format.content_type(), FileClass::Data),
        )
    }

    fn generate_mask(&self, tile: TileId, sink: &mut dyn Sink, arsenal: &Arsenal) -> Result<()> {
        self.check_tile(tile)?;
        let mask = arsenal.warp(&self.tile_request(Operation::Mask, tile), sink)?;
        let data = encode_image(mask.to_image()?, RasterFormat::Png)?;
        sink.content(
            &data,
            &SinkFileInfo::new(RasterFormat::Png.content_type(), FileClass::Data),
        )
    }

    fn bound_layer(&self) -> Result<BoundLayer> {
        self.prepared.with(|p| {
            Ok(BoundLayer::new(
                &self.params,
                self.definition.format,
                p.metadata.lod_range,
                p.metadata.tile_range,
                true,
                self.definition.transparent,
            ))
        })
    }
}

impl GeneratorDriver for TmsRasterDriver {
    fn load_prepared(&self) -> Result<bool> {
        match tiled::load(&self.inner.params.root)? {
            Some(prepared) => {
                self.inner.prepared.set(prepared);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn prepare(&self, arsenal: &Arsenal) -> Result<()> {
        let inner = &self.inner;
        let params = &inner.params;
        let rf = &params.reference_frame;

        let dataset = GeoDataset::open(&inner.dataset)?;
        if let Some(mask) = &inner.mask {
            GeoDataset::open_mask(mask)?;
        }

        let (lod_range, tile_range) = tiled::ranges(&params.resource, &dataset, rf)?;
        debug!(resource = %params.resource.id, lods = %lod_range, "Generating tile index");
        let index = tiling::generate(&dataset, rf, lod_range, &[tile_range], &arsenal.tiling)?;
        let prepared = tiled::save(&params.root, &index, tile_range)?;
        inner.prepared.set(prepared);
        Ok(())
    }

    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>> {
        let inner = &self.inner;
        match &file.kind {
            FileKind::Config => {
                let id = inner.params.resource.id.full_id();
                MapConfig::new(&inner.params.reference_frame)
                    .with_bound_layer(id, "boundlayer.json")
                    .serve(sink)?;
                Ok(None)
            }
            FileKind::Definition => {
                map_config::serve_json(&inner.bound_layer()?, sink)?;
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
                let order = inner.params.reference_frame.meta_binary_order();
                let flags = inner.prepared.with(|p| p.index.metatile(*tile, order))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::sink::MemorySink;
    use crate::generator::testing::arsenal;
    use crate::generator::{Generator, GeneratorState};
    use crate::geo::{Extents2, GeoReference, SrsDefinition};
    use crate::resource::Resource;
    use crate::tiling::ReferenceFrame;
    use image::{GenericImageView, Rgb, RgbImage};
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;

    /// 256x256 dataset covering the north-west quadrant of web mercator.
    fn write_dataset(dir: &Path) {
        let rf = ReferenceFrame::webmerc();
        let e = rf.extents();
        let img = RgbImage::from_fn(256, 256, |x, _| Rgb([x as u8, 100, 200]));
        let path = dir.join("ortho.png");
        img.save(&path).unwrap();
        GeoReference::new(
            SrsDefinition::epsg(3857),
            Extents2::new(e.ll[0], 0.0, 0.0, e.ur[1]),
        )
        .save(&path)
        .unwrap();
    }

    fn params(dir: &Path, definition: Value) -> GeneratorParams {
        let resource = Resource::parse(&json!({
            "referenceFrame": "webmerc",
            "group": "test",
            "id": "ortho",
            "type": "tms",
            "driver": "tms-raster",
            "revision": 3,
            "definition": definition,
        }))
        .unwrap();
        GeneratorParams {
            root: resource.id.root(&dir.join("store")),
            resource,
            reference_frame: ReferenceFrame::webmerc(),
            data_root: dir.to_path_buf(),
            change_enforced: false,
            registry_root: None,
        }
    }

    fn prepared_generator(dir: &Path, definition: Value) -> Generator {
        write_dataset(dir);
        let p = params(dir, definition);
        let generator = Generator::new(p.clone(), create(&p).unwrap());
        generator.ensure_ready(&arsenal()).unwrap();
        generator
    }

    fn serve(generator: &Generator, name: &str) -> MemorySink {
        let mut sink = MemorySink::new();
        generator.serve(name, &mut sink, &arsenal());
        sink
    }

    #[test]
    fn test_prepare_derives_ranges_and_serves_tiles() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(dir.path(), json!({ "dataset": "ortho.png" }));

        let sink = serve(&generator, "1-0-0.png");
        let png = image::load_from_memory(sink.data().unwrap()).unwrap();
        assert_eq!(png.dimensions(), (256, 256));

        let sink = serve(&generator, "1-1-1.png");
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_fast_path_after_restart() {
        let dir = TempDir::new().unwrap();
        prepared_generator(dir.path(), json!({ "dataset": "ortho.png" }));

        let p = params(dir.path(), json!({ "dataset": "ortho.png" }));
        let restarted = Generator::new(p.clone(), create(&p).unwrap());
        assert_eq!(restarted.state(), GeneratorState::Ready);
        assert!(serve(&restarted, "1-0-0.png").data().is_some());
    }

    #[test]
    fn test_truncated_delivery_index_forces_prepare() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(dir.path(), json!({ "dataset": "ortho.png" }));
        let index = generator.root().join(tiled::DELIVERY_INDEX);
        drop(generator);
        let len = std::fs::metadata(&index).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&index)
            .unwrap()
            .set_len(len - 1)
            .unwrap();

        let p = params(dir.path(), json!({ "dataset": "ortho.png" }));
        let restarted = Generator::new(p.clone(), create(&p).unwrap());
        assert_eq!(restarted.state(), GeneratorState::Unprepared);
    }

    #[test]
    fn test_format_mismatch_is_not_found() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(dir.path(), json!({ "dataset": "ortho.png" }));
        let sink = serve(&generator, "1-0-0.jpg");
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_transparent_tiles_carry_alpha() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(
            dir.path(),
            json!({ "dataset": "ortho.png", "transparent": true }),
        );
        let sink = serve(&generator, "1-0-0.png");
        let png = image::load_from_memory(sink.data().unwrap()).unwrap();
        assert!(png.color().has_alpha());
    }

    #[test]
    fn test_mask_and_metatile() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(dir.path(), json!({ "dataset": "ortho.png" }));

        let sink = serve(&generator, "1-0-0.mask");
        let mask = image::load_from_memory(sink.data().unwrap()).unwrap().to_luma8();
        assert_eq!(mask.get_pixel(10, 10).0, [255]);

        let sink = serve(&generator, "1-0-0.meta");
        let flags = sink.data().unwrap();
        assert_eq!(flags.len(), 32 * 32);
        assert_eq!(flags[0], 1);
        assert_eq!(flags[1], 0);
    }

    #[test]
    fn test_boundlayer_lists_urls_with_revision() {
        let dir = TempDir::new().unwrap();
        let generator = prepared_generator(
            dir.path(),
            json!({ "dataset": "ortho.png", "format": "jpg" }),
        );

        let sink = serve(&generator, "boundlayer.json");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        assert_eq!(doc["id"], "test-ortho");
        assert_eq!(doc["url"], "{lod}-{x}-{y}.jpg?3");
        assert_eq!(doc["maskUrl"], "{lod}-{x}-{y}.mask?3");
        assert_eq!(doc["lodRange"], json!({ "min": 1, "max": 1 }));

        let sink = serve(&generator, "mapConfig.json");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        assert_eq!(doc["boundLayers"]["test-ortho"], "boundlayer.json");
    }

    #[test]
    fn test_missing_dataset_fails_prepare() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), json!({ "dataset": "missing.png" }));
        let generator = Generator::new(p.clone(), create(&p).unwrap());
        assert!(generator.ensure_ready(&arsenal()).is_err());
        assert_eq!(generator.state(), GeneratorState::Failed);
    }
}
