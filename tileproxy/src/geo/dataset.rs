//! Georeferenced raster datasets and warping between them.
//!
//! A dataset on disk is any raster the `image` crate can decode, accompanied
//! by a JSON sidecar `<dataset>.geo.json` holding its georeference:
//!
//! ```json
//! { "srs": "EPSG:3857", "extents": { "ll": [0, 0], "ur": [100, 100] }, "nodata": 0 }
//! ```
//!
//! In memory a dataset is a grid of `f64` samples plus a per-pixel validity
//! mask. A pixel is invalid when its alpha is zero or when every data channel
//! equals the configured `nodata` value. Warping maps each destination pixel
//! center back into the source SRS and resamples there.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{CsConvertor, Extents2, Raster, Size2, SrsDefinition};

/// Resampling method used when warping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Nearest,
    #[default]
    Bilinear,
    Average,
}

impl FromStr for Resampling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            "average" => Ok(Resampling::Average),
            _ => Err(format!(
                "unknown resampling `{}`, expected nearest, bilinear or average",
                s
            )),
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Average => "average",
        })
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Georeference sidecar stored next to a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub srs: SrsDefinition,
    pub extents: Extents2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
    /// Raw sample values are mapped through `value * scale + offset`.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl GeoReference {
    pub fn new(srs: SrsDefinition, extents: Extents2) -> Self {
        Self {
            srs,
            extents,
            nodata: None,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Path of the sidecar for the given dataset file.
    pub fn sidecar_path(dataset: &Path) -> PathBuf {
        let mut name = dataset.as_os_str().to_os_string();
        name.push(".geo.json");
        PathBuf::from(name)
    }

    /// Loads the sidecar of a dataset.
    pub fn load(dataset: &Path) -> Result<Self> {
        let path = Self::sidecar_path(dataset);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::internal(format!(
                "Cannot read georeference <{}>: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::internal(format!(
                "Invalid georeference <{}>: {}",
                path.display(),
                e
            ))
        })
    }

    /// Writes the sidecar of a dataset.
    pub fn save(&self, dataset: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Cannot serialize georeference: {}", e)))?;
        std::fs::write(Self::sidecar_path(dataset), content)?;
        Ok(())
    }
}

/// In-memory georeferenced raster with a validity mask.
#[derive(Debug, Clone)]
pub struct GeoDataset {
    srs: SrsDefinition,
    extents: Extents2,
    size: Size2,
    channels: u32,
    data: Vec<f64>,
    valid: Vec<bool>,
}

impl GeoDataset {
    /// Builds a dataset from its parts.
    pub fn from_parts(
        srs: SrsDefinition,
        extents: Extents2,
        size: Size2,
        channels: u32,
        data: Vec<f64>,
        valid: Vec<bool>,
    ) -> Result<Self> {
        if channels == 0
            || data.len() != size.area() * channels as usize
            || valid.len() != size.area()
        {
            return Err(Error::internal("Dataset buffers do not match its size."));
        }
        if !extents.is_valid() {
            return Err(Error::internal("Dataset extents are empty."));
        }
        Ok(Self {
            srs,
            extents,
            size,
            channels,
            data,
            valid,
        })
    }

    /// Creates an all-invalid in-memory dataset.
    pub fn blank(srs: SrsDefinition, extents: Extents2, size: Size2, channels: u32) -> Self {
        Self {
            srs,
            extents,
            size,
            channels,
            data: vec![0.0; size.area() * channels as usize],
            valid: vec![false; size.area()],
        }
    }

    /// Creates an empty destination dataset with this dataset's channel layout.
    pub fn derive_in_memory(&self, srs: SrsDefinition, extents: Extents2, size: Size2) -> Self {
        Self::blank(srs, extents, size, self.channels)
    }

    /// Opens a data dataset.
    ///
    /// # Errors
    ///
    /// `NotFound` if the dataset file does not exist, `Internal` for any
    /// other failure (unreadable image, missing or broken sidecar).
    pub fn open(path: &Path) -> Result<Self> {
        ensure_exists(path)?;
        let georef = GeoReference::load(path)?;
        let img = decode(path)?;
        let size = Size2::new(img.width(), img.height());

        let (bands, has_alpha, raw) = samples(&img);
        let channels = if has_alpha { bands - 1 } else { bands };
        let bands = bands as usize;
        let channels_usize = channels as usize;

        let mut data = Vec::with_capacity(size.area() * channels_usize);
        let mut valid = Vec::with_capacity(size.area());
        for px in raw.chunks_exact(bands) {
            let values = &px[..channels_usize];
            let transparent = has_alpha && px[bands - 1] == 0.0;
            let nodata = georef
                .nodata
                .is_some_and(|nd| values.iter().all(|v| *v == nd));
            valid.push(!transparent && !nodata);
            data.extend(values.iter().map(|v| v * georef.scale + georef.offset));
        }

        Self::from_parts(georef.srs, georef.extents, size, channels, data, valid)
    }

    /// Opens a mask dataset: coverage in `[0, 1]` read from the first channel.
    pub fn open_mask(path: &Path) -> Result<Self> {
        ensure_exists(path)?;
        let georef = GeoReference::load(path)?;
        let img = decode(path)?.to_luma8();
        let size = Size2::new(img.width(), img.height());
        let data = img.as_raw().iter().map(|v| *v as f64 / 255.0).collect();

        Self::from_parts(
            georef.srs,
            georef.extents,
            size,
            1,
            data,
            vec![true; size.area()],
        )
    }

    pub fn srs(&self) -> &SrsDefinition {
        &self.srs
    }

    pub fn extents(&self) -> &Extents2 {
        &self.extents
    }

    pub fn size(&self) -> Size2 {
        self.size
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Per-pixel validity, row-major.
    pub fn validity(&self) -> &[bool] {
        &self.valid
    }

    /// Returns true if no pixel is valid.
    pub fn mask_is_empty(&self) -> bool {
        !self.valid.iter().any(|v| *v)
    }

    /// Size of one pixel in SRS units.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            self.extents.width() / self.size.width as f64,
            self.extents.height() / self.size.height as f64,
        )
    }

    /// Continuous pixel coordinates of a point in this dataset's SRS.
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let (px, py) = self.pixel_size();
        (
            (x - self.extents.ll[0]) / px,
            (self.extents.ur[1] - y) / py,
        )
    }

    fn index(&self, col: i64, row: i64) -> Option<usize> {
        let (w, h) = (self.size.width as i64, self.size.height as i64);
        (col >= 0 && row >= 0 && col < w && row < h).then(|| (row * w + col) as usize)
    }

    fn pixel(&self, idx: usize) -> &[f64] {
        let ch = self.channels as usize;
        &self.data[idx * ch..(idx + 1) * ch]
    }

    /// Valid sample at a point given in this dataset's SRS.
    pub fn value_at(&self, x: f64, y: f64) -> Option<&[f64]> {
        let (fx, fy) = self.to_pixel(x, y);
        let idx = self.index(fx.floor() as i64, fy.floor() as i64)?;
        self.valid[idx].then(|| self.pixel(idx))
    }

    /// Warps this dataset into `dst` using its SRS, extents and size.
    ///
    /// Destination pixels that do not map onto valid source data stay invalid.
    pub fn warp_into(&self, dst: &mut GeoDataset, resampling: Resampling) -> Result<()> {
        if dst.channels != self.channels {
            return Err(Error::internal(format!(
                "Cannot warp {}-channel dataset into {} channels.",
                self.channels, dst.channels
            )));
        }

        let conv = CsConvertor::new(&dst.srs, &self.srs)?;
        let (dpx, dpy) = dst.pixel_size();
        let ch = self.channels as usize;
        let mut value = vec![0.0; ch];

        for row in 0..dst.size.height as usize {
            for col in 0..dst.size.width as usize {
                let x = dst.extents.ll[0] + (col as f64 + 0.5) * dpx;
                let y = dst.extents.ur[1] - (row as f64 + 0.5) * dpy;

                let hit = match resampling {
                    Resampling::Nearest => self.sample_nearest(&conv, x, y, &mut value),
                    Resampling::Bilinear => self.sample_bilinear(&conv, x, y, &mut value),
                    Resampling::Average => {
                        self.sample_average(&conv, x, y, dpx / 2.0, dpy / 2.0, &mut value)
                    }
                };

                let idx = row * dst.size.width as usize + col;
                dst.valid[idx] = hit;
                if hit {
                    dst.data[idx * ch..(idx + 1) * ch].copy_from_slice(&value);
                }
            }
        }
        Ok(())
    }

    fn sample_nearest(&self, conv: &CsConvertor, x: f64, y: f64, out: &mut [f64]) -> bool {
        let Some((sx, sy)) = conv.convert(x, y) else {
            return false;
        };
        match self.value_at(sx, sy) {
            Some(v) => {
                out.copy_from_slice(v);
                true
            }
            None => false,
        }
    }

    fn sample_bilinear(&self, conv: &CsConvertor, x: f64, y: f64, out: &mut [f64]) -> bool {
        let Some((sx, sy)) = conv.convert(x, y) else {
            return false;
        };
        let (fx, fy) = self.to_pixel(sx, sy);
        if self.index(fx.floor() as i64, fy.floor() as i64).is_none() {
            return false;
        }

        let (gx, gy) = (fx - 0.5, fy - 0.5);
        let (x0, y0) = (gx.floor(), gy.floor());
        let (tx, ty) = (gx - x0, gy - y0);

        out.fill(0.0);
        let mut total = 0.0;
        for (dx, dy, weight) in [
            (0, 0, (1.0 - tx) * (1.0 - ty)),
            (1, 0, tx * (1.0 - ty)),
            (0, 1, (1.0 - tx) * ty),
            (1, 1, tx * ty),
        ] {
            let Some(idx) = self.index(x0 as i64 + dx, y0 as i64 + dy) else {
                continue;
            };
            if !self.valid[idx] || weight <= 0.0 {
                continue;
            }
            for (o, v) in out.iter_mut().zip(self.pixel(idx)) {
                *o += v * weight;
            }
            total += weight;
        }

        if total <= 0.0 {
            return false;
        }
        out.iter_mut().for_each(|o| *o /= total);
        true
    }

    /// Area-weighted average over the source pixels covered by the
    /// destination pixel footprint (`x +- hw`, `y +- hh`).
    fn sample_average(
        &self,
        conv: &CsConvertor,
        x: f64,
        y: f64,
        hw: f64,
        hh: f64,
        out: &mut [f64],
    ) -> bool {
        let corners = [
            conv.convert(x - hw, y - hh),
            conv.convert(x + hw, y - hh),
            conv.convert(x - hw, y + hh),
            conv.convert(x + hw, y + hh),
        ];
        if corners.iter().any(Option::is_none) {
            return self.sample_nearest(conv, x, y, out);
        }

        let (mut minx, mut miny) = (f64::INFINITY, f64::INFINITY);
        let (mut maxx, mut maxy) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (sx, sy) in corners.into_iter().flatten() {
            let (fx, fy) = self.to_pixel(sx, sy);
            minx = minx.min(fx);
            maxx = maxx.max(fx);
            miny = miny.min(fy);
            maxy = maxy.max(fy);
        }

        let (w, h) = (self.size.width as f64, self.size.height as f64);
        if maxx <= 0.0 || maxy <= 0.0 || minx >= w || miny >= h {
            return false;
        }

        out.fill(0.0);
        let mut total = 0.0;
        let (c0, c1) = (minx.max(0.0).floor() as i64, maxx.min(w).ceil() as i64);
        let (r0, r1) = (miny.max(0.0).floor() as i64, maxy.min(h).ceil() as i64);
        for row in r0..r1 {
            let oy = (maxy.min(row as f64 + 1.0) - miny.max(row as f64)).max(0.0);
            for col in c0..c1 {
                let ox = (maxx.min(col as f64 + 1.0) - minx.max(col as f64)).max(0.0);
                let weight = ox * oy;
                let Some(idx) = self.index(col, row) else {
                    continue;
                };
                if weight <= 0.0 || !self.valid[idx] {
                    continue;
                }
                for (o, v) in out.iter_mut().zip(self.pixel(idx)) {
                    *o += v * weight;
                }
                total += weight;
            }
        }

        if total <= 0.0 {
            return false;
        }
        out.iter_mut().for_each(|o| *o /= total);
        true
    }

    /// Invalidates every pixel not covered by `mask` (coverage below one half).
    ///
    /// `mask` must have been warped to the same grid as this dataset.
    pub fn apply_mask(&mut self, mask: &GeoDataset) -> Result<()> {
        if mask.size != self.size {
            return Err(Error::internal("Mask grid does not match dataset grid."));
        }
        let mch = mask.channels as usize;
        for (idx, valid) in self.valid.iter_mut().enumerate() {
            let covered = mask.valid[idx] && mask.data[idx * mch] >= 0.5;
            *valid = *valid && covered;
        }
        Ok(())
    }

    /// Data channels as an 8-bit raster; invalid pixels are zero.
    pub fn to_u8_raster(&self) -> Result<Raster> {
        let ch = self.channels as usize;
        let mut out = vec![0u8; self.data.len()];
        for (idx, valid) in self.valid.iter().enumerate() {
            if !*valid {
                continue;
            }
            for c in 0..ch {
                out[idx * ch + c] = self.data[idx * ch + c].round().clamp(0.0, 255.0) as u8;
            }
        }
        Raster::from_u8(self.size, self.channels, out)
    }

    /// Validity mask as a single channel 8-bit raster (255 valid, 0 invalid).
    pub fn validity_raster(&self) -> Result<Raster> {
        let out = self.valid.iter().map(|v| if *v { 255 } else { 0 }).collect();
        Raster::from_u8(self.size, 1, out)
    }

    /// First channel as a floating point raster; invalid pixels are zero.
    pub fn coverage_raster(&self) -> Result<Raster> {
        let ch = self.channels as usize;
        let out = self
            .valid
            .iter()
            .enumerate()
            .map(|(idx, v)| if *v { self.data[idx * ch] } else { 0.0 })
            .collect();
        Raster::from_f64(self.size, 1, out)
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::not_found(format!(
            "Dataset <{}> does not exist.",
            path.display()
        )))
    }
}

fn decode(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| {
        Error::internal(format!("Cannot open dataset <{}>: {}", path.display(), e))
    })
}

/// Flattens an image into `(bands, has_alpha, samples)`.
///
/// 16-bit and float images keep their full range so they can carry heights.
fn samples(img: &DynamicImage) -> (u32, bool, Vec<f64>) {
    match img {
        DynamicImage::ImageLuma16(buf) => (1, false, widen(buf.as_raw())),
        DynamicImage::ImageLumaA16(buf) => (2, true, widen(buf.as_raw())),
        DynamicImage::ImageRgb16(buf) => (3, false, widen(buf.as_raw())),
        DynamicImage::ImageRgba16(buf) => (4, true, widen(buf.as_raw())),
        DynamicImage::ImageRgb32F(buf) => (3, false, widen(buf.as_raw())),
        DynamicImage::ImageRgba32F(buf) => (4, true, widen(buf.as_raw())),
        other => match other.color().channel_count() {
            1 => (1, false, widen(other.to_luma8().as_raw())),
            2 => (2, true, widen(other.to_luma_alpha8().as_raw())),
            3 => (3, false, widen(other.to_rgb8().as_raw())),
            _ => (4, true, widen(other.to_rgba8().as_raw())),
        },
    }
}

fn widen<T: Copy + Into<f64>>(raw: &[T]) -> Vec<f64> {
    raw.iter().map(|v| (*v).into()).collect()
}
