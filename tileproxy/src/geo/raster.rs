//! Pixel matrices exchanged between warper workers and the serving process.
//!
//! A [`Raster`] serializes into a flat byte block: a fixed 16 byte header
//! followed by the pixel data. This is the layout written in-place into the
//! shared arena by the worker and read back by the requester.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬───────────────────────┐
//! │ width u32│height u32│ chans u32│ depth u32│ data (row-major, LE)  │
//! └──────────┴──────────┴──────────┴──────────┴───────────────────────┘
//! ```

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{Error, Result};
use crate::geo::Size2;

/// Size of the in-place raster header.
pub const RASTER_HEADER_SIZE: usize = 16;

/// Element type of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// 8-bit unsigned integer per channel.
    U8,
    /// 64-bit float per channel.
    F64,
}

impl Depth {
    /// Bytes per element.
    pub fn element_size(self) -> usize {
        match self {
            Depth::U8 => 1,
            Depth::F64 => 8,
        }
    }

    fn code(self) -> u32 {
        self.element_size() as u32
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Depth::U8),
            8 => Some(Depth::F64),
            _ => None,
        }
    }
}

/// Pixel storage.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    U8(Vec<u8>),
    F64(Vec<f64>),
}

/// Interleaved, row-major pixel matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    size: Size2,
    channels: u32,
    data: RasterData,
}

impl Raster {
    /// Creates an 8-bit raster.
    pub fn from_u8(size: Size2, channels: u32, data: Vec<u8>) -> Result<Self> {
        Self::checked(size, channels, RasterData::U8(data))
    }

    /// Creates a floating point raster.
    pub fn from_f64(size: Size2, channels: u32, data: Vec<f64>) -> Result<Self> {
        Self::checked(size, channels, RasterData::F64(data))
    }

    fn checked(size: Size2, channels: u32, data: RasterData) -> Result<Self> {
        let expected = size.area() * channels as usize;
        let actual = match &data {
            RasterData::U8(d) => d.len(),
            RasterData::F64(d) => d.len(),
        };
        if channels == 0 || expected != actual {
            return Err(Error::internal(format!(
                "Raster {}x{}x{} cannot hold {} elements.",
                size.width, size.height, channels, actual
            )));
        }
        Ok(Self {
            size,
            channels,
            data,
        })
    }

    pub fn size(&self) -> Size2 {
        self.size
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn depth(&self) -> Depth {
        match self.data {
            RasterData::U8(_) => Depth::U8,
            RasterData::F64(_) => Depth::F64,
        }
    }

    pub fn data(&self) -> &RasterData {
        &self.data
    }

    /// 8-bit pixel data, if this is an 8-bit raster.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            RasterData::U8(d) => Some(d),
            RasterData::F64(_) => None,
        }
    }

    /// Floating point pixel data, if this is a floating point raster.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            RasterData::F64(d) => Some(d),
            RasterData::U8(_) => None,
        }
    }

    /// Number of bytes needed to serialize a raster of the given shape.
    pub fn encoded_len_for(size: Size2, channels: u32, depth: Depth) -> usize {
        RASTER_HEADER_SIZE + size.area() * channels as usize * depth.element_size()
    }

    /// Number of bytes this raster serializes into.
    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.size, self.channels, self.depth())
    }

    /// Writes header and data into `out`, which must be at least `encoded_len()` long.
    pub fn write_to(&self, out: &mut [u8]) -> Result<()> {
        let len = self.encoded_len();
        if out.len() < len {
            return Err(Error::internal(format!(
                "Raster needs {} bytes, slot has {}.",
                len,
                out.len()
            )));
        }

        out[0..4].copy_from_slice(&self.size.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.height.to_le_bytes());
        out[8..12].copy_from_slice(&self.channels.to_le_bytes());
        out[12..16].copy_from_slice(&self.depth().code().to_le_bytes());

        let body = &mut out[RASTER_HEADER_SIZE..len];
        match &self.data {
            RasterData::U8(d) => body.copy_from_slice(d),
            RasterData::F64(d) => {
                for (chunk, v) in body.chunks_exact_mut(8).zip(d) {
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    /// Reads a raster previously written with [`Raster::write_to`].
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RASTER_HEADER_SIZE {
            return Err(Error::internal("Truncated raster header."));
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let size = Size2::new(word(0), word(4));
        let channels = word(8);
        let depth = Depth::from_code(word(12))
            .ok_or_else(|| Error::internal(format!("Unknown raster depth {}.", word(12))))?;

        let len = Self::encoded_len_for(size, channels, depth);
        if bytes.len() < len {
            return Err(Error::internal(format!(
                "Truncated raster: need {} bytes, got {}.",
                len,
                bytes.len()
            )));
        }

        let body = &bytes[RASTER_HEADER_SIZE..len];
        match depth {
            Depth::U8 => Self::from_u8(size, channels, body.to_vec()),
            Depth::F64 => Self::from_f64(
                size,
                channels,
                body.chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        }
    }

    /// Converts an 8-bit raster with 1-4 channels into an image.
    pub fn to_image(&self) -> Result<DynamicImage> {
        let data = self
            .as_u8()
            .ok_or_else(|| Error::internal("Only 8-bit rasters can be encoded as images."))?
            .to_vec();
        let (w, h) = (self.size.width, self.size.height);
        let bad = || Error::internal("Raster buffer does not match its dimensions.");

        Ok(match self.channels {
            1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, data).ok_or_else(bad)?),
            2 => DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(w, h, data).ok_or_else(bad)?),
            3 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, data).ok_or_else(bad)?),
            4 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, data).ok_or_else(bad)?),
            n => {
                return Err(Error::internal(format!(
                    "Cannot encode {}-channel raster as image.",
                    n
                )))
            }
        })
    }
}
