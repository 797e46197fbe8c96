//! Image codec capability
//!
//! The engine never touches file formats directly; it goes through
//! `ImageCodec`, selected once when the tool context is built.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::vision::raster::Raster;

/// Resampling filter for `ImageCodec::resize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
}

/// Threshold cutoff for `ImageCodec::threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cutoff {
    /// Luminance strictly below the value becomes black
    Fixed(u8),
    /// Otsu's level computed from the image
    Otsu,
}

/// Decode, transform and encode rasters
pub trait ImageCodec: Send + Sync {
    /// Read width and height without decoding pixels
    fn probe_dimensions(&self, path: &Path) -> EngineResult<(u32, u32)>;
    /// Decode a file into an RGBA raster
    fn load(&self, path: &Path) -> EngineResult<Raster>;
    /// Crop a rectangle (clipped to the raster)
    fn extract(&self, raster: &Raster, x: u32, y: u32, width: u32, height: u32) -> Raster;
    fn resize(&self, raster: &Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster;
    fn grayscale(&self, raster: &Raster) -> Raster;
    fn blur(&self, raster: &Raster, sigma: f32) -> Raster;
    /// Binarize to black ink on white paper
    fn threshold(&self, raster: &Raster, cutoff: Cutoff) -> Raster;
    /// Encode as PNG bytes
    fn encode(&self, raster: &Raster) -> EngineResult<Vec<u8>>;
}

/// `ImageCodec` backed by the `image` and `imageproc` crates
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateCodec;

impl ImageCrateCodec {
    pub fn new() -> Self {
        Self
    }
}

fn to_luma(raster: &Raster) -> GrayImage {
    DynamicImage::ImageRgba8(raster.as_image().clone()).to_luma8()
}

fn from_luma(gray: GrayImage) -> Raster {
    Raster::from_image(DynamicImage::ImageLuma8(gray).to_rgba8())
}

impl ImageCodec for ImageCrateCodec {
    fn probe_dimensions(&self, path: &Path) -> EngineResult<(u32, u32)> {
        if !path.exists() {
            return Err(EngineError::InvalidInput(format!("image not found: {:?}", path)));
        }
        Ok(image::image_dimensions(path)?)
    }

    fn load(&self, path: &Path) -> EngineResult<Raster> {
        let img = image::open(path)?;
        Ok(Raster::from_image(img.to_rgba8()))
    }

    fn extract(&self, raster: &Raster, x: u32, y: u32, width: u32, height: u32) -> Raster {
        let x = x.min(raster.width());
        let y = y.min(raster.height());
        let width = width.min(raster.width() - x);
        let height = height.min(raster.height() - y);
        let cropped = image::imageops::crop_imm(raster.as_image(), x, y, width, height).to_image();
        Raster::from_image(cropped)
    }

    fn resize(&self, raster: &Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster {
        let filter = match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
        };
        Raster::from_image(image::imageops::resize(raster.as_image(), width, height, filter))
    }

    fn grayscale(&self, raster: &Raster) -> Raster {
        from_luma(to_luma(raster))
    }

    fn blur(&self, raster: &Raster, sigma: f32) -> Raster {
        if sigma <= 0.0 {
            return raster.clone();
        }
        let blurred = imageproc::filter::gaussian_blur_f32(&to_luma(raster), sigma);
        from_luma(blurred)
    }

    fn threshold(&self, raster: &Raster, cutoff: Cutoff) -> Raster {
        let gray = to_luma(raster);
        let level = match cutoff {
            Cutoff::Fixed(level) => level,
            // Otsu's level is the last value of the dark class
            Cutoff::Otsu => imageproc::contrast::otsu_level(&gray).saturating_add(1),
        };
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y).0[0] < level {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        from_luma(binary)
    }

    fn encode(&self, raster: &Raster) -> EngineResult<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(raster.as_image().clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}
