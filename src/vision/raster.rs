//! Raster loading and normalization
//!
//! A `Raster` is an immutable RGBA pixel buffer owned by one tool call.
//! Loading enforces the pixel budget from the image header before any
//! pixel is decoded, and small images are upscaled so glyph-sized marks
//! keep enough pixels for bar and label detection.

use image::{Rgba, RgbaImage};
use std::path::Path;
use tracing::{debug, info};

use crate::config::ImageConfig;
use crate::error::{EngineError, EngineResult};
use crate::vision::codec::{ImageCodec, ResizeFilter};

/// RGBA image owned by a single request
#[derive(Debug, Clone)]
pub struct Raster {
    image: RgbaImage,
}

impl Raster {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Create a raster filled with one color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba(rgba)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// RGBA value at (x, y)
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Paint a single pixel if it lies inside the raster
    pub fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, Rgba(rgba));
        }
    }

    /// Paint a rectangle, clipped to the raster
    #[cfg(test)]
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        for py in y..(y + height).min(self.height()) {
            for px in x..(x + width).min(self.width()) {
                self.put(px, py, rgba);
            }
        }
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }
}

/// A decoded raster plus the upscale factor applied while loading
#[derive(Debug, Clone)]
pub struct LoadedRaster {
    pub raster: Raster,
    /// Width and height of the file before upscaling
    pub source_dimensions: (u32, u32),
    /// Integer nearest-neighbor factor (1 = unchanged)
    pub scale: u32,
}

/// Reject images whose pixel count exceeds the budget
pub fn check_pixel_budget(width: u32, height: u32, max_pixels: u64) -> EngineResult<()> {
    let pixels = width as u64 * height as u64;
    if pixels > max_pixels {
        return Err(EngineError::ResourceLimit {
            pixels,
            limit: max_pixels,
        });
    }
    Ok(())
}

/// Load a raster, guarding the pixel budget before decoding
pub fn load_raster(
    codec: &dyn ImageCodec,
    path: &Path,
    config: &ImageConfig,
) -> EngineResult<LoadedRaster> {
    let (width, height) = codec.probe_dimensions(path)?;
    check_pixel_budget(width, height, config.max_pixels)?;

    let raster = codec.load(path)?;
    let scale = upscale_factor(raster.width(), config);
    info!(
        "Loaded {:?} ({}x{}), upscale factor {}",
        path, width, height, scale
    );

    let raster = if scale > 1 {
        check_pixel_budget(width * scale, height * scale, config.max_pixels)?;
        codec.resize(
            &raster,
            raster.width() * scale,
            raster.height() * scale,
            ResizeFilter::Nearest,
        )
    } else {
        raster
    };

    Ok(LoadedRaster {
        raster,
        source_dimensions: (width, height),
        scale,
    })
}

/// Integer upscale factor needed to reach the minimum width
pub fn upscale_factor(width: u32, config: &ImageConfig) -> u32 {
    if config.upscale_min_width == 0 || width == 0 || width >= config.upscale_min_width {
        return 1;
    }
    let needed = config.upscale_min_width.div_ceil(width);
    needed.clamp(1, config.max_upscale.max(1))
}

/// ITU-R 601 luma of an RGBA pixel
pub fn luminance(rgba: [u8; 4]) -> u8 {
    (0.299 * rgba[0] as f32 + 0.587 * rgba[1] as f32 + 0.114 * rgba[2] as f32) as u8
}

/// Grayscale with the observed luminance range stretched to 0..=255.
/// Transparent pixels read as white paper.
pub fn normalized_grayscale(raster: &Raster, min_alpha: u8) -> Vec<u8> {
    let mut gray: Vec<u8> = raster
        .as_image()
        .pixels()
        .map(|p| if p.0[3] < min_alpha { 255 } else { luminance(p.0) })
        .collect();

    let lo = gray.iter().copied().min().unwrap_or(0);
    let hi = gray.iter().copied().max().unwrap_or(255);
    if hi > lo && (lo > 0 || hi < 255) {
        let span = (hi - lo) as u32;
        for v in gray.iter_mut() {
            *v = ((*v - lo) as u32 * 255 / span) as u8;
        }
        debug!("Contrast stretched luminance {}..={} to 0..=255", lo, hi);
    }

    gray
}
