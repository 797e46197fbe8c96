//! Marker blob counting

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::tools::ToolContext;
use crate::vision::{label_components, load_raster, BinaryMask, Component, ComponentFilter, MarkerColor};

#[derive(Debug, Clone, Deserialize, clap::Args)]
#[serde(rename_all = "camelCase")]
pub struct BlobArgs {
    /// Image file to analyze
    pub path: std::path::PathBuf,
    /// Marker color: red, green, blue, purple or dark
    #[arg(long)]
    pub color: MarkerColor,
    /// Ignore blobs smaller than this many pixels
    #[arg(long)]
    pub min_area: Option<usize>,
    /// Ignore blobs larger than this many pixels
    #[arg(long)]
    pub max_area: Option<usize>,
    /// Reject images with more pixels than this
    #[arg(long)]
    pub max_pixels: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCountOutput {
    pub color: MarkerColor,
    pub width: u32,
    pub height: u32,
    /// Upscale factor of the component coordinates
    pub scale: u32,
    pub count: usize,
    pub components: Vec<Component>,
    pub answer: String,
}

/// Count connected blobs of one marker color
pub fn count_color_blobs(ctx: &ToolContext, args: &BlobArgs) -> EngineResult<BlobCountOutput> {
    let loaded = load_raster(ctx.codec.as_ref(), &args.path, &ctx.image_config(args.max_pixels))?;
    let mask = BinaryMask::for_marker(&loaded.raster, args.color, &ctx.config.colors);
    if mask.is_empty() {
        return Err(EngineError::NotFound(format!("no {:?} ink detected", args.color).to_lowercase()));
    }

    // Areas are given in source pixels; the mask may be upscaled
    let area_scale = (loaded.scale * loaded.scale) as usize;
    let filter = ComponentFilter {
        min_area: args.min_area.unwrap_or(ctx.config.labels.min_component_area) * area_scale,
        max_area: args.max_area.map_or(usize::MAX, |a| a.saturating_mul(area_scale)),
        max_aspect: f64::INFINITY,
    };
    let components = filter.apply(label_components(&mask));
    info!("Counted {} {:?} blobs", components.len(), args.color);

    let (width, height) = loaded.source_dimensions;
    Ok(BlobCountOutput {
        color: args.color,
        width,
        height,
        scale: loaded.scale,
        count: components.len(),
        answer: components.len().to_string(),
        components,
    })
}
