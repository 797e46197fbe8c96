//! Green polygon area calibrated by purple length labels

use serde::Serialize;
use tracing::info;

use crate::error::EngineResult;
use crate::tools::{ImageArgs, ToolContext};
use crate::vision::{
    find_label_boxes, load_raster, measure_area, trace_boundary, BinaryMask, MarkerColor, ValueRange,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonAreaOutput {
    pub width: u32,
    pub height: u32,
    /// Area in source-image pixels
    pub area_px: f64,
    pub cycles_detected: usize,
    pub segments: usize,
    pub labeled_segments: usize,
    pub labels_detected: usize,
    /// Source-image pixels per unit length
    pub px_per_unit: f64,
    pub area_units: f64,
    pub answer: String,
}

/// Trace the green polygon, read purple length labels, and report its area in label units
pub fn solve_green_polygon_area(ctx: &ToolContext, args: &ImageArgs) -> EngineResult<PolygonAreaOutput> {
    let loaded = load_raster(ctx.codec.as_ref(), &args.path, &ctx.image_config(args.max_pixels))?;
    let raster = &loaded.raster;

    let shape = BinaryMask::for_marker(raster, MarkerColor::Green, &ctx.config.colors);
    let boundary = trace_boundary(&shape, &ctx.config.tracer)?;

    let label_mask = BinaryMask::for_marker(raster, MarkerColor::Purple, &ctx.config.colors);
    let boxes = find_label_boxes(&label_mask, &ctx.config.labels);
    info!("Found {} candidate length labels", boxes.len());
    let labels = ctx.label_reader(ctx.worker_key(args)).resolve(
        &label_mask,
        boxes,
        ValueRange::lengths(ctx.config.tracer.max_label_value),
    )?;

    let scale = loaded.scale as f64;
    let max_distance = match ctx.config.tracer.max_label_distance {
        d if d > 0.0 => d * scale,
        _ => f64::INFINITY,
    };
    let measurement = measure_area(&boundary, &labels, max_distance)?;
    let (width, height) = loaded.source_dimensions;
    Ok(PolygonAreaOutput {
        width,
        height,
        area_px: measurement.area_px / (scale * scale),
        cycles_detected: measurement.cycles_detected,
        segments: measurement.segments,
        labeled_segments: measurement.labeled_segments,
        labels_detected: measurement.labels_detected,
        px_per_unit: measurement.px_per_unit / scale,
        area_units: measurement.area_units,
        answer: measurement.answer,
    })
}
