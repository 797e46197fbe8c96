//! Red/green label deviation average

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::tools::{ImageArgs, ToolContext};
use crate::vision::{find_label_boxes, load_raster, BinaryMask, LabelReader, MarkerColor, Raster, ValueRange};

pub const DEFAULT_DECIMALS: u32 = 3;

#[derive(Debug, Clone, Deserialize, clap::Args)]
#[serde(rename_all = "camelCase")]
pub struct DeviationArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub image: ImageArgs,
    /// Decimal places of the rounded average
    #[arg(long)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviationOutput {
    pub red_count: usize,
    pub green_count: usize,
    pub red_values: Vec<f64>,
    pub green_values: Vec<f64>,
    pub red_pstdev: f64,
    pub green_stdev: f64,
    pub average: f64,
    pub answer: String,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sum_squares(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum()
}

/// Population standard deviation; `None` for an empty slice
pub fn pstdev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some((sum_squares(values) / values.len() as f64).sqrt())
}

/// Sample standard deviation; `None` for fewer than two values
pub fn stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some((sum_squares(values) / (values.len() - 1) as f64).sqrt())
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn read_values(reader: &LabelReader<'_>, raster: &Raster, color: MarkerColor, ctx: &ToolContext) -> EngineResult<Vec<f64>> {
    let mask = BinaryMask::for_marker(raster, color, &ctx.config.colors);
    let boxes = find_label_boxes(&mask, &ctx.config.labels);
    let labels = reader.resolve(&mask, boxes, ValueRange::any())?;
    Ok(labels.iter().filter_map(|l| l.value()).collect())
}

/// Average of the red population and green sample standard deviations
pub fn solve_red_green_deviation_average(ctx: &ToolContext, args: &DeviationArgs) -> EngineResult<DeviationOutput> {
    let decimals = args.decimals.unwrap_or(DEFAULT_DECIMALS);
    let loaded = load_raster(ctx.codec.as_ref(), &args.image.path, &ctx.image_config(args.image.max_pixels))?;
    let reader = ctx.label_reader(ctx.worker_key(&args.image));

    let red_values = read_values(&reader, &loaded.raster, MarkerColor::Red, ctx)?;
    let green_values = read_values(&reader, &loaded.raster, MarkerColor::Green, ctx)?;

    let red_pstdev = pstdev(&red_values)
        .ok_or_else(|| EngineError::NotFound("no red numeric labels detected".to_string()))?;
    let green_stdev = stdev(&green_values).ok_or_else(|| {
        EngineError::NotFound(format!(
            "sample deviation needs at least two green labels, found {}",
            green_values.len()
        ))
    })?;

    let average = round_to((red_pstdev + green_stdev) / 2.0, decimals);
    info!(
        "Deviation: red {:?} (pstdev {:.4}), green {:?} (stdev {:.4})",
        red_values, red_pstdev, green_values, green_stdev
    );
    Ok(DeviationOutput {
        red_count: red_values.len(),
        green_count: green_values.len(),
        red_values,
        green_values,
        red_pstdev,
        green_stdev,
        average,
        answer: format!("{:.*}", decimals as usize, average),
    })
}
