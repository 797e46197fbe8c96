//! Tool Layer
//!
//! Worksheet tools built on the vision and OCR layers. Each tool takes a
//! path plus optional overrides and returns one serializable result.
//! Tools are reachable as CLI subcommands and as newline-delimited JSON
//! calls in serve mode; both share one `ToolContext`.

pub mod blobs;
pub mod deviation;
pub mod fractions;
pub mod polygon_area;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ImageConfig};
use crate::error::{EngineError, EngineResult};
use crate::ocr::{OcrWorkerPool, WorkerKey};
use crate::vision::{ImageCodec, LabelReader};

pub use blobs::{count_color_blobs, BlobArgs};
pub use deviation::{solve_red_green_deviation_average, DeviationArgs};
pub use fractions::solve_fraction_bars;
pub use polygon_area::solve_green_polygon_area;

/// Shared services for tool calls
pub struct ToolContext {
    pub codec: Arc<dyn ImageCodec>,
    pub pool: Arc<OcrWorkerPool>,
    pub config: AppConfig,
}

impl ToolContext {
    pub fn new(codec: Arc<dyn ImageCodec>, pool: Arc<OcrWorkerPool>, config: AppConfig) -> Self {
        Self {
            codec,
            pool,
            config,
        }
    }

    /// Image settings with a per-call pixel budget override
    pub fn image_config(&self, max_pixels: Option<u64>) -> ImageConfig {
        let mut image = self.config.image.clone();
        if let Some(max_pixels) = max_pixels {
            image.max_pixels = max_pixels;
        }
        image
    }

    /// Pool key with per-call language overrides
    pub fn worker_key(&self, args: &ImageArgs) -> WorkerKey {
        WorkerKey::new(
            args.lang.clone().unwrap_or_else(|| self.config.ocr.lang.clone()),
            args.lang_path.clone().or_else(|| self.config.ocr.lang_path.clone()),
        )
    }

    pub fn label_reader(&self, key: WorkerKey) -> LabelReader<'_> {
        LabelReader::new(self.codec.as_ref(), &self.pool, key, &self.config.labels)
    }
}

/// Arguments shared by the image tools
#[derive(Debug, Clone, Deserialize, clap::Args)]
#[serde(rename_all = "camelCase")]
pub struct ImageArgs {
    /// Image file to analyze
    pub path: PathBuf,
    /// Recognition language (e.g. "eng")
    #[arg(long)]
    #[serde(default)]
    pub lang: Option<String>,
    /// Directory holding the recognizer's language data
    #[arg(long)]
    #[serde(default)]
    pub lang_path: Option<PathBuf>,
    /// Reject images with more pixels than this
    #[arg(long)]
    #[serde(default)]
    pub max_pixels: Option<u64>,
}

/// A tool invocation as received in serve mode
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    SolveGreenPolygonAreaFromImage(ImageArgs),
    SolveRedGreenDeviationAverageFromImage(DeviationArgs),
    SolveFractionBarsFromImage(ImageArgs),
    CountColorBlobsFromImage(BlobArgs),
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SolveGreenPolygonAreaFromImage(_) => "solve_green_polygon_area_from_image",
            ToolCall::SolveRedGreenDeviationAverageFromImage(_) => {
                "solve_red_green_deviation_average_from_image"
            }
            ToolCall::SolveFractionBarsFromImage(_) => "solve_fraction_bars_from_image",
            ToolCall::CountColorBlobsFromImage(_) => "count_color_blobs_from_image",
        }
    }
}

fn to_value<T: Serialize>(output: T) -> EngineResult<Value> {
    serde_json::to_value(output).map_err(|e| EngineError::InvalidInput(format!("unserializable result: {}", e)))
}

/// Run one tool call
pub fn dispatch(ctx: &ToolContext, call: &ToolCall) -> EngineResult<Value> {
    debug!("Dispatching {}", call.name());
    match call {
        ToolCall::SolveGreenPolygonAreaFromImage(args) => to_value(solve_green_polygon_area(ctx, args)?),
        ToolCall::SolveRedGreenDeviationAverageFromImage(args) => {
            to_value(solve_red_green_deviation_average(ctx, args)?)
        }
        ToolCall::SolveFractionBarsFromImage(args) => to_value(solve_fraction_bars(ctx, args)?),
        ToolCall::CountColorBlobsFromImage(args) => to_value(count_color_blobs(ctx, args)?),
    }
}

/// Failure result for a tool call
pub fn error_result(err: &EngineError) -> Value {
    json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
        }
    })
}

/// Answer newline-delimited JSON tool calls until input ends
pub fn serve<R: BufRead, W: Write>(ctx: &ToolContext, input: R, mut output: W) -> Result<()> {
    info!("Serving tool calls (backend: {})", ctx.pool.backend_name());
    let mut handled = 0usize;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<ToolCall>(&line) {
            Ok(call) => match dispatch(ctx, &call) {
                Ok(value) => value,
                Err(e) => {
                    warn!("{} failed: {}", call.name(), e);
                    error_result(&e)
                }
            },
            Err(e) => error_result(&EngineError::InvalidInput(format!("bad tool call: {}", e))),
        };
        writeln!(output, "{}", serde_json::to_string(&result)?)?;
        output.flush()?;
        handled += 1;
        debug!("{} calls handled, {} live OCR workers", handled, ctx.pool.live_workers());
    }
    info!("Input closed after {} calls", handled);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ocr::testing::ScriptedBackend;
    use crate::vision::ImageCrateCodec;
    use std::path::Path;

    /// Context over a scripted recognizer, with upscaling disabled
    pub fn context(backend: ScriptedBackend) -> ToolContext {
        let mut config = AppConfig::default();
        config.image.upscale_min_width = 0;
        ToolContext::new(Arc::new(ImageCrateCodec::new()), Arc::new(backend.into_pool()), config)
    }

    pub fn image_args(path: &Path) -> ImageArgs {
        ImageArgs {
            path: path.to_path_buf(),
            lang: None,
            lang_path: None,
            max_pixels: None,
        }
    }

    pub fn white(width: u32, height: u32) -> image::RgbaImage {
        image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]))
    }

    pub fn fill(image: &mut image::RgbaImage, x: u32, y: u32, w: u32, h: u32, rgba: [u8; 4]) {
        for yy in y..y + h {
            for xx in x..x + w {
                image.put_pixel(xx, yy, image::Rgba(rgba));
            }
        }
    }

    pub fn save(dir: &Path, name: &str, image: &image::RgbaImage) -> PathBuf {
        let path = dir.join(name);
        image.save(&path).unwrap();
        path
    }
}
