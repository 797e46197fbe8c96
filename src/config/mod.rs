//! Application Configuration
//!
//! Every geometric threshold is tuned for synthetic worksheet images, so all
//! of them live here as named, overridable settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ocr::{PSM_SINGLE_LINE, PSM_SPARSE_TEXT};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Raster loading and upscaling
    pub image: ImageConfig,
    /// Marker color membership rules
    pub colors: ColorConfig,
    /// Run and bar detection
    pub bars: BarConfig,
    /// Label grouping and OCR retry policy
    pub labels: LabelConfig,
    /// Boundary tracing
    pub tracer: TracerConfig,
    /// Fraction bar stacking
    pub fractions: FractionConfig,
    /// OCR worker pool
    pub ocr: OcrConfig,
}

/// Raster loading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Images with more pixels than this are rejected before decoding
    pub max_pixels: u64,
    /// Images narrower than this are upscaled (0 disables upscaling)
    pub upscale_min_width: u32,
    /// Largest integer upscale factor
    pub max_upscale: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_pixels: 40_000_000,
            upscale_min_width: 320,
            max_upscale: 4,
        }
    }
}

/// Thresholds for one marker color
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRuleConfig {
    /// Minimum value of each primary channel
    pub min_primary: u8,
    /// Minimum lead of each primary channel over every other channel
    pub min_delta: i16,
}

/// Marker color settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Pixels with lower alpha are always background
    pub min_alpha: u8,
    /// Luminance below this counts as dark ink
    pub dark_cutoff: u8,
    pub red: ColorRuleConfig,
    pub green: ColorRuleConfig,
    pub blue: ColorRuleConfig,
    pub purple: ColorRuleConfig,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            min_alpha: 128,
            dark_cutoff: 128,
            red: ColorRuleConfig { min_primary: 120, min_delta: 60 },
            green: ColorRuleConfig { min_primary: 100, min_delta: 50 },
            blue: ColorRuleConfig { min_primary: 120, min_delta: 60 },
            purple: ColorRuleConfig { min_primary: 90, min_delta: 50 },
        }
    }
}

/// Run and bar detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    /// Shortest ink run considered part of a bar
    pub min_run: u32,
    /// Required overlap of adjacent runs, as a fraction of the shorter run
    pub overlap_ratio: f64,
    /// Largest row/column gap bridged when merging runs
    pub merge_tolerance: u32,
    /// Thicker merged bars are filled regions and are discarded
    pub max_thickness: u32,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            min_run: 8,
            overlap_ratio: 0.6,
            merge_tolerance: 1,
            max_thickness: 6,
        }
    }
}

/// Label grouping and OCR retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Components whose centers differ by at most this many rows share a row
    pub row_tolerance: f64,
    /// Largest horizontal gap between components of one label
    pub x_gap_tolerance: u32,
    /// Smaller components are noise specks
    pub min_component_area: usize,
    /// Larger components are merged rows or shapes, not glyphs
    pub max_component_area: usize,
    /// Largest bounding box aspect ratio (long side / short side) of a glyph
    pub max_aspect: f64,
    /// Padding added around each label crop
    pub padding: u32,
    /// Crops narrower than this are upscaled before recognition
    pub target_width: u32,
    /// Gaussian blur sigma applied before re-thresholding
    pub blur_sigma: f32,
    /// Re-threshold cutoffs tried in order
    pub thresholds: Vec<u8>,
    /// Also try Otsu's level after the fixed cutoffs
    pub otsu_threshold: bool,
    /// Page segmentation modes tried for each threshold
    pub psm_modes: Vec<u32>,
    /// Characters the recognizer may emit
    pub whitelist: String,
    /// Stop retrying once a parse reaches this confidence
    pub accept_confidence: f32,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 8.0,
            x_gap_tolerance: 6,
            min_component_area: 4,
            max_component_area: 5_000,
            max_aspect: 8.0,
            padding: 4,
            target_width: 64,
            blur_sigma: 0.6,
            thresholds: vec![128, 96, 160],
            otsu_threshold: true,
            psm_modes: vec![PSM_SPARSE_TEXT, PSM_SINGLE_LINE],
            whitelist: "0123456789.-".to_string(),
            accept_confidence: 90.0,
        }
    }
}

/// Boundary tracing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Cycles enclosing less area (px²) are noise
    pub min_cycle_area_px: f64,
    /// Largest length a label may take (exclusive lower bound is zero)
    pub max_label_value: f64,
    /// Farthest a label center may sit from the segment it calibrates,
    /// in source pixels (0 = unlimited)
    pub max_label_distance: f64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            min_cycle_area_px: 4.0,
            max_label_value: 1_000.0,
            max_label_distance: 80.0,
        }
    }
}

/// Fraction detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FractionConfig {
    /// Largest vertical gap between a bar and its numerator/denominator
    pub stack_gap: u32,
    /// Horizontal slack when deciding a glyph sits over a bar
    pub x_slack: u32,
    /// Distance within which a vertical bar marks a box edge
    pub box_edge_tolerance: u32,
}

impl Default for FractionConfig {
    fn default() -> Self {
        Self {
            stack_gap: 12,
            x_slack: 3,
            box_edge_tolerance: 2,
        }
    }
}

/// OCR worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Default recognition language
    pub lang: String,
    /// Default model data directory
    pub lang_path: Option<PathBuf>,
    /// Recognizer executable
    pub tesseract_bin: PathBuf,
    /// Idle time before a worker is torn down
    pub idle_timeout_ms: u64,
    /// Pending requests allowed per worker
    pub queue_capacity: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            lang: "eng".to_string(),
            lang_path: None,
            tesseract_bin: PathBuf::from("tesseract"),
            idle_timeout_ms: 3_000,
            queue_capacity: 16,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
