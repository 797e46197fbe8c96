//! Numeric label grouping and recognition
//!
//! Glyph components are grouped into label boxes (same row, small
//! horizontal gap). Each box is cropped, upscaled, blurred and
//! re-thresholded, then read by the OCR pool under several cutoffs and
//! page segmentation modes; the most confident valid number wins.

use serde::Serialize;
use tracing::debug;

use crate::config::LabelConfig;
use crate::error::{EngineError, EngineResult};
use crate::ocr::{OcrWorkerPool, OutputFlags, RecognizeOptions, WorkerKey};
use crate::vision::codec::{Cutoff, ImageCodec, ResizeFilter};
use crate::vision::components::{label_components, Component, ComponentFilter};
use crate::vision::mask::BinaryMask;
use crate::vision::raster::Raster;

/// A recognized label value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelReading {
    pub value: f64,
    pub raw: String,
    pub confidence: f32,
    pub threshold: Cutoff,
    pub psm: u32,
}

/// Union of grouped glyph components (inclusive bounds)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub cx: f64,
    pub cy: f64,
    pub components: usize,
    pub reading: Option<LabelReading>,
}

impl LabelBox {
    pub fn from_components<'a>(components: impl IntoIterator<Item = &'a Component>) -> Option<Self> {
        let mut iter = components.into_iter();
        let first = iter.next()?;
        let mut label = LabelBox {
            x0: first.x0,
            y0: first.y0,
            x1: first.x1,
            y1: first.y1,
            cx: 0.0,
            cy: 0.0,
            components: 1,
            reading: None,
        };
        for c in iter {
            label.absorb(c);
        }
        label.recenter();
        Some(label)
    }

    fn absorb(&mut self, c: &Component) {
        self.x0 = self.x0.min(c.x0);
        self.y0 = self.y0.min(c.y0);
        self.x1 = self.x1.max(c.x1);
        self.y1 = self.y1.max(c.y1);
        self.components += 1;
    }

    fn recenter(&mut self) {
        self.cx = (self.x0 + self.x1) as f64 / 2.0;
        self.cy = (self.y0 + self.y1) as f64 / 2.0;
    }

    pub fn value(&self) -> Option<f64> {
        self.reading.as_ref().map(|r| r.value)
    }
}

/// Accepted label values: `min_exclusive < v <= max_inclusive`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min_exclusive: f64,
    pub max_inclusive: f64,
}

impl ValueRange {
    /// Positive lengths up to `max`
    pub fn lengths(max: f64) -> Self {
        Self {
            min_exclusive: 0.0,
            max_inclusive: max,
        }
    }

    /// Any finite value
    pub fn any() -> Self {
        Self {
            min_exclusive: f64::MIN,
            max_inclusive: f64::MAX,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value > self.min_exclusive && value <= self.max_inclusive
    }
}

/// Filter used to keep glyph-like components
pub fn glyph_filter(config: &LabelConfig) -> ComponentFilter {
    ComponentFilter {
        min_area: config.min_component_area,
        max_area: config.max_component_area,
        max_aspect: config.max_aspect,
    }
}

/// Group components into label boxes by row, then by horizontal gap
pub fn group_components(components: &[Component], config: &LabelConfig) -> Vec<LabelBox> {
    let mut sorted: Vec<&Component> = components.iter().collect();
    sorted.sort_by(|a, b| a.cy.total_cmp(&b.cy).then(a.cx.total_cmp(&b.cx)));

    let mut rows: Vec<(f64, Vec<&Component>)> = Vec::new();
    for c in sorted {
        let same_row = rows
            .last()
            .is_some_and(|(mean_cy, _)| (c.cy - mean_cy).abs() <= config.row_tolerance);
        if !same_row {
            rows.push((c.cy, vec![c]));
        } else if let Some((mean_cy, members)) = rows.last_mut() {
            members.push(c);
            *mean_cy = members.iter().map(|m| m.cy).sum::<f64>() / members.len() as f64;
        }
    }

    let mut boxes = Vec::new();
    for (_, mut members) in rows {
        members.sort_by_key(|c| (c.x0, c.y0));
        let mut current: Option<LabelBox> = None;
        for c in members {
            let joins = current
                .as_ref()
                .is_some_and(|label| c.x0 as i64 - label.x1 as i64 - 1 <= config.x_gap_tolerance as i64);
            if joins {
                if let Some(label) = current.as_mut() {
                    label.absorb(c);
                }
                continue;
            }
            if let Some(mut done) = current.take() {
                done.recenter();
                boxes.push(done);
            }
            current = LabelBox::from_components([c]);
        }
        if let Some(mut done) = current {
            done.recenter();
            boxes.push(done);
        }
    }

    boxes.sort_by_key(|b| (b.y0, b.x0));
    debug!("Grouped {} components into {} label boxes", components.len(), boxes.len());
    boxes
}

/// Label boxes for all glyph-like components of a mask
pub fn find_label_boxes(mask: &BinaryMask, config: &LabelConfig) -> Vec<LabelBox> {
    let glyphs = glyph_filter(config).apply(label_components(mask));
    group_components(&glyphs, config)
}

/// Parse OCR text as one number. Whitespace between digits is dropped;
/// a minus sign is only accepted in leading position.
pub fn parse_label_value(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !compact.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !compact
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return None;
    }
    if compact.rfind('-').is_some_and(|pos| pos != 0) || compact.matches('.').count() > 1 {
        return None;
    }
    compact.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads label boxes through the OCR pool
pub struct LabelReader<'a> {
    codec: &'a dyn ImageCodec,
    pool: &'a OcrWorkerPool,
    key: WorkerKey,
    config: &'a LabelConfig,
}

impl<'a> LabelReader<'a> {
    pub fn new(
        codec: &'a dyn ImageCodec,
        pool: &'a OcrWorkerPool,
        key: WorkerKey,
        config: &'a LabelConfig,
    ) -> Self {
        Self {
            codec,
            pool,
            key,
            config,
        }
    }

    /// Cutoffs tried for each crop: the fixed levels, then Otsu's if enabled
    fn cutoffs(&self) -> Vec<Cutoff> {
        let mut cutoffs: Vec<Cutoff> = self.config.thresholds.iter().copied().map(Cutoff::Fixed).collect();
        if self.config.otsu_threshold {
            cutoffs.push(Cutoff::Otsu);
        }
        cutoffs
    }

    /// Most confident in-range reading across all cutoffs and modes.
    /// `page` is the label mask rendered with `BinaryMask::to_raster`.
    pub fn read(&self, page: &Raster, label: &LabelBox, range: ValueRange) -> EngineResult<Option<LabelReading>> {
        let padding = self.config.padding;
        let (x, y) = (label.x0.saturating_sub(padding), label.y0.saturating_sub(padding));
        let crop = self.codec.extract(
            page,
            x,
            y,
            label.x1 + padding + 1 - x,
            label.y1 + padding + 1 - y,
        );
        let gray = self.codec.grayscale(&crop);
        let scaled = if gray.width() < self.config.target_width {
            let factor = self.config.target_width.div_ceil(gray.width().max(1));
            self.codec.resize(
                &gray,
                gray.width() * factor,
                gray.height() * factor,
                ResizeFilter::Bilinear,
            )
        } else {
            gray
        };
        let blurred = self.codec.blur(&scaled, self.config.blur_sigma);

        let mut best: Option<LabelReading> = None;
        for threshold in self.cutoffs() {
            let png = self.codec.encode(&self.codec.threshold(&blurred, threshold))?;
            for &psm in &self.config.psm_modes {
                let options = RecognizeOptions {
                    psm: Some(psm),
                    whitelist: Some(self.config.whitelist.clone()),
                    output: OutputFlags {
                        words: false,
                        lines: false,
                    },
                };
                let output = match self.pool.recognize(&self.key, png.clone(), options) {
                    Ok(output) => output,
                    Err(EngineError::Recognition(reason)) => {
                        debug!("OCR attempt (t={:?}, psm={}) failed: {}", threshold, psm, reason);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let parsed = parse_label_value(&output.text).filter(|v| range.contains(*v));
                debug!(
                    "Label at ({}, {}) t={:?} psm={}: {:?} -> {:?} ({:.1})",
                    label.x0, label.y0, threshold, psm, output.text, parsed, output.confidence
                );
                if let Some(value) = parsed {
                    if best.as_ref().map_or(true, |b| output.confidence > b.confidence) {
                        best = Some(LabelReading {
                            value,
                            raw: output.text.trim().to_string(),
                            confidence: output.confidence,
                            threshold,
                            psm,
                        });
                    }
                }
                if best
                    .as_ref()
                    .is_some_and(|b| b.confidence >= self.config.accept_confidence)
                {
                    return Ok(best);
                }
            }
        }
        Ok(best)
    }

    /// Attach readings to every box that yields one
    pub fn resolve(&self, mask: &BinaryMask, boxes: Vec<LabelBox>, range: ValueRange) -> EngineResult<Vec<LabelBox>> {
        let page = mask.to_raster();
        boxes
            .into_iter()
            .map(|mut label| {
                label.reading = self.read(&page, &label, range)?;
                Ok(label)
            })
            .collect()
    }
}
