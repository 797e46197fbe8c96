//! Stacked fractions on dark-ink worksheets
//!
//! Thin horizontal bars are fraction bars when they form a component of
//! their own. A bar whose ends are joined by a vertical bar to another
//! horizontal bar is an edge of an answer box instead, and a bar inside a
//! larger component is a glyph stroke (the top of a "7"). Glyphs stacked
//! directly above and below a fraction bar are read as numerator and
//! denominator.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::FractionConfig;
use crate::error::{EngineError, EngineResult};
use crate::tools::{ImageArgs, ToolContext};
use crate::vision::labels::glyph_filter;
use crate::vision::{
    detect_bars, label_components, load_raster, BinaryMask, Bar, Component, LabelBox, MarkerColor, Orientation,
    ValueRange,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fraction {
    pub numerator: f64,
    pub denominator: f64,
    pub value: f64,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FractionBarsOutput {
    pub width: u32,
    pub height: u32,
    pub bars_detected: usize,
    pub box_edges_skipped: usize,
    pub fractions: Vec<Fraction>,
    pub answer: String,
}

fn within(value: u32, lo: u32, hi: u32, tolerance: u32) -> bool {
    value + tolerance >= lo && value <= hi + tolerance
}

/// The vertical bar covers the rows of the horizontal bar at one of its ends
fn meets_end(bar: &Bar, v: &Bar, tolerance: u32) -> bool {
    let spans_row = within(bar.y0, v.y0, v.y1, tolerance) && within(bar.y1, v.y0, v.y1, tolerance);
    let at_end = within(bar.x0, v.x0, v.x1, tolerance) || within(bar.x1, v.x0, v.x1, tolerance);
    spans_row && at_end
}

/// A vertical bar at one end of `bar` runs on to another horizontal bar
pub fn is_box_edge(bar: &Bar, verticals: &[Bar], horizontals: &[Bar], tolerance: u32) -> bool {
    let at_top = |h: &Bar, v: &Bar| within(v.y0, h.y0, h.y1, tolerance);
    let at_bottom = |h: &Bar, v: &Bar| within(v.y1, h.y0, h.y1, tolerance);
    verticals.iter().filter(|v| meets_end(bar, v, tolerance)).any(|v| {
        horizontals.iter().any(|other| {
            other != bar
                && meets_end(other, v, tolerance)
                && ((at_top(bar, v) && at_bottom(other, v)) || (at_bottom(bar, v) && at_top(other, v)))
        })
    })
}

/// The component lies within the bar, so the bar is all of it
fn is_whole_component(c: &Component, b: &Bar, tolerance: u32) -> bool {
    overlaps(c, b)
        && c.x0 + tolerance >= b.x0
        && c.x1 <= b.x1 + tolerance
        && c.y0 + tolerance >= b.y0
        && c.y1 <= b.y1 + tolerance
}

fn overlaps(c: &Component, b: &Bar) -> bool {
    c.x0 <= b.x1 && b.x0 <= c.x1 && c.y0 <= b.y1 && b.y0 <= c.y1
}

fn over_bar(c: &Component, bar: &Bar, config: &FractionConfig) -> bool {
    c.cx + config.x_slack as f64 >= bar.x0 as f64 && c.cx <= (bar.x1 + config.x_slack) as f64
}

/// Glyphs directly above and below a bar
fn stacked<'a>(bar: &Bar, glyphs: &'a [Component], config: &FractionConfig) -> (Vec<&'a Component>, Vec<&'a Component>) {
    let above = glyphs
        .iter()
        .filter(|c| over_bar(c, bar, config) && c.y1 < bar.y0 && bar.y0 - c.y1 - 1 <= config.stack_gap)
        .collect();
    let below = glyphs
        .iter()
        .filter(|c| over_bar(c, bar, config) && c.y0 > bar.y1 && c.y0 - bar.y1 - 1 <= config.stack_gap)
        .collect();
    (above, below)
}

/// Read every stacked fraction on a dark-ink worksheet
pub fn solve_fraction_bars(ctx: &ToolContext, args: &ImageArgs) -> EngineResult<FractionBarsOutput> {
    let config = &ctx.config;
    let loaded = load_raster(ctx.codec.as_ref(), &args.path, &ctx.image_config(args.max_pixels))?;
    let mask = BinaryMask::for_marker(&loaded.raster, MarkerColor::Dark, &config.colors);
    if mask.is_empty() {
        return Err(EngineError::NotFound("no dark ink detected".to_string()));
    }

    let horizontal = detect_bars(&mask, Orientation::Horizontal, &config.bars);
    let vertical = detect_bars(&mask, Orientation::Vertical, &config.bars);
    let tolerance = config.fractions.box_edge_tolerance;
    let (edges, others): (Vec<&Bar>, Vec<&Bar>) = horizontal
        .iter()
        .partition(|b| is_box_edge(b, &vertical, &horizontal, tolerance));
    let box_sides: Vec<&Bar> = vertical
        .iter()
        .filter(|v| edges.iter().any(|e| meets_end(e, v, tolerance)))
        .collect();

    let components = label_components(&mask);
    let (fraction_bars, strokes): (Vec<&Bar>, Vec<&Bar>) = others
        .into_iter()
        .partition(|b| components.iter().any(|c| is_whole_component(c, b, tolerance)));
    if !strokes.is_empty() {
        debug!("{} horizontal bars are glyph strokes", strokes.len());
    }

    // Digit strokes are bars too; only rules and box outlines are excluded
    let rules: Vec<&Bar> = fraction_bars.iter().chain(&edges).chain(&box_sides).copied().collect();
    let glyphs: Vec<Component> = glyph_filter(&config.labels)
        .apply(components)
        .into_iter()
        .filter(|c| !rules.iter().any(|b| overlaps(c, b)))
        .collect();
    info!(
        "{} horizontal bars ({} box edges), {} glyphs",
        horizontal.len(),
        edges.len(),
        glyphs.len()
    );

    let reader = ctx.label_reader(ctx.worker_key(args));
    let page = mask.to_raster();
    let mut fractions = Vec::new();
    for bar in fraction_bars {
        let (above, below) = stacked(bar, &glyphs, &config.fractions);
        let (Some(top), Some(bottom)) = (LabelBox::from_components(above), LabelBox::from_components(below)) else {
            debug!("Bar at ({}, {}) has no stacked glyphs", bar.x0, bar.y0);
            continue;
        };
        let numerator = reader.read(&page, &top, ValueRange::any())?;
        let denominator = reader.read(&page, &bottom, ValueRange::any())?;
        let (Some(numerator), Some(denominator)) = (numerator, denominator) else {
            debug!("Bar at ({}, {}) has unreadable glyphs", bar.x0, bar.y0);
            continue;
        };
        if denominator.value == 0.0 {
            debug!("Bar at ({}, {}) has a zero denominator", bar.x0, bar.y0);
            continue;
        }
        fractions.push(Fraction {
            numerator: numerator.value,
            denominator: denominator.value,
            value: numerator.value / denominator.value,
            x0: bar.x0.min(top.x0).min(bottom.x0),
            y0: top.y0,
            x1: bar.x1.max(top.x1).max(bottom.x1),
            y1: bottom.y1,
        });
    }

    if fractions.is_empty() {
        return Err(EngineError::NotFound(
            "no fraction bar with a readable numerator and denominator".to_string(),
        ));
    }
    fractions.sort_by_key(|f| (f.y0, f.x0));
    let answer = fractions
        .iter()
        .map(|f| format!("{}/{}", f.numerator, f.denominator))
        .collect::<Vec<_>>()
        .join(", ");

    let (width, height) = loaded.source_dimensions;
    Ok(FractionBarsOutput {
        width,
        height,
        bars_detected: horizontal.len(),
        box_edges_skipped: edges.len(),
        fractions,
        answer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::{ink_aspect_value, stroke_digit, ScriptedBackend};
    use crate::tools::test_support::*;
    use tempfile::tempdir;

    const INK: [u8; 4] = [0, 0, 0, 255];

    fn bar(x0: u32, y0: u32, x1: u32, y1: u32, orientation: Orientation) -> Bar {
        Bar {
            x0,
            y0,
            x1,
            y1,
            cx: (x0 + x1) as f64 / 2.0,
            cy: (y0 + y1) as f64 / 2.0,
            len: 0,
            thickness: 0,
            orientation,
        }
    }

    #[test]
    fn test_box_edge_detection() {
        let top = bar(100, 20, 139, 21, Orientation::Horizontal);
        let bottom = bar(100, 48, 139, 49, Orientation::Horizontal);
        let left = bar(100, 20, 101, 49, Orientation::Vertical);
        let far = bar(200, 20, 201, 49, Orientation::Vertical);
        let horizontals = [top.clone(), bottom.clone()];
        assert!(is_box_edge(&top, &[left.clone()], &horizontals, 2));
        assert!(is_box_edge(&bottom, &[left.clone()], &horizontals, 2));
        assert!(!is_box_edge(&top, &[far], &horizontals, 2));
        let loose = bar(10, 80, 40, 81, Orientation::Horizontal);
        assert!(!is_box_edge(&loose, &[left.clone()], &horizontals, 2));
        // A single corner, like the top of a "7", closes no box
        assert!(!is_box_edge(&top, &[left], &[top.clone()], 2));
    }

    fn worksheet() -> image::RgbaImage {
        let mut image = white(200, 90);
        // 1/2: square numerator, 2:1 denominator
        fill(&mut image, 20, 40, 30, 2, INK);
        fill(&mut image, 30, 24, 10, 10, INK);
        fill(&mut image, 25, 48, 20, 10, INK);
        // 3/1 further right
        fill(&mut image, 60, 40, 36, 2, INK);
        fill(&mut image, 63, 24, 30, 10, INK);
        fill(&mut image, 73, 48, 10, 10, INK);
        // Empty answer box
        fill(&mut image, 120, 20, 40, 2, INK);
        fill(&mut image, 120, 48, 40, 2, INK);
        fill(&mut image, 120, 20, 2, 30, INK);
        fill(&mut image, 158, 20, 2, 30, INK);
        image
    }

    #[test]
    fn test_fractions_from_image() {
        let dir = tempdir().unwrap();
        let path = save(dir.path(), "fractions.png", &worksheet());
        let ctx = context(ScriptedBackend::new(|img, _| ink_aspect_value(img).map(|v| (v, 95.0))));

        let out = solve_fraction_bars(&ctx, &image_args(&path)).unwrap();
        assert_eq!(out.bars_detected, 4);
        assert_eq!(out.box_edges_skipped, 2);
        assert_eq!(out.fractions.len(), 2);
        assert_eq!(out.fractions[0].numerator, 1.0);
        assert_eq!(out.fractions[0].denominator, 2.0);
        assert_eq!(out.fractions[0].value, 0.5);
        assert_eq!(out.answer, "1/2, 3/1");
    }

    #[test]
    fn test_box_only_is_not_found() {
        let dir = tempdir().unwrap();
        let mut image = white(100, 60);
        fill(&mut image, 20, 10, 40, 2, INK);
        fill(&mut image, 20, 38, 40, 2, INK);
        fill(&mut image, 20, 10, 2, 30, INK);
        fill(&mut image, 58, 10, 2, 30, INK);
        let path = save(dir.path(), "box.png", &image);
        let ctx = context(ScriptedBackend::new(|img, _| ink_aspect_value(img).map(|v| (v, 95.0))));

        let err = solve_fraction_bars(&ctx, &image_args(&path)).unwrap_err();
        assert_eq!(err.kind(), "NotFoundError");
    }

    #[test]
    fn test_stroke_digits_are_kept() {
        let dir = tempdir().unwrap();
        let mut image = white(120, 80);
        fill(&mut image, 20, 40, 30, 2, INK);
        // "1" is a single vertical stroke
        fill(&mut image, 33, 22, 3, 12, INK);
        // "7" is a top stroke and a stem meeting at a corner
        fill(&mut image, 29, 48, 12, 2, INK);
        fill(&mut image, 39, 48, 2, 13, INK);
        let path = save(dir.path(), "strokes.png", &image);
        let ctx = context(ScriptedBackend::new(|img, _| stroke_digit(img).map(|v| (v, 95.0))));

        let out = solve_fraction_bars(&ctx, &image_args(&path)).unwrap();
        assert_eq!(out.bars_detected, 2);
        assert_eq!(out.box_edges_skipped, 0);
        assert_eq!(out.fractions.len(), 1);
        assert_eq!(out.answer, "1/7");
    }
}
