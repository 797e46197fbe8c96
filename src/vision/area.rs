//! Calibrated area from a traced boundary and numeric labels
//!
//! Cycles are split into straight segments, labels are matched to their
//! nearest segment, unlabeled segments borrow the median pixels-per-unit
//! of labeled ones, and the polygon is re-walked in unit space.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::vision::boundary::{shoelace, Boundary, BoundaryCycle, Vertex};
use crate::vision::labels::LabelBox;

/// Travel direction of a segment (image y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    R,
    L,
    U,
    D,
}

impl Direction {
    fn of_step(from: Vertex, to: Vertex) -> Option<Self> {
        match (to.0 - from.0, to.1 - from.1) {
            (dx, 0) if dx > 0 => Some(Direction::R),
            (dx, 0) if dx < 0 => Some(Direction::L),
            (0, dy) if dy < 0 => Some(Direction::U),
            (0, dy) if dy > 0 => Some(Direction::D),
            _ => None,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::R | Direction::L)
    }

    fn unit_vector(self) -> (f64, f64) {
        match self {
            Direction::R => (1.0, 0.0),
            Direction::L => (-1.0, 0.0),
            Direction::U => (0.0, -1.0),
            Direction::D => (0.0, 1.0),
        }
    }
}

/// A maximal straight run of a boundary cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// 0 is the outer cycle, then holes in order
    pub cycle: usize,
    pub dir: Direction,
    pub start: Vertex,
    pub end: Vertex,
    pub px_len: f64,
    pub unit_len: f64,
    /// OCR text of the label that calibrated this segment directly
    pub label_raw: Option<String>,
}

impl Segment {
    pub fn is_labeled(&self) -> bool {
        self.label_raw.is_some()
    }
}

/// Result of a calibrated area computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaMeasurement {
    pub area_px: f64,
    pub area_units: f64,
    /// Median pixels per unit across directly labeled segments
    pub px_per_unit: f64,
    pub cycles_detected: usize,
    pub holes: usize,
    pub segments: usize,
    pub labeled_segments: usize,
    pub labels_detected: usize,
    /// Area rounded to the nearest integer
    pub answer: String,
    #[serde(skip)]
    pub segment_details: Vec<Segment>,
}

/// Split a closed cycle into maximal straight segments
pub fn decompose_cycle(cycle: &BoundaryCycle, cycle_index: usize) -> EngineResult<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();
    for pair in cycle.vertices.windows(2) {
        let Some(dir) = Direction::of_step(pair[0], pair[1]) else {
            return Err(EngineError::Geometry(format!(
                "non-axis step {:?} -> {:?} in boundary cycle",
                pair[0], pair[1]
            )));
        };
        let len = ((pair[1].0 - pair[0].0).abs() + (pair[1].1 - pair[0].1).abs()) as f64;
        match segments.last_mut() {
            Some(last) if last.dir == dir => {
                last.end = pair[1];
                last.px_len += len;
            }
            _ => segments.push(Segment {
                cycle: cycle_index,
                dir,
                start: pair[0],
                end: pair[1],
                px_len: len,
                unit_len: 0.0,
                label_raw: None,
            }),
        }
    }

    // The walk may start mid-edge
    if segments.len() > 1 && segments[0].dir == segments[segments.len() - 1].dir {
        let first = segments.remove(0);
        if let Some(last) = segments.last_mut() {
            last.end = first.end;
            last.px_len += first.px_len;
        }
    }

    if segments.len() < 4 {
        return Err(EngineError::Geometry(format!(
            "boundary cycle decomposed into {} segments",
            segments.len()
        )));
    }
    Ok(segments)
}

/// Squared distance from a point to the segment `a`-`b`
pub fn point_segment_distance2(p: (f64, f64), a: Vertex, b: Vertex) -> f64 {
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (bx, by) = (b.0 as f64, b.1 as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - ax) * dx + (p.1 - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let (qx, qy) = (ax + t * dx, ay + t * dy);
    (p.0 - qx).powi(2) + (p.1 - qy).powi(2)
}

/// Median of a non-empty slice
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Claim labels for segments, nearest pair first. Each side is used once,
/// and pairs farther apart than `max_distance` px are never matched.
fn match_labels(segments: &mut [Segment], labels: &[(f64, f64, f64, &str)], max_distance: f64) -> Vec<Option<f64>> {
    let max_d2 = max_distance * max_distance;
    let mut pairs: Vec<(f64, usize, usize)> = Vec::with_capacity(segments.len() * labels.len());
    for (si, segment) in segments.iter().enumerate() {
        for (li, &(x, y, _, _)) in labels.iter().enumerate() {
            let d2 = point_segment_distance2((x, y), segment.start, segment.end);
            if d2 <= max_d2 {
                pairs.push((d2, si, li));
            }
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut values = vec![None; segments.len()];
    let mut claimed = vec![false; labels.len()];
    for (d2, si, li) in pairs {
        if values[si].is_some() || claimed[li] {
            continue;
        }
        let (_, _, value, raw) = labels[li];
        debug!("Label {:?} -> segment {} ({:?}, d²={:.1})", raw, si, segments[si].dir, d2);
        values[si] = Some(value);
        segments[si].label_raw = Some(raw.to_string());
        claimed[li] = true;
    }
    values
}

/// Compute the calibrated area of a boundary using resolved labels.
/// A label only calibrates a segment within `max_label_distance` px of
/// its center; `f64::INFINITY` lifts the limit.
pub fn measure_area(boundary: &Boundary, labels: &[LabelBox], max_label_distance: f64) -> EngineResult<AreaMeasurement> {
    let mut segments = Vec::new();
    for (index, cycle) in boundary.cycles().enumerate() {
        segments.extend(decompose_cycle(cycle, index)?);
    }

    // Label centers in lattice coordinates (pixel centers sit at +0.5)
    let readable: Vec<(f64, f64, f64, &str)> = labels
        .iter()
        .filter_map(|l| {
            l.reading
                .as_ref()
                .map(|r| (l.cx + 0.5, l.cy + 0.5, r.value, r.raw.as_str()))
        })
        .collect();
    let values = match_labels(&mut segments, &readable, max_label_distance);

    let mut horizontal = Vec::new();
    let mut vertical = Vec::new();
    for (segment, value) in segments.iter().zip(&values) {
        if let Some(value) = value {
            let ratio = segment.px_len / value;
            if segment.dir.is_horizontal() {
                horizontal.push(ratio);
            } else {
                vertical.push(ratio);
            }
        }
    }
    let all: Vec<f64> = horizontal.iter().chain(vertical.iter()).copied().collect();
    let Some(overall) = median(&all) else {
        return Err(EngineError::Calibration(format!(
            "no labeled segments ({} segments, {} readable labels)",
            segments.len(),
            readable.len()
        )));
    };
    let horizontal_ppu = median(&horizontal).unwrap_or(overall);
    let vertical_ppu = median(&vertical).unwrap_or(overall);
    debug!(
        "px/unit: horizontal {:.3}, vertical {:.3}, overall {:.3}",
        horizontal_ppu, vertical_ppu, overall
    );

    for (segment, value) in segments.iter_mut().zip(&values) {
        segment.unit_len = match value {
            Some(v) => *v,
            None if segment.dir.is_horizontal() => segment.px_len / horizontal_ppu,
            None => segment.px_len / vertical_ppu,
        };
    }

    let mut cycle_units = vec![0.0; boundary.holes.len() + 1];
    for (index, units) in cycle_units.iter_mut().enumerate() {
        let mut cursor = (0.0, 0.0);
        let mut points = vec![cursor];
        for segment in segments.iter().filter(|s| s.cycle == index) {
            let (ux, uy) = segment.dir.unit_vector();
            cursor = (cursor.0 + ux * segment.unit_len, cursor.1 + uy * segment.unit_len);
            points.push(cursor);
        }
        *units = shoelace(&points);
    }
    let area_units = cycle_units[0] - cycle_units[1..].iter().sum::<f64>();
    let labeled_segments = segments.iter().filter(|s| s.is_labeled()).count();

    info!(
        "Area: {:.3} units from {} segments ({} labeled), px/unit {:.3}",
        area_units,
        segments.len(),
        labeled_segments,
        overall
    );
    Ok(AreaMeasurement {
        area_px: boundary.area_px(),
        area_units,
        px_per_unit: overall,
        cycles_detected: boundary.cycles_detected,
        holes: boundary.holes.len(),
        segments: segments.len(),
        labeled_segments,
        labels_detected: readable.len(),
        answer: format!("{}", area_units.round() as i64),
        segment_details: segments,
    })
}
