//! Run and bar detection
//!
//! Scans rows (or columns) for contiguous ink runs and stacks runs from
//! neighboring rows into bars. Thin bars are fraction bars and box edges;
//! anything thicker than `max_thickness` is a filled region and is dropped.

use serde::Serialize;
use tracing::debug;

use crate::config::BarConfig;
use crate::vision::mask::BinaryMask;

/// Bar orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Orientation {
    #[serde(rename = "H")]
    Horizontal,
    #[serde(rename = "V")]
    Vertical,
}

/// A maximal thin ink run after merging (inclusive pixel bounds)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub cx: f64,
    pub cy: f64,
    /// Extent along the bar
    pub len: u32,
    /// Extent across the bar
    pub thickness: u32,
    pub orientation: Orientation,
}

/// Inclusive run along a scan line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: u32,
    pub end: u32,
}

impl Run {
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Shared length as a fraction of the shorter run
    fn overlap_ratio(&self, other: &Run) -> f64 {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        if hi < lo {
            return 0.0;
        }
        (hi - lo + 1) as f64 / self.len().min(other.len()) as f64
    }
}

#[derive(Debug)]
struct OpenBar {
    start: u32,
    end: u32,
    first_line: u32,
    last_line: u32,
    last_run: Run,
}

/// Ink runs of at least `min_run` pixels on one row (horizontal) or column (vertical)
pub fn scan_runs(mask: &BinaryMask, orientation: Orientation, line: u32, min_run: u32) -> Vec<Run> {
    let along = match orientation {
        Orientation::Horizontal => mask.width(),
        Orientation::Vertical => mask.height(),
    };
    let ink = |pos: u32| match orientation {
        Orientation::Horizontal => mask.is_ink(pos as i64, line as i64),
        Orientation::Vertical => mask.is_ink(line as i64, pos as i64),
    };

    let mut runs = Vec::new();
    let mut start: Option<u32> = None;
    for pos in 0..along {
        match (ink(pos), start) {
            (true, None) => start = Some(pos),
            (false, Some(s)) => {
                if pos - s >= min_run.max(1) {
                    runs.push(Run { start: s, end: pos - 1 });
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if along - s >= min_run.max(1) {
            runs.push(Run { start: s, end: along - 1 });
        }
    }
    runs
}

/// Detect bars of one orientation
pub fn detect_bars(mask: &BinaryMask, orientation: Orientation, config: &BarConfig) -> Vec<Bar> {
    let lines = match orientation {
        Orientation::Horizontal => mask.height(),
        Orientation::Vertical => mask.width(),
    };

    let mut open: Vec<OpenBar> = Vec::new();
    let mut closed: Vec<OpenBar> = Vec::new();

    for line in 0..lines {
        let (stale, active): (Vec<OpenBar>, Vec<OpenBar>) = open
            .into_iter()
            .partition(|b| line - b.last_line - 1 > config.merge_tolerance);
        closed.extend(stale);
        open = active;

        for run in scan_runs(mask, orientation, line, config.min_run) {
            let mut best: Option<(usize, f64)> = None;
            for (idx, bar) in open.iter().enumerate() {
                if bar.last_line >= line {
                    continue;
                }
                let ratio = bar.last_run.overlap_ratio(&run);
                if ratio > config.overlap_ratio && best.map_or(true, |(_, r)| ratio > r) {
                    best = Some((idx, ratio));
                }
            }

            match best {
                Some((idx, _)) => {
                    let bar = &mut open[idx];
                    bar.start = bar.start.min(run.start);
                    bar.end = bar.end.max(run.end);
                    bar.last_line = line;
                    bar.last_run = run;
                }
                None => open.push(OpenBar {
                    start: run.start,
                    end: run.end,
                    first_line: line,
                    last_line: line,
                    last_run: run,
                }),
            }
        }
    }
    closed.extend(open);

    let mut bars: Vec<Bar> = closed
        .into_iter()
        .filter(|b| b.last_line - b.first_line + 1 <= config.max_thickness)
        .map(|b| to_bar(&b, orientation))
        .collect();
    bars.sort_by_key(|b| (b.y0, b.x0));

    debug!("Detected {} {:?} bars", bars.len(), orientation);
    bars
}

fn to_bar(open: &OpenBar, orientation: Orientation) -> Bar {
    let (x0, y0, x1, y1) = match orientation {
        Orientation::Horizontal => (open.start, open.first_line, open.end, open.last_line),
        Orientation::Vertical => (open.first_line, open.start, open.last_line, open.end),
    };
    Bar {
        x0,
        y0,
        x1,
        y1,
        cx: (x0 + x1) as f64 / 2.0,
        cy: (y0 + y1) as f64 / 2.0,
        len: open.end - open.start + 1,
        thickness: open.last_line - open.first_line + 1,
        orientation,
    }
}
