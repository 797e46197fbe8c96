//! Tesseract TSV layout parsing
//!
//! Word rows (level 5) are grouped into lines by their
//! (page, block, paragraph, line) numbers and sorted into reading order.

use std::collections::HashMap;

use crate::ocr::{BoundingBox, OcrLine, OcrOutput, OcrWord};

type LineKey = (i32, i32, i32, i32);

/// Parse TSV output into words and lines
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut line_map: HashMap<LineKey, Vec<OcrWord>> = HashMap::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 && row.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let confidence: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let bbox = BoundingBox {
            x: cols[6].parse().unwrap_or(0),
            y: cols[7].parse().unwrap_or(0),
            width: cols[8].parse().unwrap_or(0),
            height: cols[9].parse().unwrap_or(0),
        };
        line_map.entry(key).or_default().push(OcrWord {
            text: text.to_string(),
            bbox,
            confidence,
        });
    }

    let mut lines: Vec<OcrLine> = line_map
        .into_values()
        .filter(|words| !words.is_empty())
        .map(|mut words| {
            words.sort_by_key(|w| (w.bbox.x, w.bbox.y));
            let bbox = words
                .iter()
                .skip(1)
                .fold(words[0].bbox, |acc, w| acc.union(&w.bbox));
            let confidence = mean(words.iter().map(|w| w.confidence));
            let text = words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            OcrLine {
                text,
                bbox,
                confidence,
                words,
            }
        })
        .collect();
    lines.sort_by_key(|l| (l.bbox.y, l.bbox.x));

    let words: Vec<OcrWord> = lines.iter().flat_map(|l| l.words.iter().cloned()).collect();
    let confidence = mean(words.iter().map(|w| w.confidence));
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    OcrOutput {
        text,
        confidence,
        words,
        lines,
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
