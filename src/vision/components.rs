//! Connected-component labeling
//!
//! 8-connected breadth-first flood fill over a binary mask.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::vision::mask::BinaryMask;

/// One 8-connected ink blob (inclusive bounding box)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    pub area: usize,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub cx: f64,
    pub cy: f64,
}

impl Component {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0 + 1
    }

    /// Long side over short side of the bounding box
    pub fn aspect(&self) -> f64 {
        let (w, h) = (self.width() as f64, self.height() as f64);
        w.max(h) / w.min(h)
    }
}

/// Area and shape limits for plausible glyph or marker blobs
#[derive(Debug, Clone)]
pub struct ComponentFilter {
    pub min_area: usize,
    pub max_area: usize,
    pub max_aspect: f64,
}

impl ComponentFilter {
    pub fn accepts(&self, component: &Component) -> bool {
        component.area >= self.min_area
            && component.area <= self.max_area
            && component.aspect() <= self.max_aspect
    }

    pub fn apply(&self, components: Vec<Component>) -> Vec<Component> {
        let before = components.len();
        let kept: Vec<Component> = components.into_iter().filter(|c| self.accepts(c)).collect();
        debug!("Component filter kept {} of {}", kept.len(), before);
        kept
    }
}

const NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Label all 8-connected ink components in scan order
pub fn label_components(mask: &BinaryMask) -> Vec<Component> {
    let width = mask.width() as usize;
    let height = mask.height() as usize;
    let mut visited = vec![false; width * height];
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    let mut components = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if visited[idx] || !mask.is_ink(x as i64, y as i64) {
                continue;
            }

            visited[idx] = true;
            queue.push_back((x as i64, y as i64));

            let (mut x0, mut y0, mut x1, mut y1) = (x as i64, y as i64, x as i64, y as i64);
            let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
            let mut area = 0usize;

            while let Some((px, py)) = queue.pop_front() {
                area += 1;
                sum_x += px as f64;
                sum_y += py as f64;
                x0 = x0.min(px);
                y0 = y0.min(py);
                x1 = x1.max(px);
                y1 = y1.max(py);

                for (dx, dy) in NEIGHBORS {
                    let (nx, ny) = (px + dx, py + dy);
                    if !mask.is_ink(nx, ny) {
                        continue;
                    }
                    let nidx = ny as usize * width + nx as usize;
                    if !visited[nidx] {
                        visited[nidx] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            components.push(Component {
                area,
                x0: x0 as u32,
                y0: y0 as u32,
                x1: x1 as u32,
                y1: y1 as u32,
                cx: sum_x / area as f64,
                cy: sum_y / area as f64,
            });
        }
    }

    debug!("Labeled {} components", components.len());
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask() {
        assert!(label_components(&BinaryMask::new(8, 8)).is_empty());
    }

    #[test]
    fn test_disjoint_blobs_counted() {
        let mut mask = BinaryMask::new(64, 32);
        // 1x1, 3x2, 5x5, 2x7, separated by at least 2 background pixels
        mask.fill_rect(0, 0, 1, 1);
        mask.fill_rect(3, 0, 3, 2);
        mask.fill_rect(8, 4, 5, 5);
        mask.fill_rect(20, 10, 2, 7);
        let mut n = 4;
        for i in 0..6u32 {
            mask.fill_rect(30 + i * 5, 25, 3, 3);
            n += 1;
        }
        assert_eq!(label_components(&mask).len(), n);
    }

    #[test]
    fn test_diagonal_pixels_join() {
        let mut mask = BinaryMask::new(5, 5);
        mask.set_ink(1, 1);
        mask.set_ink(2, 2);
        mask.set_ink(3, 3);
        let components = label_components(&mask);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area, 3);
    }

    #[test]
    fn test_area_and_bbox() {
        let mut mask = BinaryMask::new(20, 20);
        mask.fill_rect(4, 6, 5, 3);
        mask.set_ink(9, 9);
        let components = label_components(&mask);
        assert_eq!(components.len(), 1);
        let c = &components[0];
        assert_eq!(c.area, 16);
        assert_eq!((c.x0, c.y0, c.x1, c.y1), (4, 6, 9, 9));
        assert_eq!(c.width(), 6);
        assert_eq!(c.height(), 4);
    }

    #[test]
    fn test_filter_by_area_and_aspect() {
        let mut mask = BinaryMask::new(100, 20);
        mask.set_ink(1, 1);
        mask.fill_rect(10, 2, 6, 8);
        mask.fill_rect(30, 5, 60, 2);
        let filter = ComponentFilter {
            min_area: 4,
            max_area: 500,
            max_aspect: 8.0,
        };
        let kept = filter.apply(label_components(&mask));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].x0, 10);
    }
}
