//! Polygon boundary tracing
//!
//! Boundary edges live on the pixel-corner lattice (`width + 1` by
//! `height + 1` vertices). Every side of an ink pixel that faces
//! background or the image edge contributes one unit edge, directed so
//! the ink lies on its right (clockwise around ink in image coordinates).
//! Each vertex has as many outgoing as incoming edges, so following
//! unvisited outgoing edges from any start closes back on the start.
//!
//! Where two ink pixels touch only at a corner the vertex has two
//! outgoing edges. The walk always takes the left turn there, which keeps
//! diagonally touching ink in one loop (matching 8-connected components)
//! and keeps every loop in a single orientation so shoelace sums add up.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::TracerConfig;
use crate::error::{EngineError, EngineResult};
use crate::vision::mask::BinaryMask;

/// A lattice vertex (pixel corner) in image coordinates
pub type Vertex = (i64, i64);

/// A closed lattice path. `vertices` repeats the first vertex at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryCycle {
    pub vertices: Vec<Vertex>,
    /// Enclosed area in px² (shoelace)
    pub area_px: f64,
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl BoundaryCycle {
    fn from_vertices(vertices: Vec<Vertex>) -> Self {
        let (mut x0, mut y0, mut x1, mut y1) = (i64::MAX, i64::MAX, i64::MIN, i64::MIN);
        for &(x, y) in &vertices {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let points: Vec<(f64, f64)> = vertices.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
        let area_px = shoelace(&points);
        Self {
            vertices,
            area_px,
            x0,
            y0,
            x1,
            y1,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.vertices.len().saturating_sub(1)
    }

    /// Bounding box lies strictly inside `other` on all four sides
    pub fn is_strictly_inside(&self, other: &BoundaryCycle) -> bool {
        self.x0 > other.x0 && self.y0 > other.y0 && self.x1 < other.x1 && self.y1 < other.y1
    }
}

/// Outer boundary plus the holes to subtract from it
#[derive(Debug, Clone)]
pub struct Boundary {
    pub outer: BoundaryCycle,
    pub holes: Vec<BoundaryCycle>,
    /// Cycles that passed the noise filters
    pub cycles_detected: usize,
}

impl Boundary {
    /// Outer area minus hole areas, px²
    pub fn area_px(&self) -> f64 {
        self.outer.area_px - self.holes.iter().map(|h| h.area_px).sum::<f64>()
    }

    /// Outer first, then holes
    pub fn cycles(&self) -> impl Iterator<Item = &BoundaryCycle> {
        std::iter::once(&self.outer).chain(self.holes.iter())
    }
}

/// `|Σ(x_i·y_{i+1} − x_{i+1}·y_i)| / 2` over a closed or open vertex list
pub fn shoelace(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..points.len() {
        let (xa, ya) = points[i];
        let (xb, yb) = points[(i + 1) % points.len()];
        twice += xa * yb - xb * ya;
    }
    twice.abs() / 2.0
}

struct LatticeGraph {
    vert_w: i64,
    edges: Vec<(i64, i64)>,
    /// Edge indices leaving each vertex
    outgoing: HashMap<i64, Vec<usize>>,
}

impl LatticeGraph {
    fn build(mask: &BinaryMask) -> Self {
        let vert_w = mask.width() as i64 + 1;
        let mut graph = LatticeGraph {
            vert_w,
            edges: Vec::new(),
            outgoing: HashMap::new(),
        };

        for y in 0..mask.height() as i64 {
            for x in 0..mask.width() as i64 {
                if !mask.is_ink(x, y) {
                    continue;
                }
                if !mask.is_ink(x, y - 1) {
                    graph.add_edge((x, y), (x + 1, y));
                }
                if !mask.is_ink(x + 1, y) {
                    graph.add_edge((x + 1, y), (x + 1, y + 1));
                }
                if !mask.is_ink(x, y + 1) {
                    graph.add_edge((x + 1, y + 1), (x, y + 1));
                }
                if !mask.is_ink(x - 1, y) {
                    graph.add_edge((x, y + 1), (x, y));
                }
            }
        }
        graph
    }

    fn id(&self, (x, y): Vertex) -> i64 {
        y * self.vert_w + x
    }

    fn vertex(&self, id: i64) -> Vertex {
        (id % self.vert_w, id / self.vert_w)
    }

    fn add_edge(&mut self, from: Vertex, to: Vertex) {
        let (ia, ib) = (self.id(from), self.id(to));
        let index = self.edges.len();
        self.edges.push((ia, ib));
        self.outgoing.entry(ia).or_default().push(index);
    }

    fn heading(&self, edge: usize) -> (i64, i64) {
        let (a, b) = self.edges[edge];
        step(self.vertex(a), self.vertex(b))
    }

    /// Walk unvisited outgoing edges from `start` until the path closes
    fn follow(&self, start: usize, visited: &mut [bool]) -> Vec<Vertex> {
        let (origin, mut current) = self.edges[start];
        visited[start] = true;
        let mut path = vec![self.vertex(origin), self.vertex(current)];
        let mut heading = self.heading(start);

        while current != origin {
            let candidates: Vec<usize> = self
                .outgoing
                .get(&current)
                .map(|list| list.iter().copied().filter(|&e| !visited[e]).collect())
                .unwrap_or_default();

            // Left turn, then straight, then right
            let (dx, dy) = heading;
            let next = [(dy, -dx), (dx, dy), (-dy, dx)]
                .into_iter()
                .find_map(|turn| candidates.iter().copied().find(|&e| self.heading(e) == turn));

            let Some(edge) = next else {
                // Unreachable for a balanced lattice; close what we have
                break;
            };
            visited[edge] = true;
            heading = self.heading(edge);
            current = self.edges[edge].1;
            path.push(self.vertex(current));
        }
        path
    }
}

fn step(from: Vertex, to: Vertex) -> (i64, i64) {
    (to.0 - from.0, to.1 - from.1)
}

/// Every closed boundary walk in the mask, unfiltered, in scan order
pub fn extract_cycles(mask: &BinaryMask) -> Vec<BoundaryCycle> {
    let graph = LatticeGraph::build(mask);
    let mut visited = vec![false; graph.edges.len()];
    let mut cycles = Vec::new();

    for start in 0..graph.edges.len() {
        if visited[start] {
            continue;
        }
        cycles.push(BoundaryCycle::from_vertices(graph.follow(start, &mut visited)));
    }
    debug!(
        "Traced {} boundary edges into {} cycles",
        graph.edges.len(),
        cycles.len()
    );
    cycles
}

/// Trace the mask and split its cycles into the outer boundary and holes
pub fn trace_boundary(mask: &BinaryMask, config: &TracerConfig) -> EngineResult<Boundary> {
    if mask.is_empty() {
        return Err(EngineError::NotFound("no ink region detected".to_string()));
    }

    let mut cycles: Vec<BoundaryCycle> = extract_cycles(mask)
        .into_iter()
        .filter(|c| c.edge_count() >= 4 && c.area_px >= config.min_cycle_area_px)
        .collect();
    if cycles.is_empty() {
        return Err(EngineError::Geometry(
            "no valid boundary cycles after filtering".to_string(),
        ));
    }
    let cycles_detected = cycles.len();

    // Largest area wins; earliest cycle on ties
    let outer_index = cycles
        .iter()
        .enumerate()
        .fold(0, |best, (i, c)| if c.area_px > cycles[best].area_px { i } else { best });
    let outer = cycles.swap_remove(outer_index);
    let (holes, ignored): (Vec<_>, Vec<_>) = cycles.into_iter().partition(|c| c.is_strictly_inside(&outer));

    info!(
        "Boundary: outer {} px² ({} edges), {} holes, {} other cycles ignored",
        outer.area_px,
        outer.edge_count(),
        holes.len(),
        ignored.len()
    );
    Ok(Boundary {
        outer,
        holes,
        cycles_detected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_floor() -> TracerConfig {
        TracerConfig {
            min_cycle_area_px: 0.0,
            ..Default::default()
        }
    }

    fn rect_mask(w: u32, h: u32) -> BinaryMask {
        let mut mask = BinaryMask::new(w + 4, h + 4);
        mask.fill_rect(2, 2, w, h);
        mask
    }

    #[test]
    fn test_rectangle_area_is_exact() {
        for &(w, h) in &[(1, 1), (1, 7), (9, 1), (3, 5), (40, 30), (123, 77), (500, 500)] {
            let boundary = trace_boundary(&rect_mask(w, h), &no_floor()).unwrap();
            assert_eq!(boundary.cycles_detected, 1, "{}x{}", w, h);
            assert_eq!(boundary.outer.area_px, (w * h) as f64, "{}x{}", w, h);
            assert!(boundary.holes.is_empty());
        }
    }

    #[test]
    fn test_cycle_is_closed() {
        let boundary = trace_boundary(&rect_mask(3, 2), &no_floor()).unwrap();
        let vertices = &boundary.outer.vertices;
        assert_eq!(vertices.first(), vertices.last());
        assert_eq!(boundary.outer.edge_count(), 10);
        assert_eq!((boundary.outer.x0, boundary.outer.y0), (2, 2));
        assert_eq!((boundary.outer.x1, boundary.outer.y1), (5, 4));
    }

    #[test]
    fn test_hole_is_subtracted() {
        let mut mask = rect_mask(20, 16);
        mask.clear_rect(8, 6, 5, 4);
        let boundary = trace_boundary(&mask, &no_floor()).unwrap();
        assert_eq!(boundary.cycles_detected, 2);
        assert_eq!(boundary.holes.len(), 1);
        assert_eq!(boundary.outer.area_px, 320.0);
        assert_eq!(boundary.holes[0].area_px, 20.0);
        assert_eq!(boundary.area_px(), 300.0);
    }

    #[test]
    fn test_separate_blob_is_not_a_hole() {
        let mut mask = BinaryMask::new(60, 30);
        mask.fill_rect(2, 2, 20, 20);
        mask.fill_rect(40, 5, 5, 5);
        let boundary = trace_boundary(&mask, &no_floor()).unwrap();
        assert_eq!(boundary.cycles_detected, 2);
        assert_eq!(boundary.outer.area_px, 400.0);
        assert!(boundary.holes.is_empty());
    }

    #[test]
    fn test_noise_floor_filters_specks() {
        let mut mask = BinaryMask::new(10, 10);
        mask.set_ink(4, 4);
        let err = trace_boundary(&mask, &TracerConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "GeometryError");
    }

    #[test]
    fn test_empty_mask_is_not_found() {
        let err = trace_boundary(&BinaryMask::new(8, 8), &no_floor()).unwrap_err();
        assert_eq!(err.kind(), "NotFoundError");
        assert_eq!(err.to_string(), "no ink region detected");
    }

    #[test]
    fn test_staircase_area() {
        // Right triangle drawn as rows of decreasing length
        let mut mask = BinaryMask::new(12, 12);
        for row in 0..8u32 {
            mask.fill_rect(1, 1 + row, row + 1, 1);
        }
        let boundary = trace_boundary(&mask, &no_floor()).unwrap();
        assert_eq!(boundary.outer.area_px, 36.0);
    }

    #[test]
    fn test_shoelace_square() {
        assert_eq!(shoelace(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]), 16.0);
        assert_eq!(shoelace(&[(0.0, 0.0), (1.0, 0.0)]), 0.0);
    }

    #[test]
    fn test_corner_touching_squares_stay_one_loop() {
        let mut mask = BinaryMask::new(12, 12);
        mask.fill_rect(0, 0, 5, 5);
        mask.fill_rect(5, 5, 5, 5);

        let cycles = extract_cycles(&mask);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].edge_count(), 40);
        assert_eq!(cycles[0].area_px, 50.0);

        let boundary = trace_boundary(&mask, &TracerConfig::default()).unwrap();
        assert_eq!(boundary.area_px(), 50.0);
    }

    #[test]
    fn test_hole_pinched_at_corner() {
        // 3x3 hole with a one-pixel gap touching its lower-right corner
        let mut mask = BinaryMask::new(10, 10);
        mask.fill_rect(0, 0, 10, 10);
        mask.clear_rect(3, 3, 3, 3);
        mask.clear_rect(6, 6, 1, 1);

        let boundary = trace_boundary(&mask, &no_floor()).unwrap();
        assert_eq!(boundary.outer.area_px, 100.0);
        let mut holes: Vec<f64> = boundary.holes.iter().map(|h| h.area_px).collect();
        holes.sort_by(f64::total_cmp);
        assert_eq!(holes, vec![1.0, 9.0]);
        assert_eq!(boundary.area_px(), 90.0);
    }

    #[test]
    fn test_gap_pinched_to_the_outside() {
        // Corner notch touching an interior gap only at a vertex
        let mut mask = BinaryMask::new(8, 8);
        mask.fill_rect(0, 0, 6, 6);
        mask.clear_rect(4, 4, 1, 1);
        mask.clear_rect(5, 5, 1, 1);

        let boundary = trace_boundary(&mask, &no_floor()).unwrap();
        assert_eq!(boundary.outer.area_px, 35.0);
        assert_eq!(boundary.holes.len(), 1);
        assert_eq!(boundary.area_px(), 34.0);
    }
}
