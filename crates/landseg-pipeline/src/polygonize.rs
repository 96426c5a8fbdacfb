//! Raster-to-vector tracing of labelled regions.
//!
//! Each maximal 4-connected region of one non-zero value becomes a
//! polygon whose vertices lie on the pixel-corner lattice. Boundaries
//! are assembled from unit pixel edges oriented with the region on their
//! right (screen coordinates, rows growing downward), so exteriors have
//! positive and holes negative shoelace area.
//!
//! Where a region touches itself diagonally, the walk turns toward the
//! current pixel first. That keeps the foreground 4-connected and lets
//! the background pass through the diagonal; the resulting
//! self-touching ring is split into a shell and a hole that share one
//! vertex.

use std::collections::{HashMap, HashSet};

use geo::{Contains, Coord, LineString, Polygon};
use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{Dimensions, GeoTransform, LabelRaster};

/// A pixel-corner coordinate `(x, y)`.
pub type Vertex = (u32, u32);

/// One traced region in pixel-corner coordinates.
///
/// Rings are open (the first vertex is not repeated) and contain only
/// corner vertices; collinear runs are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedRegion {
    /// Label value shared by every pixel of the region.
    pub value: u32,
    /// Outer boundary.
    pub exterior: Vec<Vertex>,
    /// Inner boundaries.
    pub holes: Vec<Vec<Vertex>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Heading {
    East,
    South,
    West,
    North,
}

impl Heading {
    /// Clockwise on screen.
    const fn right(self) -> Self {
        match self {
            Self::East => Self::South,
            Self::South => Self::West,
            Self::West => Self::North,
            Self::North => Self::East,
        }
    }

    const fn left(self) -> Self {
        match self {
            Self::East => Self::North,
            Self::North => Self::West,
            Self::West => Self::South,
            Self::South => Self::East,
        }
    }
}

/// A unit boundary edge starting at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Edge {
    x: u32,
    y: u32,
    heading: Heading,
}

impl Edge {
    const fn end(self) -> Vertex {
        match self.heading {
            Heading::East => (self.x + 1, self.y),
            Heading::South => (self.x, self.y + 1),
            Heading::West => (self.x - 1, self.y),
            Heading::North => (self.x, self.y - 1),
        }
    }
}

/// Trace every non-zero region of `raster` in pixel-corner coordinates.
///
/// Regions are returned in raster scan order of their first pixel.
#[must_use]
pub fn trace_regions(raster: &LabelRaster) -> Vec<TracedRegion> {
    let Dimensions { width, height } = raster.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    // `connected_components` needs at least one background pixel, so the
    // labels sit inside a one-pixel border of zeros.
    let padded = ImageBuffer::<Luma<u32>, Vec<u32>>::from_fn(width + 2, height + 2, |x, y| {
        match (x.checked_sub(1), y.checked_sub(1)) {
            (Some(x), Some(y)) => Luma([raster.get(x, y).unwrap_or(0)]),
            _ => Luma([0]),
        }
    });
    let components = connected_components(&padded, Connectivity::Four, Luma([0]));

    // Component of raster pixel `(x, y)`; the border reads as background.
    let component_at = |x: i64, y: i64| -> u32 {
        match (u32::try_from(x + 1), u32::try_from(y + 1)) {
            (Ok(px), Ok(py)) => components.get_pixel(px, py)[0],
            _ => 0,
        }
    };

    let mut slots: HashMap<u32, usize> = HashMap::new();
    let mut boundaries: Vec<(u32, Vec<Edge>)> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (i64::from(x), i64::from(y));
            let component = component_at(xi, yi);
            if component == 0 {
                continue;
            }
            let slot = *slots.entry(component).or_insert_with(|| {
                boundaries.push((raster.get(x, y).unwrap_or(0), Vec::new()));
                boundaries.len() - 1
            });
            let edges = &mut boundaries[slot].1;

            if component_at(xi, yi - 1) != component {
                edges.push(Edge {
                    x,
                    y,
                    heading: Heading::East,
                });
            }
            if component_at(xi + 1, yi) != component {
                edges.push(Edge {
                    x: x + 1,
                    y,
                    heading: Heading::South,
                });
            }
            if component_at(xi, yi + 1) != component {
                edges.push(Edge {
                    x: x + 1,
                    y: y + 1,
                    heading: Heading::West,
                });
            }
            if component_at(xi - 1, yi) != component {
                edges.push(Edge {
                    x,
                    y: y + 1,
                    heading: Heading::North,
                });
            }
        }
    }

    boundaries
        .into_iter()
        .flat_map(|(value, edges)| assemble_region(value, &edges))
        .collect()
}

/// Trace `raster` and map the rings into CRS coordinates through the
/// raster's transform.
///
/// Returns `(polygon, value)` pairs in raster scan order.
#[must_use]
pub fn polygonize(raster: &LabelRaster) -> Vec<(Polygon<f64>, u32)> {
    let transform = raster.georef.transform;
    trace_regions(raster)
        .into_iter()
        .map(|region| (to_polygon(&region, &transform), region.value))
        .collect()
}

/// Convert a traced region into a `geo` polygon in CRS coordinates.
#[must_use]
pub fn to_polygon(region: &TracedRegion, transform: &GeoTransform) -> Polygon<f64> {
    let ring = |vertices: &[Vertex]| -> LineString<f64> {
        vertices
            .iter()
            .map(|&(x, y)| {
                let (cx, cy) = transform.apply(f64::from(x), f64::from(y));
                Coord { x: cx, y: cy }
            })
            .collect()
    };
    Polygon::new(
        ring(&region.exterior),
        region.holes.iter().map(|h| ring(h)).collect(),
    )
}

/// Link one component's boundary edges into shells and holes.
fn assemble_region(value: u32, edges: &[Edge]) -> Vec<TracedRegion> {
    let mut shells = Vec::new();
    let mut holes = Vec::new();
    for ring in link_rings(edges).into_iter().flat_map(split_at_pinches) {
        match signed_area2(&ring) {
            a if a > 0 => shells.push(ring),
            a if a < 0 => holes.push(ring),
            _ => {}
        }
    }

    let mut regions: Vec<TracedRegion> = shells
        .into_iter()
        .map(|exterior| TracedRegion {
            value,
            exterior,
            holes: Vec::new(),
        })
        .collect();

    if regions.len() == 1 {
        regions[0].holes = holes;
        return regions;
    }

    for hole in holes {
        let sample = interior_sample(&hole);
        let owner = regions
            .iter()
            .position(|r| pixel_polygon(&r.exterior).contains(&sample))
            .unwrap_or(0);
        if let Some(region) = regions.get_mut(owner) {
            region.holes.push(hole);
        }
    }
    regions
}

/// Follow successor edges until every edge belongs to a closed ring.
///
/// Only corner vertices are recorded.
fn link_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let all: HashSet<Edge> = edges.iter().copied().collect();
    let mut used: HashSet<Edge> = HashSet::with_capacity(edges.len());
    let mut rings = Vec::new();

    for &first in edges {
        if used.contains(&first) {
            continue;
        }
        let mut ring = Vec::new();
        let mut edge = first;
        loop {
            used.insert(edge);
            let Some(next) = successor(&all, edge) else {
                break;
            };
            if next.heading != edge.heading {
                ring.push(edge.end());
            }
            if next == first || used.contains(&next) {
                break;
            }
            edge = next;
        }
        rings.push(ring);
    }
    rings
}

/// The edge that continues the ring after `edge`: right turn first,
/// then straight, then left.
fn successor(all: &HashSet<Edge>, edge: Edge) -> Option<Edge> {
    let (x, y) = edge.end();
    [edge.heading.right(), edge.heading, edge.heading.left()]
        .into_iter()
        .map(|heading| Edge { x, y, heading })
        .find(|candidate| all.contains(candidate))
}

/// Cut a ring that visits a vertex twice into simple rings.
fn split_at_pinches(ring: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut loops = Vec::new();
    let mut stack: Vec<Vertex> = Vec::with_capacity(ring.len());
    let mut positions: HashMap<Vertex, usize> = HashMap::new();

    for vertex in ring {
        if let Some(&pos) = positions.get(&vertex) {
            let tail: Vec<Vertex> = stack.drain(pos + 1..).collect();
            for v in &tail {
                positions.remove(v);
            }
            let mut cut = Vec::with_capacity(tail.len() + 1);
            cut.push(vertex);
            cut.extend(tail);
            loops.push(cut);
        } else {
            positions.insert(vertex, stack.len());
            stack.push(vertex);
        }
    }
    loops.push(stack);
    loops.retain(|r| r.len() >= 3);
    loops
}

/// Twice the shoelace area in screen coordinates.
fn signed_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            i64::from(x0) * i64::from(y1) - i64::from(x1) * i64::from(y0)
        })
        .sum()
}

/// Center of the region pixel lying right of the ring's first edge.
fn interior_sample(ring: &[Vertex]) -> geo::Point<f64> {
    let (x0, y0) = (f64::from(ring[0].0), f64::from(ring[0].1));
    let (x1, y1) = (f64::from(ring[1].0), f64::from(ring[1].1));
    let dx = (x1 - x0).signum();
    let dy = (y1 - y0).signum();
    geo::Point::new(0.5f64.mul_add(dx - dy, x0), 0.5f64.mul_add(dy + dx, y0))
}

fn pixel_polygon(ring: &[Vertex]) -> Polygon<f64> {
    let exterior: LineString<f64> = ring
        .iter()
        .map(|&(x, y)| Coord {
            x: f64::from(x),
            y: f64::from(y),
        })
        .collect();
    Polygon::new(exterior, Vec::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geo::Area;

    use super::*;
    use crate::types::GeoReference;

    fn raster(width: u32, rows: &[&[u32]]) -> LabelRaster {
        let labels: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let height = u32::try_from(rows.len()).unwrap();
        LabelRaster::new(Dimensions { width, height }, labels, GeoReference::default()).unwrap()
    }

    #[test]
    fn empty_raster_has_no_regions() {
        let r = raster(3, &[&[0, 0, 0], &[0, 0, 0]]);
        assert!(trace_regions(&r).is_empty());
    }

    #[test]
    fn rectangle_traces_four_corners() {
        let r = raster(
            5,
            &[
                &[0, 0, 0, 0, 0],
                &[0, 4, 4, 4, 0],
                &[0, 4, 4, 4, 0],
                &[0, 0, 0, 0, 0],
            ],
        );
        let regions = trace_regions(&r);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].value, 4);
        assert_eq!(regions[0].exterior, vec![(4, 1), (4, 3), (1, 3), (1, 1)]);
        assert!(regions[0].holes.is_empty());
    }

    #[test]
    fn full_raster_region_touches_edges() {
        let r = raster(2, &[&[9, 9], &[9, 9]]);
        let polygons = polygonize(&r);
        assert_eq!(polygons.len(), 1);
        assert!((polygons[0].0.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn single_pixel_raster() {
        let regions = trace_regions(&raster(1, &[&[5]]));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].value, 5);
        assert_eq!(regions[0].exterior, vec![(1, 0), (1, 1), (0, 1), (0, 0)]);
    }

    #[test]
    fn distinct_neighbours_without_background() {
        let row = trace_regions(&raster(2, &[&[1, 2]]));
        let column = trace_regions(&raster(1, &[&[1], &[2]]));
        for regions in [row, column] {
            let values: Vec<u32> = regions.iter().map(|t| t.value).collect();
            assert_eq!(values, vec![1, 2]);
            assert!(regions.iter().all(|t| t.exterior.len() == 4));
        }
    }

    #[test]
    fn checkerboard_of_labels_covers_raster() {
        let r = raster(2, &[&[1, 3], &[2, 1]]);
        let polygons = polygonize(&r);
        assert_eq!(polygons.len(), 4);
        let total: f64 = polygons.iter().map(|(p, _)| p.unsigned_area()).sum();
        assert!((total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ring_with_background_hole() {
        let r = raster(3, &[&[5, 5, 5], &[5, 0, 5], &[5, 5, 5]]);
        let regions = trace_regions(&r);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert_eq!(regions[0].holes[0].len(), 4);

        let polygon = to_polygon(&regions[0], &GeoTransform::IDENTITY);
        assert!((polygon.unsigned_area() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn hole_filled_by_other_label_yields_two_regions() {
        let r = raster(3, &[&[5, 5, 5], &[5, 7, 5], &[5, 5, 5]]);
        let polygons = polygonize(&r);
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].1, 5);
        assert_eq!(polygons[1].1, 7);
        assert!((polygons[0].0.unsigned_area() - 8.0).abs() < 1e-9);
        assert!((polygons[1].0.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn diagonal_pixels_are_separate_regions() {
        let r = raster(2, &[&[3, 0], &[0, 3]]);
        let regions = trace_regions(&r);
        assert_eq!(regions.len(), 2);
        for region in &regions {
            assert_eq!(region.value, 3);
            assert_eq!(region.exterior.len(), 4);
        }
    }

    #[test]
    fn same_label_split_by_background_is_two_regions() {
        let r = raster(3, &[&[2, 0, 2]]);
        assert_eq!(trace_regions(&r).len(), 2);
    }

    #[test]
    fn self_touching_region_splits_shell_and_hole() {
        // The background hole at (1, 1) leaks through the diagonal at (2, 2).
        let r = raster(3, &[&[1, 1, 1], &[1, 0, 1], &[1, 1, 0]]);
        let regions = trace_regions(&r);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert!(regions[0].holes[0].contains(&(2, 2)));
        assert!(regions[0].exterior.contains(&(2, 2)));

        let polygon = to_polygon(&regions[0], &GeoTransform::IDENTITY);
        assert!((polygon.unsigned_area() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn transform_maps_to_crs_coordinates() {
        let mut r = raster(2, &[&[0, 6], &[0, 6]]);
        r.georef.transform = GeoTransform::north_up(100.0, 200.0, 10.0, 10.0);
        let polygons = polygonize(&r);
        assert_eq!(polygons.len(), 1);
        let (polygon, value) = &polygons[0];
        assert_eq!(*value, 6);
        assert!((polygon.unsigned_area() - 200.0).abs() < 1e-9);
        let xs: Vec<f64> = polygon.exterior().coords().map(|c| c.x).collect();
        let ys: Vec<f64> = polygon.exterior().coords().map(|c| c.y).collect();
        assert!(xs.iter().all(|&x| (110.0..=120.0).contains(&x)));
        assert!(ys.iter().all(|&y| (180.0..=200.0).contains(&y)));
    }

    #[test]
    fn regions_follow_scan_order() {
        let r = raster(3, &[&[0, 0, 8], &[1, 0, 0]]);
        let values: Vec<u32> = trace_regions(&r).iter().map(|t| t.value).collect();
        assert_eq!(values, vec![8, 1]);
    }

    #[test]
    fn split_at_pinches_extracts_loop() {
        let ring = vec![(0, 0), (2, 0), (2, 1), (1, 1), (1, 2), (2, 1), (2, 3), (0, 3)];
        let rings = split_at_pinches(ring);
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0], vec![(2, 1), (1, 1), (1, 2)]);
        assert_eq!(rings[1], vec![(0, 0), (2, 0), (2, 1), (2, 3), (0, 3)]);
    }
}
