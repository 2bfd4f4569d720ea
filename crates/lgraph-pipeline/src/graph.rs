//! Graph assembly: per-region nodes and the centroid-angle table.
//!
//! Each region becomes an [`LgNode`] carrying its centroid, its cluster
//! statistics (when the region is a whole segmenter cluster), its border,
//! its local line graph, its mask and a pixel count measured from the
//! border polygon. Nodes are kept in scan order; the global graph relates
//! every node's centroid to the first node's.

use std::collections::BTreeSet;

use geo::{Area, BoundingRect, Coord, Intersects, LineString, Polygon};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::contour::{ChainCode, Contour};
use crate::region::Region;
use crate::segment::{ClusterStats, Segmentation};
use crate::shape::{LineSegment, LocalGraph};
use crate::types::{Dimensions, GridPoint, Point};

/// How a region's pixels were partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// The region is exactly one segmenter cluster.
    Clustering,
    /// The region was carved out of a cluster by region growing.
    RegionGrowing,
}

/// One region of the LG graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LgNode {
    /// Scan-order index.
    pub id: usize,
    /// Intensity-weighted centroid, in raster coordinates.
    pub centroid: Point,
    /// Cluster statistics; `None` for regions produced by growing alone.
    pub stats: Option<ClusterStats>,
    /// Border mask, aligned with [`mask`](Self::mask).
    #[serde(with = "crate::types::gray_serde")]
    pub border: GrayImage,
    /// Boundary chain code, in raster coordinates.
    pub chain_code: ChainCode,
    /// The local graph.
    pub lines: Vec<LineSegment>,
    /// Padded region mask over the region's bounding box.
    #[serde(with = "crate::types::gray_serde")]
    pub mask: GrayImage,
    /// Raster cell under pixel `(0, 0)` of `mask` and `border`.
    pub origin: GridPoint,
    /// Pixels in the region mask.
    pub pixel_count: usize,
    /// Raster cells inside or on the border polygon.
    pub size: usize,
    /// How the region was partitioned.
    pub method: PartitionMethod,
}

/// A row of the global angle table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalRelation {
    /// Node index (`>= 1`).
    pub node: usize,
    /// Direction of the vector from the reference centroid to this
    /// node's centroid, `atan2(d_row, d_col)` in degrees.
    pub bearing_deg: f64,
    /// Signed angle in degrees from this node's reference vector to the
    /// next node's. The last node is compared with its predecessor
    /// instead.
    pub angle_to_next_deg: f64,
}

/// The LG graph of one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LgGraph {
    /// Nodes in scan order.
    pub nodes: Vec<LgNode>,
    /// Global angle table, one row per node after the first.
    pub relations: Vec<GlobalRelation>,
    /// Number of regions.
    pub region_count: usize,
    /// Source raster dimensions.
    pub dimensions: Dimensions,
}

/// Centroid of a mask from its raw moments, in raster coordinates given
/// the cell `origin` under mask pixel `(0, 0)`.
///
/// Pixel values are the weights, so a uniform mask yields the arithmetic
/// mean of its foreground coordinates. An empty mask yields `(0, 0)`.
#[must_use]
pub fn centroid(mask: &GrayImage, origin: GridPoint) -> Point {
    let (mut m00, mut m10, mut m01) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y, p) in mask.enumerate_pixels() {
        let w = f64::from(p.0[0]);
        if w > 0.0 {
            m00 += w;
            m10 += f64::from(x) * w;
            m01 += f64::from(y) * w;
        }
    }
    if m00 <= 0.0 {
        return Point::new(0.0, 0.0);
    }
    Point::new(
        m10 / m00 + f64::from(origin.col),
        m01 / m00 + f64::from(origin.row),
    )
}

/// Count raster cells inside or on the polygon traced by a chain code.
///
/// Vertices are taken in replay order; chains longer than
/// `vertex_limit` keep every Nth vertex. Degenerate polygons (lines and
/// single cells) fall back to counting distinct boundary cells.
#[must_use]
pub fn polygon_size(chain: &ChainCode, vertex_limit: usize) -> usize {
    let cells: Vec<_> = chain.replay().collect();
    let distinct = cells.iter().collect::<BTreeSet<_>>().len();

    let stride = cells.len().div_ceil(vertex_limit.max(1)).max(1);
    let coords: Vec<Coord<f64>> = cells
        .iter()
        .step_by(stride)
        .map(|c| Coord {
            x: f64::from(c.col),
            y: f64::from(c.row),
        })
        .collect();
    if coords.len() < 3 {
        return distinct;
    }

    let polygon = Polygon::new(LineString::from(coords), vec![]);
    if polygon.unsigned_area() <= 0.0 {
        return distinct;
    }
    let Some(bounds) = polygon.bounding_rect() else {
        return distinct;
    };

    #[allow(clippy::cast_possible_truncation)]
    let (min_x, max_x, min_y, max_y) = (
        bounds.min().x.floor() as i64,
        bounds.max().x.ceil() as i64,
        bounds.min().y.floor() as i64,
        bounds.max().y.ceil() as i64,
    );
    let mut count = 0;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            #[allow(clippy::cast_precision_loss)]
            let cell = geo::Point::new(x as f64, y as f64);
            if polygon.intersects(&cell) {
                count += 1;
            }
        }
    }
    count
}

/// Signed angle from `a` to `b` in degrees. Zero vectors yield `0`.
fn signed_angle_deg(a: (f64, f64), b: (f64, f64)) -> f64 {
    if (a.0 == 0.0 && a.1 == 0.0) || (b.0 == 0.0 && b.1 == 0.0) {
        return 0.0;
    }
    let cross = a.0.mul_add(b.1, -(a.1 * b.0));
    let dot = a.0.mul_add(b.0, a.1 * b.1);
    cross.atan2(dot).to_degrees()
}

/// Build the global angle table for centroids in node order.
///
/// For node `i` (from 1), the reference vector runs from centroid 0 to
/// centroid `i`; the angle is measured to node `i + 1`'s vector, or to
/// node `i - 1`'s for the last node.
#[must_use]
pub fn global_relations(centroids: &[Point]) -> Vec<GlobalRelation> {
    let Some(&origin) = centroids.first() else {
        return Vec::new();
    };
    let vector = |p: Point| (p.x - origin.x, p.y - origin.y);
    let n = centroids.len();

    (1..n)
        .map(|i| {
            let here = vector(centroids[i]);
            let other = if i + 1 < n { i + 1 } else { i - 1 };
            let bearing_deg = if here == (0.0, 0.0) {
                0.0
            } else {
                here.1.atan2(here.0).to_degrees()
            };
            GlobalRelation {
                node: i,
                bearing_deg,
                angle_to_next_deg: signed_angle_deg(here, vector(centroids[other])),
            }
        })
        .collect()
}

/// Per-label pixel counts of the labeled raster.
fn label_histogram(labels: &GrayImage) -> [usize; 256] {
    let mut counts = [0; 256];
    for p in labels.pixels() {
        counts[usize::from(p.0[0])] += 1;
    }
    counts
}

/// Assembles [`LgNode`]s against one segmentation.
pub struct GraphAssembler<'a> {
    segmentation: &'a Segmentation,
    label_counts: [usize; 256],
    vertex_limit: usize,
}

impl<'a> GraphAssembler<'a> {
    /// Prepare an assembler for regions scanned from `segmentation`.
    #[must_use]
    pub fn new(segmentation: &'a Segmentation, vertex_limit: usize) -> Self {
        Self {
            segmentation,
            label_counts: label_histogram(&segmentation.labels),
            vertex_limit,
        }
    }

    /// Statistics for a region that covers its whole cluster.
    fn stats_for(&self, region: &Region) -> Option<ClusterStats> {
        let whole_cluster = self.label_counts[usize::from(region.label)] == region.pixel_count;
        let stats = self
            .segmentation
            .cluster(region.label)
            .filter(|_| whole_cluster)
            .cloned();
        if stats.is_none() {
            log::warn!(
                "region {} (label {}) has no cluster statistics; marking as region-grown",
                region.id,
                region.label
            );
        }
        stats
    }

    /// Build one node, taking ownership of the region's pieces.
    /// `contour.chain_code` must be in raster coordinates.
    #[must_use]
    pub fn node(&self, region: Region, contour: Contour, local: LocalGraph) -> LgNode {
        let stats = self.stats_for(&region);
        let method = if stats.is_some() {
            PartitionMethod::Clustering
        } else {
            PartitionMethod::RegionGrowing
        };
        LgNode {
            id: region.id,
            centroid: centroid(&region.mask, region.origin),
            stats,
            size: polygon_size(&contour.chain_code, self.vertex_limit),
            border: contour.border,
            chain_code: contour.chain_code,
            lines: local.lines,
            mask: region.mask,
            origin: region.origin,
            pixel_count: region.pixel_count,
            method,
        }
    }

    /// Attach the global angle table to nodes already in scan order.
    #[must_use]
    pub fn finish(nodes: Vec<LgNode>, dimensions: Dimensions) -> LgGraph {
        let centroids: Vec<Point> = nodes.iter().map(|n| n.centroid).collect();
        let relations = global_relations(&centroids);
        log::debug!(
            "assembled {} nodes with {} global relations",
            nodes.len(),
            relations.len()
        );
        LgGraph {
            region_count: nodes.len(),
            nodes,
            relations,
            dimensions,
        }
    }
}
