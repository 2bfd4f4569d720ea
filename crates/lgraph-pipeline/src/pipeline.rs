//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::extract`] which runs the whole pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use lgraph_pipeline::{Pipeline, PipelineConfig, PipelineError, Raster};
//! # fn run(raster: Raster) -> Result<(), PipelineError> {
//! let assembled = Pipeline::new(raster, PipelineConfig::default())
//!     .segment()?
//!     .scan_regions()?
//!     .trace_contours()?
//!     .build_lines()
//!     .describe_shapes()
//!     .assemble();
//!
//! println!("{} regions", assembled.graph().region_count);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! every earlier intermediate along. Stages that can fail return
//! `Result`.
//!
//! The per-region stages (tracing, line building, shape description and
//! node assembly) run on the rayon thread pool when the `parallel`
//! feature is enabled. Output order is always region scan order.

use std::time::Duration;

use web_time::Instant;

use crate::cancel::CancelToken;
use crate::contour::{Contour, ContourTracer};
use crate::diagnostics::{
    PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics, count_stats,
};
use crate::graph::{GraphAssembler, LgGraph, LgNode, PartitionMethod};
use crate::lines::{SegmentTrace, build_segments};
use crate::raster::Raster;
use crate::region::Region;
use crate::segment::Segmentation;
use crate::shape::{LocalGraph, describe};
use crate::types::{Dimensions, PipelineConfig, PipelineError};

/// State shared by every stage.
struct Context {
    config: PipelineConfig,
    cancel: CancelToken,
    dimensions: Dimensions,
    started: Instant,
    timings: Timings,
}

/// Wall-clock time per stage, filled in as the pipeline advances.
#[derive(Default)]
struct Timings {
    decode: Option<StageDiagnostics>,
    segmentation: Duration,
    region_scan: Duration,
    contour_tracing: Duration,
    line_building: Duration,
    shape_description: Duration,
    assembly: Duration,
}

/// Map `items` in order, in parallel when the `parallel` feature is on.
fn try_map_ordered<T, U, F>(items: &[T], f: F) -> Result<Vec<U>, PipelineError>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> Result<U, PipelineError> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}

/// Map owned `items` in order, in parallel when the `parallel` feature
/// is on.
fn map_owned_ordered<T, U, F>(items: Vec<T>, f: F) -> Vec<U>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().map(f).collect()
    }
}

/// Infallible counterpart of [`try_map_ordered`].
fn map_ordered<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}

// ───────────────────────── Entry point ─────────────────────────────────

/// Entry point for the incremental pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline over an in-memory raster.
    ///
    /// No processing is performed until [`Pending::segment`] is called.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(raster: Raster, config: PipelineConfig) -> Pending {
        let dimensions = raster.dimensions();
        Pending {
            ctx: Context {
                config,
                cancel: CancelToken::new(),
                dimensions,
                started: Instant::now(),
                timings: Timings::default(),
            },
            raster,
        }
    }

    /// Decode image bytes (PNG, JPEG, BMP, WebP) and create a pipeline
    /// over the grayscale result. Decode time is recorded in the
    /// diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if the bytes are empty or
    /// decode to a zero-sized image. Returns
    /// [`PipelineError::ImageDecode`] if the data is not a supported
    /// image.
    pub fn from_bytes(image_bytes: &[u8], config: PipelineConfig) -> Result<Pending, PipelineError> {
        let started = Instant::now();
        let raster = crate::raster::decode(image_bytes)?;
        let dimensions = raster.dimensions();
        let decode = StageDiagnostics {
            duration: started.elapsed(),
            metrics: StageMetrics::Decode {
                input_bytes: image_bytes.len(),
                width: dimensions.width,
                height: dimensions.height,
            },
        };
        let mut pending = Self::new(raster, config);
        pending.ctx.started = started;
        pending.ctx.timings.decode = Some(decode);
        Ok(pending)
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`segment`](Self::segment) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .segment() to continue"]
pub struct Pending {
    ctx: Context,
    raster: Raster,
}

impl Pending {
    /// The input raster.
    #[must_use]
    pub const fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Use `cancel` for every remaining stage.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.ctx.cancel = cancel;
        self
    }

    /// Cluster the raster and advance to the [`Segmented`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] for a zero-sized raster,
    /// [`PipelineError::TooFewClusters`] or
    /// [`PipelineError::InvalidConfig`] for a bad config, and
    /// [`PipelineError::Cancelled`] if the token fires.
    pub fn segment(mut self) -> Result<Segmented, PipelineError> {
        let started = Instant::now();
        let segmentation = crate::segment::segment(&self.raster, &self.ctx.config, &self.ctx.cancel)?;
        self.ctx.timings.segmentation = started.elapsed();
        log::debug!(
            "segmented {}x{} raster into {} labels",
            self.ctx.dimensions.width,
            self.ctx.dimensions.height,
            segmentation.distinct_labels()
        );
        Ok(Segmented {
            ctx: self.ctx,
            segmentation,
        })
    }
}

// ───────────────────────── Stage 1: Segmented ────────────────────────

/// Pipeline state after clustering.
///
/// Call [`scan_regions`](Self::scan_regions) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .scan_regions() to continue"]
pub struct Segmented {
    ctx: Context,
    segmentation: Segmentation,
}

impl Segmented {
    /// The labeled raster and cluster statistics.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Grow regions and advance to the [`RegionsScanned`] stage. An
    /// all-background segmentation yields no regions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RegionGrowthExceeded`] if a region
    /// exceeds the growth cap and [`PipelineError::Cancelled`] if the
    /// token fires.
    pub fn scan_regions(mut self) -> Result<RegionsScanned, PipelineError> {
        let started = Instant::now();
        let regions = crate::region::scan_regions(
            &self.segmentation.labels,
            &self.ctx.config,
            &self.ctx.cancel,
        )?;
        if regions.is_empty() {
            log::warn!("segmentation has no foreground regions");
        }
        self.ctx.timings.region_scan = started.elapsed();
        log::debug!("scanned {} regions", regions.len());
        Ok(RegionsScanned {
            ctx: self.ctx,
            segmentation: self.segmentation,
            regions,
        })
    }
}

// ───────────────────────── Stage 2: RegionsScanned ───────────────────

/// Pipeline state after region growing.
///
/// Call [`trace_contours`](Self::trace_contours) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .trace_contours() to continue"]
pub struct RegionsScanned {
    ctx: Context,
    segmentation: Segmentation,
    regions: Vec<Region>,
}

impl RegionsScanned {
    /// Regions in scan order.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Trace every region's boundary and advance to the
    /// [`ContoursTraced`] stage.
    ///
    /// Chain codes are shifted into raster coordinates; border masks stay
    /// aligned with the region masks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BoundaryNotClosed`] if a trace exceeds
    /// its step cap and [`PipelineError::Cancelled`] if the token fires.
    pub fn trace_contours(mut self) -> Result<ContoursTraced, PipelineError> {
        let started = Instant::now();
        let tracer = self.ctx.config.contour_tracer;
        let step_limit = self.ctx.config.trace_step_limit;
        let cancel = &self.ctx.cancel;

        let contours = try_map_ordered(&self.regions, |region| {
            let mut contour = tracer.trace(&region.mask, step_limit, cancel)?;
            contour.chain_code = contour
                .chain_code
                .translated(region.origin.row, region.origin.col);
            Ok(contour)
        })?;
        self.ctx.timings.contour_tracing = started.elapsed();
        Ok(ContoursTraced {
            ctx: self.ctx,
            segmentation: self.segmentation,
            regions: self.regions,
            contours,
        })
    }
}

// ───────────────────────── Stage 3: ContoursTraced ───────────────────

/// Pipeline state after contour tracing.
///
/// Call [`build_lines`](Self::build_lines) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .build_lines() to continue"]
pub struct ContoursTraced {
    ctx: Context,
    segmentation: Segmentation,
    regions: Vec<Region>,
    contours: Vec<Contour>,
}

impl ContoursTraced {
    /// Regions in scan order.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// One contour per region, in scan order.
    #[must_use]
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// Split every chain code into segments.
    pub fn build_lines(mut self) -> LinesBuilt {
        let started = Instant::now();
        let sensitivity = self.ctx.config.sensitivity;
        let traces = map_ordered(&self.contours, |contour| {
            build_segments(&contour.chain_code, sensitivity)
        });
        self.ctx.timings.line_building = started.elapsed();
        LinesBuilt {
            ctx: self.ctx,
            segmentation: self.segmentation,
            regions: self.regions,
            contours: self.contours,
            traces,
        }
    }
}

// ───────────────────────── Stage 4: LinesBuilt ───────────────────────

/// Pipeline state after line-segment decomposition.
///
/// Call [`describe_shapes`](Self::describe_shapes) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .describe_shapes() to continue"]
pub struct LinesBuilt {
    ctx: Context,
    segmentation: Segmentation,
    regions: Vec<Region>,
    contours: Vec<Contour>,
    traces: Vec<SegmentTrace>,
}

impl LinesBuilt {
    /// Raw segments per region, in scan order.
    #[must_use]
    pub fn segments(&self) -> &[SegmentTrace] {
        &self.traces
    }

    /// Describe every region's segments.
    pub fn describe_shapes(mut self) -> ShapesDescribed {
        let started = Instant::now();
        let locals = map_ordered(&self.traces, |trace| describe(&trace.segments));
        self.ctx.timings.shape_description = started.elapsed();
        ShapesDescribed {
            ctx: self.ctx,
            segmentation: self.segmentation,
            regions: self.regions,
            contours: self.contours,
            traces: self.traces,
            locals,
        }
    }
}

// ───────────────────────── Stage 5: ShapesDescribed ──────────────────

/// Pipeline state after shape description.
///
/// Call [`assemble`](Self::assemble) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to continue"]
pub struct ShapesDescribed {
    ctx: Context,
    segmentation: Segmentation,
    regions: Vec<Region>,
    contours: Vec<Contour>,
    traces: Vec<SegmentTrace>,
    locals: Vec<LocalGraph>,
}

impl ShapesDescribed {
    /// Local graphs per region, in scan order.
    #[must_use]
    pub fn local_graphs(&self) -> &[LocalGraph] {
        &self.locals
    }

    /// Build the nodes and the global angle table. Regions, contours and
    /// local graphs move into their nodes.
    pub fn assemble(mut self) -> Assembled {
        let started = Instant::now();
        let assembler =
            GraphAssembler::new(&self.segmentation, self.ctx.config.polygon_vertex_limit);
        let parts: Vec<(Region, Contour, LocalGraph)> = self
            .regions
            .into_iter()
            .zip(self.contours)
            .zip(self.locals)
            .map(|((region, contour), local)| (region, contour, local))
            .collect();
        let nodes: Vec<LgNode> = map_owned_ordered(parts, |(region, contour, local)| {
            assembler.node(region, contour, local)
        });
        let graph = GraphAssembler::finish(nodes, self.ctx.dimensions);
        self.ctx.timings.assembly = started.elapsed();
        Assembled {
            ctx: self.ctx,
            segmentation: self.segmentation,
            segment_count: self.traces.iter().map(|t| t.segments.len()).sum(),
            graph,
        }
    }
}

// ───────────────────────── Stage 6: Assembled ────────────────────────

/// Final pipeline state.
///
/// Call [`into_graph`](Self::into_graph) or
/// [`into_parts`](Self::into_parts) to extract the result.
#[must_use = "call .into_graph() to extract the LgGraph"]
pub struct Assembled {
    ctx: Context,
    segmentation: Segmentation,
    segment_count: usize,
    graph: LgGraph,
}

impl Assembled {
    /// The assembled graph.
    #[must_use]
    pub const fn graph(&self) -> &LgGraph {
        &self.graph
    }

    /// Per-stage timings and counts for this run.
    #[must_use]
    pub fn diagnostics(&self) -> PipelineDiagnostics {
        let config = &self.ctx.config;
        let timings = &self.ctx.timings;

        let nodes = &self.graph.nodes;
        let region_sizes: Vec<usize> = nodes.iter().map(|n| n.pixel_count).collect();
        let regions = count_stats(&region_sizes);
        let chain_lengths: Vec<usize> = nodes.iter().map(|n| n.chain_code.len()).collect();
        let chains = count_stats(&chain_lengths);
        let segment_count = self.segment_count;
        let line_count: usize = nodes.iter().map(|n| n.lines.len()).sum();
        let connection_count: usize = nodes
            .iter()
            .flat_map(|n| &n.lines)
            .map(|l| l.connections.len())
            .sum();
        let clustered_count = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.method == PartitionMethod::Clustering)
            .count();

        PipelineDiagnostics {
            decode: timings.decode.clone(),
            segmentation: StageDiagnostics {
                duration: timings.segmentation,
                metrics: StageMetrics::Segmentation {
                    clusters: config.clusters,
                    iterations: config.iterations,
                    distinct_labels: self.segmentation.distinct_labels(),
                    majority_filter: config.majority_filter,
                },
            },
            region_scan: StageDiagnostics {
                duration: timings.region_scan,
                metrics: StageMetrics::RegionScan {
                    region_count: nodes.len(),
                    min_region_pixels: regions.min,
                    max_region_pixels: regions.max,
                    mean_region_pixels: regions.mean,
                },
            },
            contour_tracing: StageDiagnostics {
                duration: timings.contour_tracing,
                metrics: StageMetrics::ContourTracing {
                    contour_count: nodes.len(),
                    total_chain_length: chains.total,
                    min_chain_length: chains.min,
                    max_chain_length: chains.max,
                    mean_chain_length: chains.mean,
                },
            },
            line_building: StageDiagnostics {
                duration: timings.line_building,
                metrics: StageMetrics::LineBuilding {
                    sensitivity: config.sensitivity,
                    segment_count,
                },
            },
            shape_description: StageDiagnostics {
                duration: timings.shape_description,
                metrics: StageMetrics::ShapeDescription {
                    line_count,
                    dropped_count: segment_count - line_count,
                    connection_count,
                },
            },
            assembly: StageDiagnostics {
                duration: timings.assembly,
                metrics: StageMetrics::Assembly {
                    node_count: self.graph.nodes.len(),
                    clustered_count,
                    relation_count: self.graph.relations.len(),
                },
            },
            total_duration: self.ctx.started.elapsed(),
            summary: PipelineSummary {
                image_width: self.ctx.dimensions.width,
                image_height: self.ctx.dimensions.height,
                pixel_count: self.ctx.dimensions.pixel_count(),
                region_count: self.graph.region_count,
                line_count,
            },
        }
    }

    /// Consume the pipeline and return the graph.
    #[must_use]
    pub fn into_graph(self) -> LgGraph {
        self.graph
    }

    /// Consume the pipeline and return the graph with its diagnostics.
    #[must_use]
    pub fn into_parts(self) -> (LgGraph, PipelineDiagnostics) {
        let diagnostics = self.diagnostics();
        (self.graph, diagnostics)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::GridPoint;

    fn square_raster() -> Raster {
        Raster::from_fn(10, 10, |row, col| {
            if (2..7).contains(&row) && (2..7).contains(&col) {
                1.0
            } else {
                0.0
            }
        })
    }

    fn square_config() -> PipelineConfig {
        PipelineConfig {
            clusters: 2,
            iterations: 1,
            sensitivity: 1,
            majority_filter: false,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn stages_expose_intermediates() {
        let segmented = Pipeline::new(square_raster(), square_config())
            .segment()
            .unwrap();
        assert_eq!(segmented.segmentation().distinct_labels(), 2);

        let scanned = segmented.scan_regions().unwrap();
        assert_eq!(scanned.regions().len(), 1);

        let traced = scanned.trace_contours().unwrap();
        assert_eq!(traced.contours()[0].chain_code.start, GridPoint::new(2, 2));
        assert_eq!(traced.contours()[0].chain_code.len(), 16);

        let built = traced.build_lines();
        assert_eq!(built.segments()[0].segments.len(), 12);

        let described = built.describe_shapes();
        assert_eq!(described.local_graphs()[0].lines.len(), 12);

        let assembled = described.assemble();
        assert_eq!(assembled.graph().region_count, 1);
    }

    #[test]
    fn diagnostics_reflect_the_run() {
        let (graph, diag) = Pipeline::new(square_raster(), square_config())
            .segment()
            .and_then(Segmented::scan_regions)
            .and_then(RegionsScanned::trace_contours)
            .map(|t| t.build_lines().describe_shapes().assemble().into_parts())
            .unwrap();
        assert!(diag.decode.is_none());
        assert_eq!(diag.summary.region_count, graph.region_count);
        assert_eq!(diag.summary.line_count, 12);
        assert!(matches!(
            diag.contour_tracing.metrics,
            StageMetrics::ContourTracing {
                contour_count: 1,
                total_chain_length: 16,
                ..
            }
        ));
        assert!(diag.total_duration >= diag.segmentation.duration);
    }

    #[test]
    fn single_cluster_raster_yields_empty_graph() {
        // Both centers seed on the only pixel; ties go to the darkest label.
        let raster = Raster::from_fn(1, 1, |_, _| 0.5);
        let scanned = Pipeline::new(raster, square_config())
            .segment()
            .and_then(Segmented::scan_regions)
            .unwrap();
        assert!(scanned.regions().is_empty());
        let (graph, diag) = scanned
            .trace_contours()
            .unwrap()
            .build_lines()
            .describe_shapes()
            .assemble()
            .into_parts();
        assert_eq!(graph.region_count, 0);
        assert!(graph.nodes.is_empty());
        assert!(graph.relations.is_empty());
        assert_eq!(diag.summary.line_count, 0);
    }

    #[test]
    fn small_region_keeps_small_mask_and_raster_coordinates() {
        let raster = Raster::from_fn(120, 160, |row, col| {
            if (70..74).contains(&row) && (100..103).contains(&col) {
                1.0
            } else {
                0.0
            }
        });
        let traced = Pipeline::new(raster, square_config())
            .segment()
            .and_then(Segmented::scan_regions)
            .and_then(RegionsScanned::trace_contours)
            .unwrap();
        assert_eq!(traced.regions().len(), 1);
        let region = &traced.regions()[0];
        assert_eq!(region.mask.dimensions(), (3 + 6, 4 + 6));
        let contour = &traced.contours()[0];
        assert_eq!(contour.chain_code.start, GridPoint::new(70, 100));
        assert_eq!(
            contour
                .chain_code
                .render(contour.border.width(), contour.border.height(), region.origin)
                .as_raw(),
            contour.border.as_raw()
        );

        let graph = traced
            .build_lines()
            .describe_shapes()
            .assemble()
            .into_graph();
        let node = &graph.nodes[0];
        assert_eq!(node.mask.dimensions(), (9, 10));
        assert_eq!(node.border.dimensions(), (9, 10));
        assert!((node.centroid.x - 101.0).abs() < 1e-9);
        assert!((node.centroid.y - 71.5).abs() < 1e-9);
        assert_eq!(node.size, 12);
    }

    #[test]
    fn cancelled_pipeline_stops_before_segmenting() {
        let token = CancelToken::new();
        token.cancel();
        let result = Pipeline::new(square_raster(), square_config())
            .with_cancel(token)
            .segment();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn tracer_cap_surfaces_as_error() {
        let config = PipelineConfig {
            trace_step_limit: Some(4),
            ..square_config()
        };
        let result = Pipeline::new(square_raster(), config)
            .segment()
            .and_then(Segmented::scan_regions)
            .and_then(RegionsScanned::trace_contours);
        assert!(matches!(
            result,
            Err(PipelineError::BoundaryNotClosed { limit: 4, .. })
        ));
    }
}
