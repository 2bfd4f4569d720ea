//! lgraph-pipeline: Local-Global graph extraction from rasters (sans-IO).
//!
//! Converts a grayscale raster into an LG graph through:
//! segmentation -> region growing -> contour tracing ->
//! line-segment decomposition -> shape description -> graph assembly.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! rasters or byte slices and returns structured data. Reading files,
//! rendering and persistence live in `lgraph-export` and `lgraph-cli`.

pub mod cancel;
pub mod contour;
pub mod diagnostics;
pub mod graph;
pub mod lines;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod segment;
pub mod shape;
pub mod types;

pub use cancel::CancelToken;
pub use contour::{ChainCode, Contour, ContourTracer, ContourTracerKind};
pub use diagnostics::PipelineDiagnostics;
pub use graph::{GlobalRelation, LgGraph, LgNode, PartitionMethod};
pub use pipeline::Pipeline;
pub use raster::Raster;
pub use region::Region;
pub use segment::{ClusterStats, Segmentation};
pub use shape::LineSegment;
pub use types::{
    Dimensions, GrayImage, GridPoint, MASK_PADDING, PipelineConfig, PipelineError, Point,
};

/// Run the full extraction pipeline over an in-memory raster.
///
/// # Pipeline steps
///
/// 1. Cluster pixels into `config.clusters` labels (plus optional
///    majority smoothing)
/// 2. Grow disjoint regions from every non-background label
/// 3. Trace each region's outer boundary into a chain code
/// 4. Split each chain code into line segments
/// 5. Describe segments and link those sharing a start cell
/// 6. Build one node per region and the global angle table
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized raster,
/// [`PipelineError::TooFewClusters`] / [`PipelineError::InvalidConfig`]
/// for a bad config, and [`PipelineError::BoundaryNotClosed`] /
/// [`PipelineError::RegionGrowthExceeded`] if a step cap is hit.
pub fn extract(raster: &Raster, config: &PipelineConfig) -> Result<LgGraph, PipelineError> {
    Ok(run(Pipeline::new(raster.clone(), config.clone()))?.into_graph())
}

/// Like [`extract`], also returning per-stage diagnostics.
///
/// # Errors
///
/// Same as [`extract`].
pub fn extract_with_diagnostics(
    raster: &Raster,
    config: &PipelineConfig,
) -> Result<(LgGraph, PipelineDiagnostics), PipelineError> {
    Ok(run(Pipeline::new(raster.clone(), config.clone()))?.into_parts())
}

/// Decode image bytes (PNG, JPEG, BMP, WebP) to grayscale and extract
/// their LG graph.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty and
/// [`PipelineError::ImageDecode`] if the format is unrecognized, plus
/// every error of [`extract`].
pub fn process(image_bytes: &[u8], config: &PipelineConfig) -> Result<LgGraph, PipelineError> {
    Ok(run(Pipeline::from_bytes(image_bytes, config.clone())?)?.into_graph())
}

/// Like [`process`], also returning per-stage diagnostics including
/// decode time.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_with_diagnostics(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<(LgGraph, PipelineDiagnostics), PipelineError> {
    Ok(run(Pipeline::from_bytes(image_bytes, config.clone())?)?.into_parts())
}

fn run(pending: pipeline::Pending) -> Result<pipeline::Assembled, PipelineError> {
    Ok(pending
        .segment()?
        .scan_regions()?
        .trace_contours()?
        .build_lines()
        .describe_shapes()
        .assemble())
}
