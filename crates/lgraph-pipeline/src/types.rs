//! Shared types for the LG graph extraction pipeline.

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;

/// Re-export `GrayImage` so downstream crates can reference masks and
/// labeled rasters without depending on `image` directly.
pub use image::GrayImage;

/// Empty border added on every side of region and border masks.
///
/// Gives the contour tracer safe neighbor access without bounds checks
/// at the raster edge.
pub const MASK_PADDING: u32 = 3;

/// Foreground value used in every binary mask.
pub const FOREGROUND: u8 = 255;

/// A sub-pixel position in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (column).
    pub x: f64,
    /// Vertical position (row).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// An integer raster cell, addressed as `(row, col)`.
///
/// Signed so that chain-code replay can step outside a mask without
/// wrapping; callers bounds-check before indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    /// Row index (grows downward).
    pub row: i32,
    /// Column index (grows rightward).
    pub col: i32,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Shift by a `(d_row, d_col)` step.
    #[must_use]
    pub const fn offset(self, d_row: i32, d_col: i32) -> Self {
        Self {
            row: self.row + d_row,
            col: self.col + d_col,
        }
    }

    /// Convert to a sub-pixel [`Point`] at the cell center.
    #[must_use]
    pub fn to_point(self) -> Point {
        Point::new(f64::from(self.col), f64::from(self.row))
    }
}

/// Raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels (column count).
    pub width: u32,
    /// Height in pixels (row count).
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Configuration for the LG graph extraction pipeline.
///
/// Every run calls [`validate`](Self::validate) before touching the
/// raster, so invalid values surface as [`PipelineError`]s rather than
/// as panics deep inside an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of clusters `K` for the segmenter. Must be in `2..=255`.
    pub clusters: usize,

    /// Fixed iteration count `N` for the segmenter. No convergence test
    /// is performed.
    pub iterations: usize,

    /// Seed for the cluster-center initialisation. A fixed seed makes the
    /// segmentation fully reproducible.
    pub seed: u64,

    /// Run the 5x5 majority smoothing pass over the labeled raster.
    pub majority_filter: bool,

    /// Largest normalised intensity gap the region grower accepts between
    /// a candidate pixel and the region's running mean. Values `<= 0`
    /// fall back to [`DEFAULT_MAX_INTENSITY_DISTANCE`](Self::DEFAULT_MAX_INTENSITY_DISTANCE).
    pub max_intensity_distance: f64,

    /// Chain-code window threshold for the line-segment builder. Must be
    /// at least 1.
    pub sensitivity: u32,

    /// Which contour tracing algorithm to use.
    pub contour_tracer: ContourTracerKind,

    /// Maximum number of neighbor steps the contour tracer may make for
    /// one region. `None` derives a cap from the mask's perimeter.
    pub trace_step_limit: Option<usize>,

    /// Maximum number of growth steps for one region. `None` uses the
    /// raster's pixel count.
    pub growth_step_limit: Option<usize>,

    /// Border vertices kept for the point-in-polygon size sweep. Longer
    /// borders are subsampled to every Nth vertex.
    pub polygon_vertex_limit: usize,
}

impl PipelineConfig {
    /// Default cluster count.
    pub const DEFAULT_CLUSTERS: usize = 4;
    /// Default segmenter iteration count.
    pub const DEFAULT_ITERATIONS: usize = 10;
    /// Default initialisation seed.
    pub const DEFAULT_SEED: u64 = 0x1_9E37;
    /// Default region-growing intensity threshold.
    pub const DEFAULT_MAX_INTENSITY_DISTANCE: f64 = 0.2;
    /// Default line-segment sensitivity.
    pub const DEFAULT_SENSITIVITY: u32 = 3;
    /// Default vertex cap for the size sweep.
    pub const DEFAULT_POLYGON_VERTEX_LIMIT: usize = 512;

    /// Check every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TooFewClusters`] if `clusters < 2`, and
    /// [`PipelineError::InvalidConfig`] for any other out-of-range value.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.clusters < 2 {
            return Err(PipelineError::TooFewClusters {
                clusters: self.clusters,
            });
        }
        if self.clusters > 255 {
            return Err(PipelineError::InvalidConfig(format!(
                "clusters must be at most 255 to keep labels distinct, got {}",
                self.clusters
            )));
        }
        if self.iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        if self.sensitivity == 0 {
            return Err(PipelineError::InvalidConfig(
                "sensitivity must be at least 1".to_string(),
            ));
        }
        if !self.max_intensity_distance.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "max_intensity_distance must be finite, got {}",
                self.max_intensity_distance
            )));
        }
        if self.polygon_vertex_limit < 3 {
            return Err(PipelineError::InvalidConfig(format!(
                "polygon_vertex_limit must be at least 3, got {}",
                self.polygon_vertex_limit
            )));
        }
        if matches!(self.trace_step_limit, Some(0)) || matches!(self.growth_step_limit, Some(0)) {
            return Err(PipelineError::InvalidConfig(
                "step limits must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The region-growing threshold actually used, substituting the
    /// default for unset (`<= 0`) values.
    #[must_use]
    pub fn effective_max_intensity_distance(&self) -> f64 {
        if self.max_intensity_distance > 0.0 {
            self.max_intensity_distance
        } else {
            log::warn!(
                "max_intensity_distance {} is not positive, using {}",
                self.max_intensity_distance,
                Self::DEFAULT_MAX_INTENSITY_DISTANCE
            );
            Self::DEFAULT_MAX_INTENSITY_DISTANCE
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clusters: Self::DEFAULT_CLUSTERS,
            iterations: Self::DEFAULT_ITERATIONS,
            seed: Self::DEFAULT_SEED,
            majority_filter: true,
            max_intensity_distance: Self::DEFAULT_MAX_INTENSITY_DISTANCE,
            sensitivity: Self::DEFAULT_SENSITIVITY,
            contour_tracer: ContourTracerKind::default(),
            trace_step_limit: None,
            growth_step_limit: None,
            polygon_vertex_limit: Self::DEFAULT_POLYGON_VERTEX_LIMIT,
        }
    }
}

/// Serde support for `GrayImage` fields as `(width, height, raw_pixels)`.
///
/// `image::ImageBuffer` does not implement serde traits.
pub(crate) mod gray_serde {
    use image::GrayImage;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(image: &GrayImage, serializer: S) -> Result<S::Ok, S::Error> {
        (image.width(), image.height(), image.as_raw()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GrayImage, D::Error> {
        let (width, height, raw) = <(u32, u32, Vec<u8>)>::deserialize(deserializer)?;
        GrayImage::from_raw(width, height, raw)
            .ok_or_else(|| serde::de::Error::custom("invalid grayscale image dimensions"))
    }
}

/// Errors that can occur during LG graph extraction.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes or raster were empty.
    #[error("input raster is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The segmenter needs at least two clusters.
    #[error("at least 2 clusters are required, got {clusters}")]
    TooFewClusters {
        /// The rejected cluster count.
        clusters: usize,
    },

    /// The contour tracer did not return to its start within the step cap.
    #[error("boundary did not close after {steps} steps (limit {limit})")]
    BoundaryNotClosed {
        /// Steps performed before giving up.
        steps: usize,
        /// The configured or derived cap.
        limit: usize,
    },

    /// The region grower exceeded its step cap.
    #[error("region grown from {seed:?} exceeded {limit} growth steps after {steps}")]
    RegionGrowthExceeded {
        /// Seed pixel of the offending region.
        seed: crate::GridPoint,
        /// Growth steps performed before giving up.
        steps: usize,
        /// The configured or derived cap.
        limit: usize,
    },

    /// The run was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("pipeline run was cancelled")]
    Cancelled,
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    InvalidConfig(String),
    TooFewClusters { clusters: usize },
    BoundaryNotClosed { steps: usize, limit: usize },
    RegionGrowthExceeded { seed: GridPoint, steps: usize, limit: usize },
    Cancelled,
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::TooFewClusters { clusters } => PipelineErrorProxy::TooFewClusters {
                clusters: *clusters,
            },
            Self::BoundaryNotClosed { steps, limit } => PipelineErrorProxy::BoundaryNotClosed {
                steps: *steps,
                limit: *limit,
            },
            Self::RegionGrowthExceeded { seed, steps, limit } => {
                PipelineErrorProxy::RegionGrowthExceeded {
                    seed: *seed,
                    steps: *steps,
                    limit: *limit,
                }
            }
            Self::Cancelled => PipelineErrorProxy::Cancelled,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image error cannot be rebuilt; keep its message.
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::InvalidConfig(format!("image decode error: {msg}"))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::TooFewClusters { clusters } => Self::TooFewClusters { clusters },
            PipelineErrorProxy::BoundaryNotClosed { steps, limit } => {
                Self::BoundaryNotClosed { steps, limit }
            }
            PipelineErrorProxy::RegionGrowthExceeded { seed, steps, limit } => {
                Self::RegionGrowthExceeded { seed, steps, limit }
            }
            PipelineErrorProxy::Cancelled => Self::Cancelled,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn grid_point_offset_and_center() {
        let p = GridPoint::new(2, 5).offset(-1, 3);
        assert_eq!(p, GridPoint::new(1, 8));
        assert_eq!(p.to_point(), Point::new(8.0, 1.0));
    }

    #[test]
    fn grid_points_order_row_major() {
        let mut pts = vec![GridPoint::new(1, 0), GridPoint::new(0, 5), GridPoint::new(0, 1)];
        pts.sort();
        assert_eq!(
            pts,
            vec![GridPoint::new(0, 1), GridPoint::new(0, 5), GridPoint::new(1, 0)]
        );
    }

    #[test]
    fn dimensions_pixel_count() {
        let d = Dimensions {
            width: 640,
            height: 480,
        };
        assert_eq!(d.pixel_count(), 307_200);
    }

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clusters, PipelineConfig::DEFAULT_CLUSTERS);
        assert_eq!(config.contour_tracer, ContourTracerKind::MooreNeighbor);
        assert!(config.majority_filter);
    }

    #[test]
    fn single_cluster_is_rejected() {
        let config = PipelineConfig {
            clusters: 1,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::TooFewClusters { clusters: 1 })
        ));
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let cases = [
            PipelineConfig {
                clusters: 256,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                iterations: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                sensitivity: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                max_intensity_distance: f64::NAN,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                trace_step_limit: Some(0),
                ..PipelineConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "expected InvalidConfig for {config:?}"
            );
        }
    }

    #[test]
    fn zero_intensity_distance_falls_back_to_default() {
        let config = PipelineConfig {
            max_intensity_distance: 0.0,
            ..PipelineConfig::default()
        };
        assert!(
            (config.effective_max_intensity_distance()
                - PipelineConfig::DEFAULT_MAX_INTENSITY_DISTANCE)
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"clusters": 6}"#).unwrap();
        assert_eq!(config.clusters, 6);
        assert_eq!(config.iterations, PipelineConfig::DEFAULT_ITERATIONS);
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            PipelineError::TooFewClusters { clusters: 1 }.to_string(),
            "at least 2 clusters are required, got 1"
        );
        assert_eq!(
            PipelineError::BoundaryNotClosed {
                steps: 40,
                limit: 40
            }
            .to_string(),
            "boundary did not close after 40 steps (limit 40)"
        );
    }

    #[test]
    fn pipeline_error_serde_keeps_variant() {
        let err = PipelineError::RegionGrowthExceeded {
            seed: GridPoint::new(3, 4),
            steps: 10,
            limit: 10,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            PipelineError::RegionGrowthExceeded { seed, steps: 10, limit: 10 } if seed == GridPoint::new(3, 4)
        ));
    }
}
