//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Every call to [`extract_with_diagnostics`](crate::extract_with_diagnostics)
//! collects diagnostics alongside the graph. They never influence the
//! result and exist for parameter tuning.
//!
//! Timestamps are captured via the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//! Durations are serialized as fractional seconds (`f64`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image decoding (only when the run started from encoded bytes).
    pub decode: Option<StageDiagnostics>,
    /// Clustering and majority smoothing.
    pub segmentation: StageDiagnostics,
    /// Region growing.
    pub region_scan: StageDiagnostics,
    /// Boundary tracing of every region.
    pub contour_tracing: StageDiagnostics,
    /// Chain-code decomposition into segments.
    pub line_building: StageDiagnostics,
    /// Segment geometry and connectivity.
    pub shape_description: StageDiagnostics,
    /// Node construction and the global angle table.
    pub assembly: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
    },
    /// Segmenter metrics.
    Segmentation {
        /// Requested cluster count `K`.
        clusters: usize,
        /// Iterations run.
        iterations: usize,
        /// Distinct labels present after smoothing.
        distinct_labels: usize,
        /// Whether the majority filter ran.
        majority_filter: bool,
    },
    /// Region scanner metrics.
    RegionScan {
        /// Regions found.
        region_count: usize,
        /// Smallest region in pixels.
        min_region_pixels: usize,
        /// Largest region in pixels.
        max_region_pixels: usize,
        /// Mean region size in pixels.
        mean_region_pixels: f64,
    },
    /// Contour tracing metrics.
    ContourTracing {
        /// Contours traced.
        contour_count: usize,
        /// Total chain-code length across all contours.
        total_chain_length: usize,
        /// Shortest chain code.
        min_chain_length: usize,
        /// Longest chain code.
        max_chain_length: usize,
        /// Mean chain-code length.
        mean_chain_length: f64,
    },
    /// Line-segment builder metrics.
    LineBuilding {
        /// Window threshold used.
        sensitivity: u32,
        /// Segments produced, before zero-length filtering.
        segment_count: usize,
    },
    /// Shape describer metrics.
    ShapeDescription {
        /// Segments kept.
        line_count: usize,
        /// Zero-length segments dropped.
        dropped_count: usize,
        /// Total connectivity entries.
        connection_count: usize,
    },
    /// Graph assembly metrics.
    Assembly {
        /// Nodes built.
        node_count: usize,
        /// Nodes carrying cluster statistics.
        clustered_count: usize,
        /// Rows in the global angle table.
        relation_count: usize,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Number of regions (graph nodes).
    pub region_count: usize,
    /// Line segments across all nodes.
    pub line_count: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages: Vec<(&str, &StageDiagnostics)> = Vec::new();
        if let Some(ref decode) = self.decode {
            stages.push(("Decode", decode));
        }
        stages.extend([
            ("Segmentation", &self.segmentation),
            ("Region Scan", &self.region_scan),
            ("Contour Tracing", &self.contour_tracing),
            ("Line Building", &self.line_building),
            ("Shape Description", &self.shape_description),
            ("Assembly", &self.assembly),
        ]);

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Regions: {}  |  Line segments: {}",
            self.summary.region_count, self.summary.line_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Segmentation {
            clusters,
            iterations,
            distinct_labels,
            majority_filter,
        } => {
            let filter = if *majority_filter { " +majority" } else { "" };
            format!("K={clusters} N={iterations} labels={distinct_labels}{filter}")
        }
        StageMetrics::RegionScan {
            region_count,
            min_region_pixels,
            max_region_pixels,
            mean_region_pixels,
        } => format!(
            "{region_count} regions (min={min_region_pixels} max={max_region_pixels} mean={mean_region_pixels:.1} px)",
        ),
        StageMetrics::ContourTracing {
            contour_count,
            total_chain_length,
            min_chain_length,
            max_chain_length,
            mean_chain_length,
        } => format!(
            "{contour_count} contours, {total_chain_length} codes (min={min_chain_length} max={max_chain_length} mean={mean_chain_length:.1})",
        ),
        StageMetrics::LineBuilding {
            sensitivity,
            segment_count,
        } => format!("sensitivity={sensitivity} segments={segment_count}"),
        StageMetrics::ShapeDescription {
            line_count,
            dropped_count,
            connection_count,
        } => format!("{line_count} lines ({dropped_count} dropped), {connection_count} links"),
        StageMetrics::Assembly {
            node_count,
            clustered_count,
            relation_count,
        } => format!("{node_count} nodes ({clustered_count} clustered), {relation_count} relations"),
    }
}

/// Total, min, max and mean over a set of counts.
pub(crate) struct CountStats {
    pub total: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

/// Compute [`CountStats`]; an empty input yields all zeros.
pub(crate) fn count_stats(counts: &[usize]) -> CountStats {
    let total: usize = counts.iter().sum();
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let mean = if counts.is_empty() {
        0.0
    } else {
        total as f64 / counts.len() as f64
    };
    CountStats {
        total,
        min,
        max,
        mean,
    }
}
