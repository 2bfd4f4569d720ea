//! Segmenter: combined spatial + intensity k-means ("NGB k-means").
//!
//! Each pixel is assigned to the nearest of `K` centers under the
//! distance
//!
//! ```text
//! sqrt((row - c.row)^2 + (col - c.col)^2 + (255 * intensity - c.intensity)^2)
//! ```
//!
//! and every center is then moved to the (rounded) mean of its members.
//! The loop runs for a fixed iteration count with no convergence test.
//!
//! Clusters are relabelled darkest-first before the labeled raster is
//! written, so label `0` is always the darkest cluster (the background
//! for [`crate::region`]). Label values are spaced `255 / K` apart to
//! keep clusters visually distinct.

use std::time::Duration;

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::cancel::CancelToken;
use crate::raster::Raster;
use crate::types::{PipelineConfig, PipelineError};

/// Neighbors (out of 25) that must share the center label before the
/// majority filter overwrites the inner 3x3 block.
pub const MAJORITY_THRESHOLD: usize = 18;

/// Random draws tried per center before falling back to the pixel whose
/// intensity is farthest from every existing center.
const SEED_ATTEMPTS: usize = 32;

/// Summary statistics for one cluster, in label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// Label value written into the labeled raster.
    pub label: u8,
    /// Mean row of the member pixels.
    pub mean_row: f64,
    /// Mean column of the member pixels.
    pub mean_col: f64,
    /// Mean intensity of the member pixels on the `0..=255` scale.
    pub mean_intensity: f64,
    /// Member pixel count from the final assignment pass.
    pub pixel_count: usize,
}

/// Output of the segmenter: a label per pixel plus cluster statistics.
///
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segmentation {
    /// Labeled raster, same dimensions as the input.
    #[serde(with = "crate::types::gray_serde")]
    pub labels: GrayImage,
    /// One entry per cluster, ordered by ascending label.
    pub clusters: Vec<ClusterStats>,
    /// Wall-clock time spent segmenting.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub elapsed: Duration,
}

impl Segmentation {
    /// Statistics for the cluster written with `label`, if any.
    #[must_use]
    pub fn cluster(&self, label: u8) -> Option<&ClusterStats> {
        self.clusters.iter().find(|c| c.label == label)
    }

    /// Number of distinct label values present in the labeled raster.
    #[must_use]
    pub fn distinct_labels(&self) -> usize {
        let mut seen = [false; 256];
        for p in self.labels.pixels() {
            seen[usize::from(p.0[0])] = true;
        }
        seen.iter().filter(|&&s| s).count()
    }
}

/// A cluster center in `(row, col, intensity)` space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Center {
    row: f64,
    col: f64,
    /// On the `0..=255` scale.
    intensity: f64,
}

/// Running sums for one cluster during an assignment pass.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: usize,
    row_sum: f64,
    col_sum: f64,
    intensity_sum: f64,
}

impl Accumulator {
    fn add(&mut self, row: f64, col: f64, intensity: f64) {
        self.count += 1;
        self.row_sum += row;
        self.col_sum += col;
        self.intensity_sum += intensity;
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self) -> Option<Center> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(Center {
            row: self.row_sum / n,
            col: self.col_sum / n,
            intensity: self.intensity_sum / n,
        })
    }
}

/// Partition `raster` into `config.clusters` labeled clusters.
///
/// Deterministic for a fixed `config.seed`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized raster,
/// [`PipelineError::TooFewClusters`] / [`PipelineError::InvalidConfig`]
/// for an invalid config, and [`PipelineError::Cancelled`] if `cancel`
/// fires between rows.
pub fn segment(
    raster: &Raster,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Segmentation, PipelineError> {
    if raster.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    config.validate()?;

    let start = Instant::now();
    let k = config.clusters;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centers = init_centers(raster, k, &mut rng);
    let mut assignment = vec![0_usize; raster_len(raster)];
    let mut sums = vec![Accumulator::default(); k];

    for iteration in 0..config.iterations {
        cancel.check()?;
        sums = assign_pass(raster, &centers, &mut assignment, cancel)?;
        for (idx, (center, acc)) in centers.iter_mut().zip(&sums).enumerate() {
            match acc.mean() {
                Some(mean) => {
                    *center = Center {
                        row: mean.row.round(),
                        col: mean.col.round(),
                        intensity: mean.intensity.round(),
                    };
                }
                None => log::warn!("cluster {idx} is empty after iteration {iteration}"),
            }
        }
        log::debug!("segment: iteration {iteration} centers {centers:?}");
    }

    let ranks = rank_by_intensity(&centers);
    let spacing = label_spacing(k);
    let (cols, rows) = (raster.cols(), raster.rows());
    let mut labels = GrayImage::from_fn(cols, rows, |x, y| {
        let idx = y as usize * cols as usize + x as usize;
        Luma([ranks[assignment[idx]] * spacing])
    });

    let mut clusters: Vec<ClusterStats> = sums
        .iter()
        .enumerate()
        .map(|(idx, acc)| {
            let mean = acc.mean().unwrap_or(centers[idx]);
            ClusterStats {
                label: ranks[idx] * spacing,
                mean_row: mean.row,
                mean_col: mean.col,
                mean_intensity: mean.intensity,
                pixel_count: acc.count,
            }
        })
        .collect();
    clusters.sort_by_key(|c| c.label);

    if config.majority_filter {
        labels = majority_filter(&labels);
    }

    let elapsed = start.elapsed();
    log::debug!(
        "segment: {k} clusters over {rows}x{cols} in {:.3}ms",
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(Segmentation {
        labels,
        clusters,
        elapsed,
    })
}

/// Overwrite 3x3 blocks whose 5x5 neighborhood agrees with its center.
///
/// For every pixel outside a 2-pixel margin, if at least
/// [`MAJORITY_THRESHOLD`] of the 25 pixels in its 5x5 neighborhood share
/// its label, the inner 3x3 block is set to that label. Neighborhoods are
/// read from the unfiltered input, so the result does not depend on scan
/// order.
#[must_use = "returns the smoothed labeled raster"]
pub fn majority_filter(labels: &GrayImage) -> GrayImage {
    let (width, height) = labels.dimensions();
    let mut out = labels.clone();
    if width < 5 || height < 5 {
        return out;
    }

    for y in 2..height - 2 {
        for x in 2..width - 2 {
            let center = labels.get_pixel(x, y).0[0];
            let same = (y - 2..=y + 2)
                .flat_map(|ny| (x - 2..=x + 2).map(move |nx| (nx, ny)))
                .filter(|&(nx, ny)| labels.get_pixel(nx, ny).0[0] == center)
                .count();
            if same >= MAJORITY_THRESHOLD {
                for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        out.put_pixel(nx, ny, Luma([center]));
                    }
                }
            }
        }
    }
    out
}

fn raster_len(raster: &Raster) -> usize {
    raster.rows() as usize * raster.cols() as usize
}

/// Label value spacing for `k` clusters (`255 / k`, at least 1).
#[allow(clippy::cast_possible_truncation)]
fn label_spacing(k: usize) -> u8 {
    (255 / k.max(1)).clamp(1, 255) as u8
}

/// Rank of each center when sorted by ascending intensity (ties by index).
#[allow(clippy::cast_possible_truncation)]
fn rank_by_intensity(centers: &[Center]) -> Vec<u8> {
    let mut order: Vec<usize> = (0..centers.len()).collect();
    order.sort_by(|&a, &b| centers[a].intensity.total_cmp(&centers[b].intensity));
    let mut ranks = vec![0_u8; centers.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        // `k <= 255` is enforced by config validation.
        ranks[idx] = rank as u8;
    }
    ranks
}

/// Pick `k` random seed pixels, sampling intensity at each seed.
///
/// A draw whose intensity duplicates an existing center is retried; if
/// every retry collides, the pixel whose intensity is farthest from all
/// existing centers is used instead (first in row-major order on ties).
fn init_centers(raster: &Raster, k: usize, rng: &mut StdRng) -> Vec<Center> {
    let sample = |rng: &mut StdRng| {
        let row = rng.gen_range(0..raster.rows());
        let col = rng.gen_range(0..raster.cols());
        center_at(raster, row, col)
    };
    let is_duplicate = |centers: &[Center], c: &Center| {
        centers
            .iter()
            .any(|e| (e.intensity - c.intensity).abs() < 0.5)
    };

    let mut centers: Vec<Center> = Vec::with_capacity(k);
    for _ in 0..k {
        let mut candidate = sample(rng);
        let mut attempts = 1;
        while is_duplicate(&centers, &candidate) && attempts < SEED_ATTEMPTS {
            candidate = sample(rng);
            attempts += 1;
        }
        if is_duplicate(&centers, &candidate)
            && let Some(spread) = most_distinct_pixel(raster, &centers)
        {
            candidate = spread;
        }
        centers.push(candidate);
    }
    centers
}

fn center_at(raster: &Raster, row: u32, col: u32) -> Center {
    Center {
        row: f64::from(row),
        col: f64::from(col),
        intensity: (f64::from(raster.intensity(row, col)) * 255.0).round(),
    }
}

/// The pixel maximising the minimum intensity gap to `centers`, if that
/// gap is non-zero.
fn most_distinct_pixel(raster: &Raster, centers: &[Center]) -> Option<Center> {
    let mut best: Option<(f64, Center)> = None;
    for row in 0..raster.rows() {
        for col in 0..raster.cols() {
            let candidate = center_at(raster, row, col);
            let gap = centers
                .iter()
                .map(|c| (c.intensity - candidate.intensity).abs())
                .fold(f64::INFINITY, f64::min);
            if best.is_none_or(|(g, _)| gap > g) {
                best = Some((gap, candidate));
            }
        }
    }
    best.filter(|(gap, _)| *gap >= 0.5).map(|(_, c)| c)
}

/// Assign every pixel of one row to its nearest center.
///
/// Ties go to the lowest center index.
fn assign_row(
    raster: &Raster,
    centers: &[Center],
    row: u32,
    out: &mut [usize],
    cancel: &CancelToken,
) -> Result<(), PipelineError> {
    cancel.check()?;
    let r = f64::from(row);
    for (col, slot) in (0..raster.cols()).zip(out.iter_mut()) {
        let c = f64::from(col);
        let intensity = f64::from(raster.intensity(row, col)) * 255.0;
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (idx, center) in centers.iter().enumerate() {
            let dr = r - center.row;
            let dc = c - center.col;
            let di = intensity - center.intensity;
            let dist = di.mul_add(di, dr.mul_add(dr, dc * dc));
            if dist < best_dist {
                best_dist = dist;
                best = idx;
            }
        }
        *slot = best;
    }
    Ok(())
}

/// Per-cluster running sums, accumulated in row-major order so the
/// floating-point result does not depend on how assignment was scheduled.
fn accumulate(raster: &Raster, assignment: &[usize], k: usize) -> Vec<Accumulator> {
    let mut sums = vec![Accumulator::default(); k];
    let cols = raster.cols();
    for (idx, &cluster) in assignment.iter().enumerate() {
        let (row, col) = index_to_cell(idx, cols);
        let intensity = f64::from(raster.intensity(row, col)) * 255.0;
        sums[cluster].add(f64::from(row), f64::from(col), intensity);
    }
    sums
}

/// Convert a row-major index to `(row, col)`; a zero width maps to `(0, 0)`.
#[allow(clippy::cast_possible_truncation)]
fn index_to_cell(idx: usize, cols: u32) -> (u32, u32) {
    if cols == 0 {
        return (0, 0);
    }
    let cols = cols as usize;
    ((idx / cols) as u32, (idx % cols) as u32)
}

/// One full assignment pass followed by accumulation.
fn assign_pass(
    raster: &Raster,
    centers: &[Center],
    assignment: &mut [usize],
    cancel: &CancelToken,
) -> Result<Vec<Accumulator>, PipelineError> {
    assign_all(raster, centers, assignment, cancel)?;
    Ok(accumulate(raster, assignment, centers.len()))
}

#[cfg(not(feature = "parallel"))]
fn assign_all(
    raster: &Raster,
    centers: &[Center],
    assignment: &mut [usize],
    cancel: &CancelToken,
) -> Result<(), PipelineError> {
    let cols = raster.cols() as usize;
    for (row, chunk) in (0..raster.rows()).zip(assignment.chunks_mut(cols)) {
        assign_row(raster, centers, row, chunk, cancel)?;
    }
    Ok(())
}

#[cfg(feature = "parallel")]
#[allow(clippy::cast_possible_truncation)]
fn assign_all(
    raster: &Raster,
    centers: &[Center],
    assignment: &mut [usize],
    cancel: &CancelToken,
) -> Result<(), PipelineError> {
    use rayon::prelude::*;

    let cols = raster.cols() as usize;
    assignment
        .par_chunks_mut(cols)
        .enumerate()
        .try_for_each(|(row, chunk)| assign_row(raster, centers, row as u32, chunk, cancel))
}
