//! Region scanner: split a labeled raster into disjoint region masks.
//!
//! Background pixels (label `0`) are claimed up front. The scanner then
//! repeatedly takes the first unclaimed pixel in row-major order as a
//! seed and grows a region from it greedily: among the 4-connected
//! frontier, the pixel whose intensity is nearest to the region's
//! running mean is absorbed next. Growth stops once the nearest
//! candidate is farther than `max_intensity_distance` from the mean, or
//! the frontier runs dry.
//!
//! The frontier is bucketed by 8-bit label value in a `BTreeMap`, so the
//! nearest candidate is found with two range lookups instead of a linear
//! scan over every queued pixel.

use std::collections::BTreeMap;
use std::time::Duration;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::cancel::CancelToken;
use crate::types::{FOREGROUND, GridPoint, MASK_PADDING, PipelineConfig, PipelineError};

/// Growth steps between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// One grown region, as a padded binary mask over its bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Scan-order index, starting at 0.
    pub id: usize,
    /// Binary mask of the region's bounding box, padded by
    /// [`MASK_PADDING`] on every side.
    #[serde(with = "crate::types::gray_serde")]
    pub mask: GrayImage,
    /// Raster cell under mask pixel `(0, 0)`. Negative when the region
    /// touches the raster edge.
    pub origin: GridPoint,
    /// Number of pixels in the region.
    pub pixel_count: usize,
    /// Label value of the seed pixel.
    pub label: u8,
    /// Seed pixel in raster coordinates.
    pub seed: GridPoint,
    /// Final running mean intensity, normalised to `[0, 1]`.
    pub mean_intensity: f64,
    /// Time spent growing this region.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub elapsed: Duration,
}

impl Region {
    /// The bounding-box mask with the padding border cropped away.
    #[must_use]
    pub fn unpadded_mask(&self) -> GrayImage {
        let pad = MASK_PADDING;
        let width = self.mask.width().saturating_sub(2 * pad);
        let height = self.mask.height().saturating_sub(2 * pad);
        GrayImage::from_fn(width, height, |x, y| *self.mask.get_pixel(x + pad, y + pad))
    }

    /// Whether the raster cell `p` belongs to this region.
    #[must_use]
    pub fn contains(&self, p: GridPoint) -> bool {
        let (Ok(x), Ok(y)) = (
            u32::try_from(p.col - self.origin.col),
            u32::try_from(p.row - self.origin.row),
        ) else {
            return false;
        };
        self.mask
            .get_pixel_checked(x, y)
            .is_some_and(|v| v.0[0] != 0)
    }
}

/// Split `labels` into disjoint regions in seed scan order.
///
/// Every non-background pixel ends up in exactly one region. A region
/// may consist of a single pixel.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized raster,
/// [`PipelineError::RegionGrowthExceeded`] if one region needs more than
/// `config.growth_step_limit` steps, and [`PipelineError::Cancelled`] if
/// `cancel` fires.
pub fn scan_regions(
    labels: &GrayImage,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Vec<Region>, PipelineError> {
    let (width, height) = labels.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyInput);
    }

    let threshold = config.effective_max_intensity_distance();
    let pixel_count = width as usize * height as usize;
    let limit = config.growth_step_limit.unwrap_or(pixel_count);

    let mut grower = Grower {
        labels,
        width,
        height,
        claimed: labels.pixels().map(|p| p.0[0] == 0).collect(),
        queued_in: vec![0; pixel_count],
        generation: 0,
        threshold,
        limit,
    };

    let mut regions = Vec::new();
    let mut cursor = 0;
    while let Some(seed) = grower.next_seed(&mut cursor) {
        cancel.check()?;
        let started = Instant::now();
        let grown = grower.grow(seed, cancel)?;
        let (mask, origin) = grower.render_mask(&grown.members);
        let seed_point = grower.cell(seed);
        let region = Region {
            id: regions.len(),
            mask,
            origin,
            pixel_count: grown.members.len(),
            label: labels.as_raw()[seed],
            seed: seed_point,
            mean_intensity: grown.mean,
            elapsed: started.elapsed(),
        };
        log::debug!(
            "region {}: seed {:?} label {} -> {} pixels",
            region.id,
            region.seed,
            region.label,
            region.pixel_count
        );
        regions.push(region);
    }
    Ok(regions)
}

/// Result of growing one region.
struct Grown {
    members: Vec<usize>,
    mean: f64,
}

/// Shared state across successive region grows.
struct Grower<'a> {
    labels: &'a GrayImage,
    width: u32,
    height: u32,
    /// Pixels already owned by a region (or background).
    claimed: Vec<bool>,
    /// Generation stamp marking pixels already queued in the current grow.
    queued_in: Vec<u32>,
    generation: u32,
    threshold: f64,
    limit: usize,
}

impl Grower<'_> {
    /// First unclaimed pixel at or after `cursor`, in row-major order.
    fn next_seed(&self, cursor: &mut usize) -> Option<usize> {
        while *cursor < self.claimed.len() {
            if !self.claimed[*cursor] {
                return Some(*cursor);
            }
            *cursor += 1;
        }
        None
    }

    fn intensity(&self, idx: usize) -> f64 {
        f64::from(self.labels.as_raw()[idx]) / 255.0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn cell(&self, idx: usize) -> GridPoint {
        let width = self.width as usize;
        GridPoint::new((idx / width) as i32, (idx % width) as i32)
    }

    /// Unclaimed 4-neighbors of `idx` not yet queued in this grow.
    fn fresh_neighbors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let width = self.width as usize;
        let height = self.height as usize;
        let (row, col) = (idx / width, idx % width);
        let up = (row > 0).then(|| idx - width);
        let down = (row + 1 < height).then(|| idx + width);
        let left = (col > 0).then(|| idx - 1);
        let right = (col + 1 < width).then(|| idx + 1);
        [up, down, left, right]
            .into_iter()
            .flatten()
            .filter(|&n| !self.claimed[n] && self.queued_in[n] != self.generation)
    }

    fn enqueue_neighbors(&mut self, idx: usize, frontier: &mut BTreeMap<u8, Vec<usize>>) {
        let fresh: Vec<usize> = self.fresh_neighbors(idx).collect();
        for n in fresh {
            self.queued_in[n] = self.generation;
            frontier
                .entry(self.labels.as_raw()[n])
                .or_default()
                .push(n);
        }
    }

    fn grow(&mut self, seed: usize, cancel: &CancelToken) -> Result<Grown, PipelineError> {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            // Stamp counter wrapped; reset so stale stamps cannot match.
            self.queued_in.fill(0);
            self.generation = 1;
        }

        let mut frontier: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        let mut members = vec![seed];
        let mut mean = self.intensity(seed);
        self.claimed[seed] = true;
        self.queued_in[seed] = self.generation;
        self.enqueue_neighbors(seed, &mut frontier);

        let mut steps = 0;
        while let Some((key, distance)) = nearest_bucket(&frontier, mean) {
            if distance > self.threshold {
                break;
            }
            let Some(idx) = frontier.get_mut(&key).and_then(Vec::pop) else {
                frontier.remove(&key);
                continue;
            };
            if frontier.get(&key).is_some_and(Vec::is_empty) {
                frontier.remove(&key);
            }

            steps += 1;
            if steps > self.limit {
                return Err(PipelineError::RegionGrowthExceeded {
                    seed: self.cell(seed),
                    steps,
                    limit: self.limit,
                });
            }
            if steps % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }

            self.claimed[idx] = true;
            members.push(idx);
            #[allow(clippy::cast_precision_loss)]
            let n = members.len() as f64;
            mean += (self.intensity(idx) - mean) / n;
            self.enqueue_neighbors(idx, &mut frontier);
        }

        Ok(Grown { members, mean })
    }

    /// Padded binary mask over the bounding box of `members`, with the
    /// raster cell under its top-left pixel.
    #[allow(clippy::cast_possible_truncation)]
    fn render_mask(&self, members: &[usize]) -> (GrayImage, GridPoint) {
        let width = self.width as usize;
        let cells = || members.iter().map(|&idx| ((idx % width) as u32, (idx / width) as u32));
        let (min_x, min_y, max_x, max_y) = cells().fold(
            (u32::MAX, u32::MAX, 0, 0),
            |(x0, y0, x1, y1), (x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        );
        if min_x > max_x {
            return (GrayImage::new(0, 0), GridPoint::new(0, 0));
        }

        let mut mask = GrayImage::new(
            max_x - min_x + 1 + 2 * MASK_PADDING,
            max_y - min_y + 1 + 2 * MASK_PADDING,
        );
        for (x, y) in cells() {
            mask.put_pixel(
                x - min_x + MASK_PADDING,
                y - min_y + MASK_PADDING,
                Luma([FOREGROUND]),
            );
        }
        #[allow(clippy::cast_possible_wrap)]
        let origin = GridPoint::new(
            min_y as i32 - MASK_PADDING as i32,
            min_x as i32 - MASK_PADDING as i32,
        );
        (mask, origin)
    }
}

/// The non-empty frontier bucket whose intensity is nearest to `mean`,
/// with its normalised distance. Ties prefer the darker bucket.
fn nearest_bucket(frontier: &BTreeMap<u8, Vec<usize>>, mean: f64) -> Option<(u8, f64)> {
    let target = mean * 255.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pivot = target.clamp(0.0, 255.0).floor() as u8;
    let below = frontier.range(..=pivot).next_back().map(|(k, _)| *k);
    let above = frontier
        .range(pivot.saturating_add(1)..)
        .next()
        .map(|(k, _)| *k)
        .filter(|k| *k > pivot);
    let distance = |k: u8| (f64::from(k) - target).abs() / 255.0;
    match (below, above) {
        (Some(b), Some(a)) => {
            if distance(a) < distance(b) {
                Some((a, distance(a)))
            } else {
                Some((b, distance(b)))
            }
        }
        (Some(k), None) | (None, Some(k)) => Some((k, distance(k))),
        (None, None) => None,
    }
}
