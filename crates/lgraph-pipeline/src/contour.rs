//! Contour tracing: walk a region's outer boundary into a chain code.
//!
//! This module defines the [`ContourTracer`] trait for pluggable
//! boundary-following algorithms and the [`ContourTracerKind`] enum for
//! selecting one at runtime.
//!
//! # Chain codes
//!
//! Directions are compass codes `0..=7`, numbered clockwise starting at
//! south (rows grow downward):
//!
//! ```text
//!   3 4 5        NW  N  NE
//!   2 . 6   =    W   .   E
//!   1 0 7        SW  S  SE
//! ```

use std::time::Duration;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::cancel::CancelToken;
use crate::types::{FOREGROUND, GridPoint, PipelineError};

/// `(d_row, d_col)` step for each direction code.
pub const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Direction the Moore tracer checks first, and must face again at the
/// start pixel to terminate.
///
/// The start pixel is the first foreground pixel in row-major order, so
/// north is guaranteed to be background.
pub const INITIAL_DIRECTION: u8 = 4;

/// Steps between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// The `(d_row, d_col)` step for a direction code (taken modulo 8).
#[must_use]
pub const fn step(code: u8) -> (i32, i32) {
    DIRECTIONS[(code % 8) as usize]
}

/// An 8-direction encoding of a boundary, anchored at a start cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCode {
    /// First boundary cell.
    pub start: GridPoint,
    /// One direction code per boundary step.
    pub codes: Vec<u8>,
}

impl ChainCode {
    /// Create a chain code.
    #[must_use]
    pub const fn new(start: GridPoint, codes: Vec<u8>) -> Self {
        Self { start, codes }
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` for a single-cell boundary.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Visited cells: the start followed by one cell per code.
    pub fn replay(&self) -> impl Iterator<Item = GridPoint> + '_ {
        std::iter::once(self.start).chain(self.codes.iter().scan(self.start, |pos, &code| {
            let (d_row, d_col) = step(code);
            *pos = pos.offset(d_row, d_col);
            Some(*pos)
        }))
    }

    /// The cell reached after the last code.
    #[must_use]
    pub fn end(&self) -> GridPoint {
        self.replay().last().unwrap_or(self.start)
    }

    /// Whether replay returns to the start cell.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end() == self.start
    }

    /// The same chain anchored `(d_row, d_col)` away.
    #[must_use]
    pub fn translated(&self, d_row: i32, d_col: i32) -> Self {
        Self {
            start: self.start.offset(d_row, d_col),
            codes: self.codes.clone(),
        }
    }

    /// Replay into a `width x height` binary mask whose pixel `(0, 0)`
    /// sits on cell `origin`. Cells falling outside are skipped.
    #[must_use]
    pub fn render(&self, width: u32, height: u32, origin: GridPoint) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for p in self.replay() {
            let (Ok(x), Ok(y)) = (
                u32::try_from(p.col - origin.col),
                u32::try_from(p.row - origin.row),
            ) else {
                continue;
            };
            if x < width && y < height {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask
    }

    /// Comma-joined codes, the form used by persistence records.
    #[must_use]
    pub fn to_record_string(&self) -> String {
        self.codes
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A traced boundary: its chain code plus the reconstructed border mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contour {
    /// Boundary chain code, in the traced mask's coordinates.
    pub chain_code: ChainCode,
    /// Mask of the cells visited by the chain code, same size as the
    /// traced mask.
    #[serde(with = "crate::types::gray_serde")]
    pub border: GrayImage,
    /// Time spent tracing.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub elapsed: Duration,
}

/// Selects which contour tracing algorithm to use.
///
/// Additional variants can be added without changing the
/// `PipelineConfig` struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Moore-neighbor boundary following.
    ///
    /// Checks the neighbor in the current direction; on foreground it
    /// steps there and turns `+2`, otherwise it turns `-1` and checks
    /// again. Stops back at the start cell facing
    /// [`INITIAL_DIRECTION`].
    #[default]
    MooreNeighbor,
}

/// Trait for contour tracing strategies.
///
/// Input: a binary mask holding one region (non-zero = foreground).
/// Output: the outer boundary as a [`Contour`].
pub trait ContourTracer {
    /// Trace the outer boundary of the first foreground component.
    ///
    /// `step_limit` caps the number of neighbor steps; `None` derives a
    /// cap from the mask (see [`default_step_limit`]).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if the mask has no
    /// foreground, [`PipelineError::BoundaryNotClosed`] if the cap is
    /// reached before the trace closes, and [`PipelineError::Cancelled`]
    /// if `cancel` fires.
    fn trace(
        &self,
        mask: &GrayImage,
        step_limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Contour, PipelineError>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(
        &self,
        mask: &GrayImage,
        step_limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Contour, PipelineError> {
        match *self {
            Self::MooreNeighbor => trace_moore(mask, step_limit, cancel),
        }
    }
}

/// Step cap derived from the mask: 8x a perimeter estimate of four
/// steps per boundary pixel.
#[must_use]
pub fn default_step_limit(mask: &GrayImage) -> usize {
    let boundary = boundary_pixel_count(mask);
    8 * 4 * (boundary + 1)
}

/// Foreground pixels with at least one background (or out-of-bounds)
/// 8-neighbor.
fn boundary_pixel_count(mask: &GrayImage) -> usize {
    mask.enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] != 0)
        .filter(|&(x, y, _)| {
            let here = to_grid(x, y);
            DIRECTIONS
                .iter()
                .any(|&(d_row, d_col)| !is_foreground(mask, here.offset(d_row, d_col)))
        })
        .count()
}

#[allow(clippy::cast_possible_wrap)]
const fn to_grid(x: u32, y: u32) -> GridPoint {
    GridPoint::new(y as i32, x as i32)
}

fn is_foreground(mask: &GrayImage, p: GridPoint) -> bool {
    let (Ok(x), Ok(y)) = (u32::try_from(p.col), u32::try_from(p.row)) else {
        return false;
    };
    mask.get_pixel_checked(x, y).is_some_and(|v| v.0[0] != 0)
}

/// First foreground cell in row-major order.
fn first_foreground(mask: &GrayImage) -> Option<GridPoint> {
    mask.enumerate_pixels()
        .find(|(_, _, p)| p.0[0] != 0)
        .map(|(x, y, _)| to_grid(x, y))
}

fn trace_moore(
    mask: &GrayImage,
    step_limit: Option<usize>,
    cancel: &CancelToken,
) -> Result<Contour, PipelineError> {
    let started = Instant::now();
    let start = first_foreground(mask).ok_or(PipelineError::EmptyInput)?;
    let limit = step_limit.unwrap_or_else(|| default_step_limit(mask));

    let mut pos = start;
    let mut dir = INITIAL_DIRECTION;
    let mut codes = Vec::new();
    let mut steps = 0;
    loop {
        if steps % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        let (d_row, d_col) = step(dir);
        let next = pos.offset(d_row, d_col);
        if is_foreground(mask, next) {
            codes.push(dir);
            pos = next;
            dir = (dir + 2) % 8;
        } else {
            dir = (dir + 7) % 8;
        }
        steps += 1;

        if pos == start && dir == INITIAL_DIRECTION {
            break;
        }
        if steps >= limit {
            log::warn!("contour trace from {start:?} did not close within {limit} steps");
            return Err(PipelineError::BoundaryNotClosed { steps, limit });
        }
    }

    let chain_code = ChainCode::new(start, codes);
    let border = chain_code.render(mask.width(), mask.height(), GridPoint::new(0, 0));
    Ok(Contour {
        chain_code,
        border,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let height = u32::try_from(rows.len()).unwrap();
        let width = u32::try_from(rows[0].len()).unwrap();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if rows[y as usize].as_bytes()[x as usize] == b'#' {
                255
            } else {
                0
            }])
        })
    }

    fn filled_square(size: u32, side: u32, at: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = (at..at + side).contains(&x) && (at..at + side).contains(&y);
            Luma([if inside { 255 } else { 0 }])
        })
    }

    fn trace(mask: &GrayImage) -> Contour {
        ContourTracerKind::MooreNeighbor
            .trace(mask, None, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn default_is_moore_neighbor() {
        assert_eq!(
            ContourTracerKind::default(),
            ContourTracerKind::MooreNeighbor
        );
    }

    #[test]
    fn five_by_five_square_has_sixteen_steps() {
        let mask = filled_square(11, 5, 3);
        let contour = trace(&mask);
        assert_eq!(contour.chain_code.start, GridPoint::new(3, 3));
        assert_eq!(
            contour.chain_code.codes,
            vec![0, 0, 0, 0, 6, 6, 6, 6, 4, 4, 4, 4, 2, 2, 2, 2]
        );
        assert!(contour.chain_code.is_closed());
    }

    #[test]
    fn square_border_is_outer_ring() {
        let mask = filled_square(11, 5, 3);
        let contour = trace(&mask);
        for (x, y, p) in contour.border.enumerate_pixels() {
            let in_square = (3..8).contains(&x) && (3..8).contains(&y);
            let on_ring = in_square && (x == 3 || x == 7 || y == 3 || y == 7);
            assert_eq!(p.0[0] != 0, on_ring, "pixel ({y}, {x})");
        }
    }

    #[test]
    fn replay_reproduces_border_exactly() {
        let mask = mask_from(&[
            "........",
            "..###...",
            ".#####..",
            ".##.###.",
            "..#####.",
            "....#...",
            "........",
        ]);
        let contour = trace(&mask);
        let replayed = contour
            .chain_code
            .render(mask.width(), mask.height(), GridPoint::new(0, 0));
        assert_eq!(replayed.as_raw(), contour.border.as_raw());
    }

    #[test]
    fn single_pixel_has_empty_chain() {
        let mask = mask_from(&["...", ".#.", "..."]);
        let contour = trace(&mask);
        assert!(contour.chain_code.is_empty());
        assert_eq!(contour.chain_code.start, GridPoint::new(1, 1));
        assert_eq!(contour.border, mask);
    }

    #[test]
    fn thin_shapes_close() {
        let horizontal = trace(&mask_from(&["....", ".##.", "...."]));
        assert_eq!(horizontal.chain_code.codes, vec![6, 2]);

        let diagonal = trace(&mask_from(&["....", ".#..", "..#.", "...."]));
        assert_eq!(diagonal.chain_code.codes, vec![7, 3]);

        let anti_diagonal = trace(&mask_from(&["....", "..#.", ".#..", "...."]));
        assert_eq!(anti_diagonal.chain_code.codes, vec![1, 5]);
    }

    #[test]
    fn pixels_on_image_edge_are_traced() {
        let mask = mask_from(&["##", "##"]);
        let contour = trace(&mask);
        assert_eq!(contour.chain_code.codes, vec![0, 6, 4, 2]);
    }

    #[test]
    fn border_matches_imageproc_outer_contour() {
        let shapes = [
            filled_square(12, 6, 3),
            mask_from(&[
                "..........",
                "..##......",
                "..##......",
                "..######..",
                "..######..",
                "..........",
            ]),
            mask_from(&[
                ".........",
                "....#....",
                "....#....",
                "..#####..",
                "....#....",
                "....#....",
                ".........",
            ]),
        ];
        for mask in shapes {
            let ours: BTreeSet<(u32, u32)> = trace(&mask)
                .border
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] != 0)
                .map(|(x, y, _)| (x, y))
                .collect();
            let theirs: BTreeSet<(u32, u32)> = imageproc::contours::find_contours::<u32>(&mask)
                .into_iter()
                .filter(|c| c.border_type == imageproc::contours::BorderType::Outer)
                .flat_map(|c| c.points)
                .map(|p| (p.x, p.y))
                .collect();
            assert_eq!(ours, theirs);
        }
    }

    #[test]
    fn empty_mask_is_rejected() {
        let result =
            ContourTracerKind::MooreNeighbor.trace(&GrayImage::new(4, 4), None, &CancelToken::new());
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn step_cap_raises_boundary_not_closed() {
        let mask = filled_square(11, 5, 3);
        let result = ContourTracerKind::MooreNeighbor.trace(&mask, Some(10), &CancelToken::new());
        assert!(matches!(
            result,
            Err(PipelineError::BoundaryNotClosed {
                steps: 10,
                limit: 10
            })
        ));
    }

    #[test]
    fn default_limit_scales_with_boundary() {
        assert_eq!(default_step_limit(&filled_square(11, 5, 3)), 8 * 4 * 17);
        assert_eq!(default_step_limit(&GrayImage::new(3, 3)), 32);
    }

    #[test]
    fn cancelled_token_stops_trace() {
        let token = CancelToken::new();
        token.cancel();
        let result = ContourTracerKind::MooreNeighbor.trace(&filled_square(9, 3, 3), None, &token);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn chain_code_helpers() {
        let chain = ChainCode::new(GridPoint::new(1, 1), vec![0, 6, 4, 2]);
        assert_eq!(chain.to_record_string(), "0,6,4,2");
        assert_eq!(chain.len(), 4);
        assert!(chain.is_closed());
        let points: Vec<GridPoint> = chain.replay().collect();
        assert_eq!(
            points,
            vec![
                GridPoint::new(1, 1),
                GridPoint::new(2, 1),
                GridPoint::new(2, 2),
                GridPoint::new(1, 2),
                GridPoint::new(1, 1),
            ]
        );
        let moved = chain.translated(-1, -1);
        assert_eq!(moved.start, GridPoint::new(0, 0));
        assert_eq!(moved.codes, chain.codes);
        assert_eq!(ChainCode::new(GridPoint::new(0, 0), vec![]).to_record_string(), "");
    }
}
