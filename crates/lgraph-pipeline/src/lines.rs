//! Line-segment decomposition of a chain code.
//!
//! The builder walks a chain code from its start cell, keeping a window of
//! the codes seen since the current segment began. After every step the
//! window's mean code value is compared with the sensitivity: once the
//! mean reaches it, the running segment is closed at the current cell and
//! the next segment starts there. Low sensitivity values therefore cut a
//! boundary into many short segments; high values into few long ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::contour::{ChainCode, step};
use crate::types::GridPoint;

/// The endpoints of one straight-line piece of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEndpoints {
    /// Cell where the segment begins.
    pub start: GridPoint,
    /// Cell where the segment ends.
    pub end: GridPoint,
}

/// Output of [`build_segments`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentTrace {
    /// Segments in boundary order.
    pub segments: Vec<SegmentEndpoints>,
    /// Time spent building.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub elapsed: Duration,
}

/// Split a chain code into straight-line segments.
///
/// Any codes left in the window when the chain ends are flushed as a
/// final segment, which may be zero-length if the window loops back to
/// where it began.
#[must_use]
pub fn build_segments(chain: &ChainCode, sensitivity: u32) -> SegmentTrace {
    let started = Instant::now();
    let threshold = u64::from(sensitivity);

    let mut segments = Vec::new();
    let mut pos = chain.start;
    let mut segment_start = pos;
    let mut window_sum: u64 = 0;
    let mut window_len: u64 = 0;

    for &code in &chain.codes {
        let (d_row, d_col) = step(code);
        pos = pos.offset(d_row, d_col);
        window_sum += u64::from(code);
        window_len += 1;

        // mean >= sensitivity, kept in integers.
        if window_sum >= threshold * window_len {
            segments.push(SegmentEndpoints {
                start: segment_start,
                end: pos,
            });
            segment_start = pos;
            window_sum = 0;
            window_len = 0;
        }
    }
    if window_len > 0 {
        segments.push(SegmentEndpoints {
            start: segment_start,
            end: pos,
        });
    }

    log::debug!(
        "split {} chain codes into {} segments (sensitivity {sensitivity})",
        chain.len(),
        segments.len()
    );
    SegmentTrace {
        segments,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn square_chain() -> ChainCode {
        ChainCode::new(
            GridPoint::new(2, 2),
            vec![0, 0, 0, 0, 6, 6, 6, 6, 4, 4, 4, 4, 2, 2, 2, 2],
        )
    }

    fn seg(a: (i32, i32), b: (i32, i32)) -> SegmentEndpoints {
        SegmentEndpoints {
            start: GridPoint::new(a.0, a.1),
            end: GridPoint::new(b.0, b.1),
        }
    }

    #[test]
    fn square_at_sensitivity_one() {
        let trace = build_segments(&square_chain(), 1);
        assert_eq!(trace.segments.len(), 12);
        assert_eq!(trace.segments[0], seg((2, 2), (6, 3)));
        assert_eq!(trace.segments[1], seg((6, 3), (6, 4)));
        assert_eq!(trace.segments[11], seg((2, 3), (2, 2)));
    }

    #[test]
    fn segments_are_contiguous() {
        let trace = build_segments(&square_chain(), 3);
        assert_eq!(trace.segments[0].start, GridPoint::new(2, 2));
        for pair in trace.segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(trace.segments.last().unwrap().end, GridPoint::new(2, 2));
    }

    #[test]
    fn high_sensitivity_flushes_one_segment() {
        let chain = ChainCode::new(GridPoint::new(0, 0), vec![0, 0, 6]);
        let trace = build_segments(&chain, 7);
        assert_eq!(trace.segments, vec![seg((0, 0), (2, 1))]);
    }

    #[test]
    fn looping_window_yields_zero_length_segment() {
        let chain = ChainCode::new(GridPoint::new(1, 1), vec![6, 2]);
        let trace = build_segments(&chain, 7);
        assert_eq!(trace.segments, vec![seg((1, 1), (1, 1))]);
    }

    #[test]
    fn empty_chain_has_no_segments() {
        let chain = ChainCode::new(GridPoint::new(4, 4), Vec::new());
        assert!(build_segments(&chain, 1).segments.is_empty());
    }
}
