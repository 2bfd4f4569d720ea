//! Shape description: line segments with geometry and shared-anchor
//! connectivity (the "local graph" of a region).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::lines::SegmentEndpoints;
use crate::types::GridPoint;

/// A described boundary segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    /// Sequence number, ascending in boundary order.
    pub seq: usize,
    /// Start cell.
    pub start: GridPoint,
    /// End cell.
    pub end: GridPoint,
    /// Euclidean length in pixels. Always positive.
    pub length: f64,
    /// `atan2(d_row, d_col)` in degrees, in `(-180, 180]`.
    pub orientation_deg: f64,
    /// Placeholder, always `0.0`.
    pub curvature: f64,
    /// Sequence numbers of the other segments that start at this
    /// segment's start cell.
    pub connections: Vec<usize>,
}

/// Output of [`describe`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalGraph {
    /// Described segments, indexed by `seq`.
    pub lines: Vec<LineSegment>,
    /// Time spent describing.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub elapsed: Duration,
}

impl LocalGraph {
    /// Total connectivity entries across all segments. A shared anchor
    /// between two segments contributes two entries.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lines.iter().map(|l| l.connections.len()).sum()
    }
}

/// Describe segments and link those sharing a start cell.
///
/// Zero-length segments are dropped before sequence numbers are
/// assigned.
#[must_use]
pub fn describe(segments: &[SegmentEndpoints]) -> LocalGraph {
    let started = Instant::now();

    let mut lines: Vec<LineSegment> = segments
        .iter()
        .filter(|s| s.start != s.end)
        .enumerate()
        .map(|(seq, s)| {
            let d_row = f64::from(s.end.row - s.start.row);
            let d_col = f64::from(s.end.col - s.start.col);
            LineSegment {
                seq,
                start: s.start,
                end: s.end,
                length: d_row.hypot(d_col),
                orientation_deg: d_row.atan2(d_col).to_degrees(),
                curvature: 0.0,
                connections: Vec::new(),
            }
        })
        .collect();

    let dropped = segments.len() - lines.len();
    if dropped > 0 {
        log::debug!("dropped {dropped} zero-length segments");
    }

    let links: Vec<Vec<usize>> = lines
        .iter()
        .map(|line| {
            lines
                .iter()
                .filter(|other| {
                    other.seq != line.seq && other.start == line.start && other.end != other.start
                })
                .map(|other| other.seq)
                .collect()
        })
        .collect();
    for (line, connections) in lines.iter_mut().zip(links) {
        line.connections = connections;
    }

    LocalGraph {
        lines,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(a: (i32, i32), b: (i32, i32)) -> SegmentEndpoints {
        SegmentEndpoints {
            start: GridPoint::new(a.0, a.1),
            end: GridPoint::new(b.0, b.1),
        }
    }

    #[test]
    fn length_and_orientation() {
        let graph = describe(&[
            seg((0, 0), (0, 4)),
            seg((0, 4), (3, 4)),
            seg((3, 4), (0, 0)),
        ]);
        assert_eq!(graph.lines.len(), 3);
        let (east, south, back) = (&graph.lines[0], &graph.lines[1], &graph.lines[2]);
        assert!((east.length - 4.0).abs() < 1e-12);
        assert!(east.orientation_deg.abs() < 1e-12);
        assert!((south.orientation_deg - 90.0).abs() < 1e-12);
        assert!((back.length - 5.0).abs() < 1e-12);
        assert!((back.orientation_deg - (-3.0_f64).atan2(-4.0).to_degrees()).abs() < 1e-12);
        assert!(graph.lines.iter().all(|l| l.curvature.abs() < f64::EPSILON));
    }

    #[test]
    fn zero_length_segments_are_dropped_before_numbering() {
        let graph = describe(&[
            seg((1, 1), (1, 1)),
            seg((1, 1), (2, 1)),
            seg((2, 1), (2, 1)),
            seg((2, 1), (2, 2)),
        ]);
        let seqs: Vec<usize> = graph.lines.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(graph.lines[1].start, GridPoint::new(2, 1));
    }

    #[test]
    fn shared_start_links_every_sibling() {
        let graph = describe(&[
            seg((5, 5), (5, 6)),
            seg((5, 6), (5, 5)),
            seg((5, 5), (6, 5)),
            seg((6, 5), (5, 5)),
            seg((5, 5), (4, 4)),
        ]);
        assert_eq!(graph.lines[0].connections, vec![2, 4]);
        assert_eq!(graph.lines[2].connections, vec![0, 4]);
        assert_eq!(graph.lines[4].connections, vec![0, 2]);
        assert!(graph.lines[1].connections.is_empty());
        assert_eq!(graph.connection_count(), 6);
    }

    #[test]
    fn no_segment_connects_to_itself() {
        let graph = describe(&[
            seg((0, 0), (0, 1)),
            seg((0, 0), (1, 0)),
            seg((0, 0), (1, 1)),
        ]);
        for line in &graph.lines {
            assert!(!line.connections.contains(&line.seq));
            for &other in &line.connections {
                assert_eq!(graph.lines[other].start, line.start);
            }
        }
    }

    #[test]
    fn empty_input() {
        let graph = describe(&[]);
        assert!(graph.lines.is_empty());
        assert_eq!(graph.connection_count(), 0);
    }
}
