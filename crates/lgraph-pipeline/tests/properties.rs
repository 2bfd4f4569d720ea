//! End-to-end properties of the extraction pipeline.

#![allow(clippy::unwrap_used)]

use lgraph_pipeline::{
    GridPoint, Pipeline, PipelineConfig, PipelineError, Raster, extract,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A raster with a few overlapping rectangles of distinct intensity on a
/// dark, slightly noisy background.
fn blocks_raster(seed: u64) -> Raster {
    let mut rng = StdRng::seed_from_u64(seed);
    let rects: Vec<(u32, u32, u32, u32, f32)> = (0..4)
        .map(|i| {
            let row = rng.gen_range(0..18);
            let col = rng.gen_range(0..18);
            let h = rng.gen_range(3..9);
            let w = rng.gen_range(3..9);
            #[allow(clippy::cast_precision_loss)]
            let level = 0.35 + 0.2 * i as f32;
            (row, col, h, w, level)
        })
        .collect();
    let noise: Vec<f32> = (0..24 * 24).map(|_| rng.gen_range(0.0..0.05)).collect();
    Raster::from_fn(24, 24, |row, col| {
        let base = noise[(row * 24 + col) as usize];
        rects
            .iter()
            .rev()
            .find(|&&(r, c, h, w, _)| (r..r + h).contains(&row) && (c..c + w).contains(&col))
            .map_or(base, |&(_, _, _, _, level)| level)
    })
}

fn config() -> PipelineConfig {
    PipelineConfig {
        clusters: 3,
        iterations: 5,
        sensitivity: 2,
        ..PipelineConfig::default()
    }
}

#[test]
fn segmentation_is_deterministic() {
    init_logging();
    let raster = blocks_raster(7);
    let a = Pipeline::new(raster.clone(), config()).segment().unwrap();
    let b = Pipeline::new(raster, config()).segment().unwrap();
    assert_eq!(a.segmentation().labels, b.segmentation().labels);
    assert_eq!(a.segmentation().clusters, b.segmentation().clusters);
}

#[test]
fn graphs_are_deterministic() {
    let raster = blocks_raster(11);
    let a = extract(&raster, &config()).unwrap();
    let b = extract(&raster, &config()).unwrap();
    assert_eq!(a.region_count, b.region_count);
    for (x, y) in a.nodes.iter().zip(&b.nodes) {
        assert_eq!(x.chain_code, y.chain_code);
        assert_eq!(x.lines, y.lines);
    }
    assert_eq!(a.relations, b.relations);
}

#[test]
fn regions_partition_the_foreground() {
    init_logging();
    for seed in 0..5 {
        let segmented = Pipeline::new(blocks_raster(seed), config())
            .segment()
            .unwrap();
        let labels = segmented.segmentation().labels.clone();
        let scanned = segmented.scan_regions().unwrap();
        for (x, y, p) in labels.enumerate_pixels() {
            let cell = GridPoint::new(i32::try_from(y).unwrap(), i32::try_from(x).unwrap());
            let owners = scanned.regions().iter().filter(|r| r.contains(cell)).count();
            let expected = usize::from(p.0[0] != 0);
            assert_eq!(owners, expected, "seed {seed}, pixel ({y}, {x})");
        }
    }
}

#[test]
fn contours_close_and_replay_to_their_border() {
    init_logging();
    for seed in 0..5 {
        let traced = Pipeline::new(blocks_raster(seed), config())
            .segment()
            .and_then(|s| s.scan_regions())
            .and_then(|s| s.trace_contours())
            .unwrap();
        for (region, contour) in traced.regions().iter().zip(traced.contours()) {
            assert!(contour.chain_code.is_closed());
            let (w, h) = contour.border.dimensions();
            assert_eq!((w, h), region.mask.dimensions());
            assert_eq!(
                contour.chain_code.render(w, h, region.origin).as_raw(),
                contour.border.as_raw()
            );
        }
    }
}

#[test]
fn borders_lie_inside_their_regions() {
    let graph = extract(&blocks_raster(3), &config()).unwrap();
    for node in &graph.nodes {
        for (x, y, p) in node.border.enumerate_pixels() {
            if p.0[0] != 0 {
                assert_ne!(node.mask.get_pixel(x, y).0[0], 0, "node {} at ({y}, {x})", node.id);
            }
        }
    }
}

#[test]
fn connectivity_never_self_loops() {
    let graph = extract(&blocks_raster(5), &config()).unwrap();
    for node in &graph.nodes {
        for line in &node.lines {
            assert!(line.length > 0.0);
            assert!(!line.connections.contains(&line.seq));
            for &other in &line.connections {
                assert_eq!(node.lines[other].start, line.start);
            }
        }
    }
}

#[test]
fn centroid_of_rectangle_is_its_mean_coordinate() {
    let raster = Raster::from_fn(16, 20, |row, col| {
        if (3..9).contains(&row) && (4..15).contains(&col) {
            0.9
        } else {
            0.1
        }
    });
    let config = PipelineConfig {
        clusters: 2,
        iterations: 3,
        majority_filter: false,
        ..PipelineConfig::default()
    };
    let graph = extract(&raster, &config).unwrap();
    assert_eq!(graph.region_count, 1);
    let c = graph.nodes[0].centroid;
    assert!((c.x - 9.0).abs() < 1e-9);
    assert!((c.y - 5.5).abs() < 1e-9);
    assert_eq!(graph.nodes[0].size, 66);
}

#[test]
fn nodes_and_relations_follow_scan_order() {
    let graph = extract(&blocks_raster(9), &config()).unwrap();
    for (i, node) in graph.nodes.iter().enumerate() {
        assert_eq!(node.id, i);
    }
    assert_eq!(graph.relations.len(), graph.region_count.saturating_sub(1));
    for (i, rel) in graph.relations.iter().enumerate() {
        assert_eq!(rel.node, i + 1);
    }
}

#[test]
fn growth_cap_is_reported() {
    let config = PipelineConfig {
        growth_step_limit: Some(2),
        ..config()
    };
    let result = extract(&blocks_raster(1), &config);
    assert!(matches!(
        result,
        Err(PipelineError::RegionGrowthExceeded { limit: 2, .. })
    ));
}
