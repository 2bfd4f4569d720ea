//! Export of a real pipeline run.

#![allow(clippy::unwrap_used)]

use lgraph_export::{
    ChainCodeRecord, MemoryStore, RecordStore, StoreError, SvgOptions, from_json_lines,
    parse_chain_code, persist_graph, records_from_graph, to_json_lines, to_svg,
};
use lgraph_pipeline::{LgGraph, PipelineConfig, process};

/// PNG of a 10x10 black image with a white 5x5 square at rows/cols
/// 2..=6.
fn square_png() -> Vec<u8> {
    let img = image::GrayImage::from_fn(10, 10, |x, y| {
        let inside = (2..7).contains(&x) && (2..7).contains(&y);
        image::Luma([if inside { 255 } else { 0 }])
    });
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::L8,
    )
    .unwrap();
    buf
}

fn graph() -> LgGraph {
    let config = PipelineConfig {
        clusters: 2,
        iterations: 1,
        sensitivity: 1,
        majority_filter: false,
        ..PipelineConfig::default()
    };
    process(&square_png(), &config).unwrap()
}

#[test]
fn records_replay_to_node_chain_codes() {
    let graph = graph();
    assert_eq!(graph.region_count, 1);
    let records = records_from_graph("square.png", &graph);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chain_code, "0,0,0,0,6,6,6,6,4,4,4,4,2,2,2,2");
    assert_eq!(from_json_lines(&to_json_lines(&records).unwrap()).unwrap(), records);
    for (record, node) in records.iter().zip(&graph.nodes) {
        assert_eq!(record.region_index, node.id);
        assert_eq!(parse_chain_code(&record.chain_code).unwrap(), node.chain_code.codes);
    }
}

#[test]
fn persisting_twice_is_rejected_by_memory_store() {
    let graph = graph();
    let mut store = MemoryStore::new();
    assert_eq!(persist_graph(&mut store, "square.png", &graph).unwrap(), 1);
    assert!(matches!(
        persist_graph(&mut store, "square.png", &graph),
        Err(StoreError::Duplicate { .. })
    ));
    assert_eq!(persist_graph(&mut store, "copy.png", &graph).unwrap(), 1);
    assert_eq!(store.len(), 2);
    assert_eq!(
        store.get("copy.png", 0).unwrap().codes().unwrap(),
        graph.nodes[0].chain_code.codes
    );
}

/// A store that fails after a fixed number of inserts.
struct FlakyStore {
    remaining: usize,
    seen: Vec<ChainCodeRecord>,
}

impl RecordStore for FlakyStore {
    fn insert(&mut self, record: ChainCodeRecord) -> Result<(), StoreError> {
        if self.remaining == 0 {
            return Err(StoreError::Backend("connection lost".to_string()));
        }
        self.remaining -= 1;
        self.seen.push(record);
        Ok(())
    }
}

#[test]
fn store_failure_stops_persisting() {
    let graph = graph();
    let mut store = FlakyStore {
        remaining: 0,
        seen: Vec::new(),
    };
    let err = persist_graph(&mut store, "square.png", &graph).unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    assert!(store.seen.is_empty());
}

#[test]
fn svg_draws_every_layer() {
    let graph = graph();
    let svg = to_svg(&graph, &SvgOptions::default());
    assert_eq!(svg.matches("<path").count(), 1);
    assert_eq!(svg.matches("<circle").count(), 1);
    assert!(svg.contains(r#"d="M2,2 "#));
    assert!(svg.contains(r#"viewBox="0 0 10 10""#));

    let borders_only = to_svg(
        &graph,
        &SvgOptions {
            lines: false,
            centroids: false,
            global_graph: false,
            ..SvgOptions::default()
        },
    );
    assert!(!borders_only.contains("<circle"));
    assert!(!borders_only.contains("<line"));
}
