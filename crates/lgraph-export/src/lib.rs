//! lgraph-export: Pure serializers and persistence interfaces (sans-IO)
//!
//! Converts LG graphs into chain-code persistence records (plain structs,
//! JSON Lines) and SVG overlays. Storage backends plug in through
//! [`RecordStore`].

pub mod records;
pub mod svg;

pub use records::{
    ChainCodeRecord, MemoryStore, RecordStore, StoreError, from_json_lines, parse_chain_code,
    persist_graph, records_from_graph, to_json_lines,
};
pub use svg::{SvgOptions, to_svg};
