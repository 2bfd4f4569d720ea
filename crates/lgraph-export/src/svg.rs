//! SVG overlay of an LG graph.
//!
//! Renders, in raster pixel coordinates (`x = col`, `y = row`):
//!
//! - `<g id="borders">`: each region's chain code as a closed `<path>`
//! - `<g id="lines">`: every local-graph segment as a `<line>`
//! - `<g id="centroids">`: each region centroid as a `<circle>`
//! - `<g id="global-graph">`: spokes from the first centroid to every
//!   other centroid
//!
//! Document construction, XML escaping and path data formatting are
//! delegated to the [`svg`] crate. This is a pure function with no I/O.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Group, Line, Path, Title};
use svg::node::{Node, Text, Value};

use lgraph_pipeline::{ChainCode, LgGraph};

/// Stroke colors cycled per region.
const REGION_COLORS: [&str; 6] = [
    "#1f77b4", "#d62728", "#2ca02c", "#9467bd", "#ff7f0e", "#17becf",
];

/// What to draw and which metadata to embed.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct SvgOptions<'a> {
    /// Emitted as `<title>`.
    pub title: Option<&'a str>,
    /// Emitted as `<desc>`.
    pub description: Option<&'a str>,
    /// Serialized pipeline configuration, embedded under `<metadata>`.
    pub config_json: Option<&'a str>,
    /// Draw region borders.
    pub borders: bool,
    /// Draw local-graph segments.
    pub lines: bool,
    /// Draw centroids.
    pub centroids: bool,
    /// Draw global-graph spokes.
    pub global_graph: bool,
}

impl Default for SvgOptions<'_> {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            config_json: None,
            borders: true,
            lines: true,
            centroids: true,
            global_graph: true,
        }
    }
}

/// Build an SVG path `d` attribute string from a chain code.
///
/// Closed chains end with `z`. Returns an empty string for a
/// single-cell chain.
///
/// # Examples
///
/// ```
/// use lgraph_pipeline::{ChainCode, GridPoint};
/// use lgraph_export::svg::chain_path_data;
///
/// let chain = ChainCode::new(GridPoint::new(1, 1), vec![0, 6, 4, 2]);
/// assert_eq!(chain_path_data(&chain), "M1,1 L1,2 L2,2 L2,1 L1,1 z");
/// ```
#[must_use]
pub fn chain_path_data(chain: &ChainCode) -> String {
    if chain.is_empty() {
        return String::new();
    }
    let mut points = chain
        .replay()
        .map(|p| (f64::from(p.col), f64::from(p.row)));
    let Some(first) = points.next() else {
        return String::new();
    };
    let mut data = Data::new().move_to(first);
    for p in points {
        data = data.line_to(p);
    }
    if chain.is_closed() {
        data = data.close();
    }
    String::from(Value::from(data))
}

fn color(index: usize) -> &'static str {
    REGION_COLORS[index % REGION_COLORS.len()]
}

/// Serialize an LG graph into an SVG document string.
#[must_use]
pub fn to_svg(graph: &LgGraph, options: &SvgOptions<'_>) -> String {
    let (w, h) = (graph.dimensions.width, graph.dimensions.height);
    let mut doc = Document::new()
        .set("width", w)
        .set("height", h)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = options.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = options.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = options.config_json {
        let mut config_el = Element::new("lgraph:config");
        config_el.assign("xmlns:lgraph", "urn:lgraph:config");
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    if options.borders {
        let mut group = Group::new().set("id", "borders").set("fill", "none");
        for node in &graph.nodes {
            let d = chain_path_data(&node.chain_code);
            if d.is_empty() {
                continue;
            }
            group = group.add(
                Path::new()
                    .set("d", d)
                    .set("stroke", color(node.id))
                    .set("stroke-width", 0.5)
                    .set("data-region", node.id),
            );
        }
        doc = doc.add(group);
    }

    if options.lines {
        let mut group = Group::new()
            .set("id", "lines")
            .set("stroke", "black")
            .set("stroke-width", 0.25);
        for node in &graph.nodes {
            for line in &node.lines {
                group = group.add(
                    Line::new()
                        .set("x1", line.start.col)
                        .set("y1", line.start.row)
                        .set("x2", line.end.col)
                        .set("y2", line.end.row)
                        .set("data-region", node.id)
                        .set("data-seq", line.seq),
                );
            }
        }
        doc = doc.add(group);
    }

    if options.global_graph
        && let Some(origin) = graph.nodes.first().map(|n| n.centroid)
    {
        let mut group = Group::new()
            .set("id", "global-graph")
            .set("stroke", "gray")
            .set("stroke-width", 0.25)
            .set("stroke-dasharray", "1 1");
        for node in graph.nodes.iter().skip(1) {
            group = group.add(
                Line::new()
                    .set("x1", origin.x)
                    .set("y1", origin.y)
                    .set("x2", node.centroid.x)
                    .set("y2", node.centroid.y),
            );
        }
        doc = doc.add(group);
    }

    if options.centroids {
        let mut group = Group::new().set("id", "centroids");
        for node in &graph.nodes {
            group = group.add(
                Circle::new()
                    .set("cx", node.centroid.x)
                    .set("cy", node.centroid.y)
                    .set("r", 1)
                    .set("fill", color(node.id))
                    .set("data-region", node.id),
            );
        }
        doc = doc.add(group);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
