//! lgraph: run LG graph extraction on an image file.
//!
//! Runs the pipeline with configurable parameters, prints per-stage
//! diagnostics and optionally writes the graph as JSON, an SVG overlay or
//! chain-code records (JSON Lines). Useful for:
//!
//! - Tuning cluster count, iterations and line sensitivity
//! - Measuring per-stage durations to identify bottlenecks
//! - Producing chain-code records for a downstream store
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lgraph -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use lgraph_pipeline::diagnostics::PipelineDiagnostics;
use lgraph_pipeline::{LgGraph, PipelineConfig};

/// Local-Global graph extraction from grayscale images.
///
/// Segments the image, grows regions, traces their boundaries and prints
/// detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "lgraph", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Number of clusters for segmentation (at least 2).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CLUSTERS)]
    clusters: usize,

    /// Clustering iterations.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ITERATIONS)]
    iterations: usize,

    /// Random seed for cluster initialisation.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SEED)]
    seed: u64,

    /// Skip the majority filter after clustering (5x5 vote, 18 of 25,
    /// rewriting the inner 3x3 block).
    #[arg(long)]
    no_majority_filter: bool,

    /// Region-growing threshold, normalised intensity in (0, 1].
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_INTENSITY_DISTANCE)]
    max_intensity_distance: f64,

    /// Line-segment sensitivity (minimum mean direction code per segment).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SENSITIVITY)]
    sensitivity: u32,

    /// Write the LG graph as JSON to this file.
    #[arg(long)]
    graph_json: Option<PathBuf>,

    /// Write an SVG overlay to this file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Write chain-code records (JSON Lines) to this file.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// `--config-json` wins over the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            clusters: cli.clusters,
            iterations: cli.iterations,
            seed: cli.seed,
            majority_filter: !cli.no_majority_filter,
            max_intensity_distance: cli.max_intensity_distance,
            sensitivity: cli.sensitivity,
            ..PipelineConfig::default()
        }
    };
    config
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match lgraph_pipeline::process_with_diagnostics(&image_bytes, &config) {
            Ok((graph, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Outputs come from the first run only.
                if run == 0 && !write_outputs(&cli, &config, &graph) {
                    return ExitCode::FAILURE;
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                log::error!("pipeline failed on {}: {e}", cli.image_path.display());
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write every requested output file. Returns `false` if any failed.
fn write_outputs(cli: &Cli, config: &PipelineConfig, graph: &LgGraph) -> bool {
    let filename = cli
        .image_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let mut ok = true;

    if let Some(ref path) = cli.graph_json {
        ok &= match serde_json::to_string_pretty(graph) {
            Ok(json) => write_file(path, "Graph JSON", &json),
            Err(e) => {
                eprintln!("Error serializing graph: {e}");
                false
            }
        };
    }

    if let Some(ref path) = cli.svg {
        let config_json = serde_json::to_string(config).ok();
        let options = lgraph_export::SvgOptions {
            title: Some(filename),
            config_json: config_json.as_deref(),
            ..lgraph_export::SvgOptions::default()
        };
        ok &= write_file(path, "SVG", &lgraph_export::to_svg(graph, &options));
    }

    if let Some(ref path) = cli.records {
        let records = lgraph_export::records_from_graph(filename, graph);
        ok &= match lgraph_export::to_json_lines(&records) {
            Ok(text) => write_file(path, "Records", &text),
            Err(e) => {
                eprintln!("Error serializing records: {e}");
                false
            }
        };
    }

    ok
}

fn write_file(path: &Path, what: &str, contents: &str) -> bool {
    match std::fs::write(path, contents) {
        Ok(()) => {
            eprintln!(
                "{what} written to {} ({} bytes)",
                path.display(),
                contents.len(),
            );
            true
        }
        Err(e) => {
            eprintln!("Error writing {what} to {}: {e}", path.display());
            false
        }
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| d.decode.as_ref().map(|s| s.duration)),
        ("Segmentation", |d| Some(d.segmentation.duration)),
        ("Region Scan", |d| Some(d.region_scan.duration)),
        ("Contour Tracing", |d| Some(d.contour_tracing.duration)),
        ("Line Building", |d| Some(d.line_building.duration)),
        ("Shape Description", |d| Some(d.shape_description.duration)),
        ("Assembly", |d| Some(d.assembly.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
