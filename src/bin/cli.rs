//! Simile CLI
//!
//! Command-line demonstration of the index engine:
//! - Build an index over a generated series and write a chunk file
//! - Inspect a chunk file
//! - Run a pruning query against a chunk file

use chrono::TimeZone;
use clap::{Parser, Subcommand};
use simile::{
    BufferPool, EngineConfig, IndexFileReader, IndexFileWriter, IndexProps, IndexQueryReader,
    MbrIndex, TsDataType,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "simile")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Similarity-search index engine for time-series data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an index over a generated sine series and write a chunk file
    Build {
        /// Output chunk file
        #[arg(short, long)]
        out: PathBuf,
        /// Number of points to generate
        #[arg(long, default_value = "4096")]
        points: usize,
        /// Window length in points
        #[arg(long, default_value = "32")]
        window: usize,
        /// Slide step in points
        #[arg(long, default_value = "1")]
        step: usize,
        /// ELB block count (feature dimension)
        #[arg(long, default_value = "4")]
        blocks: usize,
        /// Windows per flushed chunk
        #[arg(long, default_value = "512")]
        chunk_windows: usize,
        /// Series path recorded in the chunks
        #[arg(long, default_value = "root.demo.s1")]
        path: String,
    },

    /// List the chunks of a chunk file
    Inspect {
        /// Chunk file to read
        file: PathBuf,
    },

    /// Run a pruning query against a chunk file
    Query {
        /// Chunk file to read
        file: PathBuf,
        /// Comma-separated pattern values
        #[arg(short, long)]
        pattern: String,
        /// Similarity threshold
        #[arg(short, long, default_value = "1.0")]
        threshold: f64,
        /// Window length the index was built with
        #[arg(long, default_value = "32")]
        window: usize,
        /// ELB block count the index was built with
        #[arg(long, default_value = "4")]
        blocks: usize,
        /// Series path to query
        #[arg(long, default_value = "root.demo.s1")]
        path: String,
        /// Probe granularity in milliseconds
        #[arg(long, default_value = "10000")]
        probe_ms: i64,
    },
}

fn index_props(window: usize, step: usize, blocks: usize) -> IndexProps {
    let mut props = IndexProps::new();
    props.insert("index_window_range".into(), window.to_string());
    props.insert("index_slide_step".into(), step.to_string());
    props.insert("feature_dim".into(), blocks.to_string());
    props
}

/// Deterministic demo series: a slow sine with a sharper ripple
fn generate_points(count: usize) -> Vec<(i64, f64)> {
    (0..count)
        .map(|i| {
            let t = i as f64;
            let value = (t / 40.0).sin() * 10.0 + (t / 7.0).sin();
            (i as i64 * 1000, value)
        })
        .collect()
}

fn format_time(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn run_build(
    out: PathBuf,
    points: usize,
    window: usize,
    step: usize,
    blocks: usize,
    chunk_windows: usize,
    path: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new());
    let engine = EngineConfig::load_default();
    let mut index = MbrIndex::new(
        path.clone(),
        TsDataType::F64,
        0,
        &index_props(window, step, blocks),
        &engine,
        &pool,
    )?;

    let data = generate_points(points);
    index.start_flush_task(&data)?;

    let mut writer = IndexFileWriter::create(&out)?;
    let mut built = 0usize;
    while index.has_next_window(None)? {
        index.process_next_window()?;
        index.build_next()?;
        built += 1;
        if built % chunk_windows == 0 {
            if let Some(chunk) = index.flush()? {
                writer.append(&chunk)?;
            }
            index.clear();
        }
    }
    if let Some(chunk) = index.flush()? {
        writer.append(&chunk)?;
    }
    index.clear();
    index.end_flush_task();

    let metas = writer.finish()?;
    println!(
        "Built {} windows over {} points into {} chunks at {}",
        built,
        points,
        metas.len(),
        out.display()
    );
    Ok(())
}

fn run_inspect(file: PathBuf, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reader = IndexFileReader::open(&file)?;
    if format == "json" {
        let entries: Vec<serde_json::Value> = reader
            .all_metas()
            .iter()
            .map(|m| {
                serde_json::json!({
                    "path": m.path,
                    "index_type": m.index_type.to_string(),
                    "start_time": m.start_time,
                    "end_time": m.end_time,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    println!("{:<20} {:<6} {:<28} {:<28}", "path", "type", "start", "end");
    for meta in reader.all_metas() {
        println!(
            "{:<20} {:<6} {:<28} {:<28}",
            meta.path,
            meta.index_type.to_string(),
            format_time(meta.start_time),
            format_time(meta.end_time)
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_query(
    file: PathBuf,
    pattern: String,
    threshold: f64,
    window: usize,
    blocks: usize,
    path: String,
    probe_ms: i64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new());
    let engine = EngineConfig::load_default();
    let index = MbrIndex::new(
        path.clone(),
        TsDataType::F64,
        0,
        &index_props(window, 1, blocks),
        &engine,
        &pool,
    )?;

    let file_reader = IndexFileReader::open(&file)?;
    let metas = file_reader.chunk_metas(&path);
    if metas.is_empty() {
        println!("No chunks for series {} in {}", path, file.display());
        return Ok(());
    }
    let span_start = metas.iter().map(|m| m.start_time).min().unwrap();
    let span_end = metas.iter().map(|m| m.end_time).max().unwrap();

    let mut reader = IndexQueryReader::new(path, index, None, metas, Vec::new());
    let mut query_props = IndexProps::new();
    query_props.insert("pattern".into(), pattern);
    query_props.insert("threshold".into(), threshold.to_string());
    reader.init_query_condition(&query_props)?;
    reader.update_usable_range(&[span_start, span_end - 1])?;

    // probe the indexed span and report which slices the scan may skip
    let mut skippable = Vec::new();
    let mut probe = span_start;
    while probe <= span_end {
        let end = (probe + probe_ms - 1).min(span_end);
        if reader.can_skip_data_range(probe, end)? {
            skippable.push((probe, end));
        }
        probe += probe_ms;
    }
    reader.release();

    if format == "json" {
        let out = serde_json::json!({
            "span": [span_start, span_end],
            "probe_ms": probe_ms,
            "skippable": skippable,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!(
        "Indexed span [{}, {}], probed every {} ms",
        format_time(span_start),
        format_time(span_end),
        probe_ms
    );
    if skippable.is_empty() {
        println!("No data range can be skipped for this pattern");
    } else {
        println!("Skippable data ranges:");
        for (s, e) in skippable {
            println!("  [{}, {}]", format_time(s), format_time(e));
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            out,
            points,
            window,
            step,
            blocks,
            chunk_windows,
            path,
        } => run_build(out, points, window, step, blocks, chunk_windows, path),
        Commands::Inspect { file } => run_inspect(file, &cli.format),
        Commands::Query {
            file,
            pattern,
            threshold,
            window,
            blocks,
            path,
            probe_ms,
        } => run_query(
            file, pattern, threshold, window, blocks, path, probe_ms, &cli.format,
        ),
    }
}
