//! xflow CLI: run, validate and explain graph descriptions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xflow_core::prelude::{EngineConfig, GraphDef};
use xflow_core::target::CollectingErrorTarget;
use xflow_exec::Engine;
use xflow_graph::dot::render_graphviz;
use xflow_graph::yaml::load_graph;

#[derive(Parser)]
#[command(name = "xflow")]
#[command(about = "xflow: demand-driven dataflow execution with governed cache pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph description and print the rows its root produces
    Run {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        /// Total cache pages (overrides config)
        #[arg(long)]
        cache_pages: Option<u32>,

        /// Tuples per execute call (overrides config)
        #[arg(long)]
        quantum: Option<u32>,

        /// Print rows and the run report as one JSON document
        #[arg(long)]
        json: bool,
    },

    /// Build and prepare a graph without running it
    Validate {
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Show the prepared graph: stream order, adapters and DOT rendering
    Explain {
        #[arg(short, long)]
        graph: PathBuf,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            graph,
            cache_pages,
            quantum,
            json,
        } => {
            if let Err(e) = run_graph(&graph, cache_pages, quantum, json) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Validate { graph } => match validate_graph(&graph) {
            Ok(streams) => println!("✓ Graph is valid ({streams} streams after adapters)"),
            Err(e) => {
                eprintln!("Validation failed: {e}");
                std::process::exit(1);
            }
        },
        Commands::Explain { graph } => {
            if let Err(e) = explain_graph(&graph) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Effective config: the description's `config` block (or the environment
/// when it has none), then command-line flags. The result is written back
/// into `def` so the statement runs with it too.
fn apply_overrides(def: &mut GraphDef, cache_pages: Option<u32>, quantum: Option<u32>) -> EngineConfig {
    let mut cfg = def.config.clone().unwrap_or_else(EngineConfig::from_env);
    if let Some(pages) = cache_pages {
        cfg.cache_pages = pages;
    }
    if let Some(q) = quantum {
        cfg.quantum_tuples = Some(q);
    }
    def.config = Some(cfg.clone());
    cfg
}

fn load(path: &Path, cache_pages: Option<u32>, quantum: Option<u32>) -> Result<(GraphDef, Engine), Box<dyn std::error::Error>> {
    let mut def = load_graph(path)?;
    let cfg = apply_overrides(&mut def, cache_pages, quantum);
    let engine = Engine::new(cfg)?;
    Ok((def, engine))
}

fn run_graph(
    path: &Path,
    cache_pages: Option<u32>,
    quantum: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (def, mut engine) = load(path, cache_pages, quantum)?;
    let errors = Arc::new(CollectingErrorTarget::new());
    engine.set_error_target(errors.clone());

    let out = engine.run(&def)?;

    if json {
        let doc = serde_json::json!({
            "rows": out.rows,
            "report": out.report,
            "errors": errors.len(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    for row in &out.rows {
        println!("{row}");
    }
    println!("✓ Graph executed successfully");
    println!("  Rows: {}", out.report.rows);
    println!("  Streams: {}", out.report.streams);
    println!("  Pages granted: {}", out.report.pages_granted);
    println!("  Duration: {}ms", out.report.duration_ms());
    println!("  Graph hash: {}", out.report.graph_hash.short());
    for record in errors.records() {
        eprintln!("  [{:?}] {}: {}", record.level, record.source, record.message);
    }
    Ok(())
}

fn validate_graph(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let (def, engine) = load(path, None, None)?;
    let graph = engine.build(&def)?;
    Ok(graph.stream_count())
}

fn explain_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (def, engine) = load(path, None, None)?;
    let graph = engine.build(&def)?;
    let cfg = engine.config();

    println!("Graph Execution Plan");
    println!("====================");
    println!();
    println!(
        "Cache: {} pages x {} bytes, reserve {}%, {} concurrent statements",
        cfg.cache_pages,
        cfg.page_size_bytes,
        cfg.cache_reserve_percentage,
        cfg.expected_concurrent_statements
    );
    match cfg.quantum_tuples {
        Some(q) => println!("Quantum: {q} tuples"),
        None => println!("Quantum: unbounded"),
    }
    println!();
    println!("Stream Order:");
    for (i, &id) in graph.sorted_streams().iter().enumerate() {
        let req = graph.stream(id).resource_requirements();
        println!(
            "  {}. {} ({}){} - {} in / {} out, pages min {} opt {} {:?}",
            i + 1,
            graph.stream_name(id),
            graph.stream(id).kind(),
            if graph.is_adapter(id) { " [adapter]" } else { "" },
            graph.input_count(id),
            graph.output_count(id),
            req.min.cache_pages,
            req.opt.cache_pages,
            req.setting
        );
    }
    println!();
    println!("Graphviz:");
    print!("{}", render_graphviz(&graph));
    Ok(())
}
