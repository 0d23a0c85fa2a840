// ============================================================================
// CHART ENGINE CLI
// ============================================================================
// Offline driver for the engine:
//
//   replay           feed recorded build cycles through an engine, print plans
//   check-config     validate a configuration file
//   selector         evaluate a tag selector against a tag list
//   generate-config  print the default configuration
// ============================================================================

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

use chartengine::{
    init_logging, parse_selector, Engine, EngineConfig, RecordingRuntimeStore, Series, Tags,
};

// ----------------------------------------------------------------------------
// Arguments
// ----------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "chartengine",
    version,
    about = "Metric routing and chart materialization engine",
    long_about = "Routes flattened metric series to chart/dimension bindings using \
                  templates and autogen fallbacks, and replays recorded build cycles \
                  to show the resulting plans."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "chartengine.toml", env = "CHARTENGINE_CONFIG")]
    config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "CHARTENGINE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay recorded build cycles and print one JSON plan per line
    Replay {
        /// JSON file with an array of `{ "build_seq": N, "series": [...] }`
        #[arg(long)]
        cycles: PathBuf,

        /// Print cumulative engine stats after the last cycle
        #[arg(long)]
        stats: bool,
    },

    /// Validate the configuration file
    CheckConfig {
        /// Show the parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Evaluate a selector expression against a set of tags
    Selector {
        /// Selector expression, e.g. `env=prod !canary`
        expr: String,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Print the default configuration as TOML
    GenerateConfig,
}

// ----------------------------------------------------------------------------
// Replay Input
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Cycle {
    build_seq: u64,
    #[serde(default)]
    series: Vec<Series>,
}

fn read_cycles(path: &Path) -> AnyhowResult<Vec<Cycle>> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse cycles from {}", path.display()))
}

fn load_config(path: &Path) -> AnyhowResult<EngineConfig> {
    if path.exists() {
        EngineConfig::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        warn!("Config file not found at {}, using defaults", path.display());
        Ok(EngineConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

fn handle_replay(config: &EngineConfig, cycles: &Path, show_stats: bool) -> AnyhowResult<()> {
    let cycles = read_cycles(cycles)?;
    let store = Arc::new(RecordingRuntimeStore::new());
    let mut engine = Engine::new(config.engine_options().with_runtime_store(store.clone()))
        .context("Failed to build engine")?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for cycle in &cycles {
        let plan = engine.plan(&cycle.series, cycle.build_seq);
        serde_json::to_writer(&mut out, &plan)?;
        writeln!(out)?;
    }

    if show_stats {
        serde_json::to_writer_pretty(&mut out, engine.stats())?;
        writeln!(out)?;
    }
    out.flush()?;

    info!(
        cycles = cycles.len(),
        samples = store.samples().len(),
        charts = engine.materialized().chart_count(),
        cache_hit_ratio = engine.stats().cache_hit_ratio(),
        "Replay finished"
    );
    Ok(())
}

fn handle_check_config(path: &Path, verbose: bool) -> AnyhowResult<()> {
    let config = EngineConfig::load(path).with_context(|| format!("Invalid config {}", path.display()))?;
    println!(
        "Configuration OK: {} template(s), autogen {}",
        config.templates.len(),
        if config.autogen.enabled { "enabled" } else { "disabled" }
    );
    if verbose {
        println!("{config:#?}");
    }
    Ok(())
}

fn handle_selector(expr: &str, tags: &[String]) -> AnyhowResult<()> {
    let selector = parse_selector(expr)?;
    let tags: Tags = tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    println!("{selector} => {}", selector.matches(&tags));
    Ok(())
}

// ----------------------------------------------------------------------------
// Entry Point
// ----------------------------------------------------------------------------

fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenerateConfig => {
            let rendered =
                EngineConfig::generate_default_config().context("Failed to render default configuration")?;
            print!("{rendered}");
            return Ok(());
        }
        Commands::Selector { expr, tags } => return handle_selector(expr, tags),
        _ => {}
    }

    let config = load_config(&cli.config)?;
    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    init_logging(&logging)?;

    match &cli.command {
        Commands::Replay { cycles, stats } => handle_replay(&config, cycles, *stats),
        Commands::CheckConfig { verbose } => handle_check_config(&cli.config, *verbose),
        Commands::GenerateConfig | Commands::Selector { .. } => Ok(()),
    }
}
