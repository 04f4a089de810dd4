use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use goldsight_inference::{
    load_source_dir, CancellationToken, ForecastConfig, ForecastPipeline, ModelRegistry,
    ScenarioRequest,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "goldsight",
    about = "Serve gold price forecasts from a catalog of sequence models",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model catalog manifest
    #[arg(short, long, global = true, default_value = "models/catalog.toml")]
    models: PathBuf,

    /// Directory of `<source>.csv` files
    #[arg(short, long, global = true, default_value = "data")]
    data: PathBuf,

    /// Pipeline configuration (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Next-day forecast from every catalogued model
    Forecast {
        /// Window end date (defaults to the latest row)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Roll forward under constant indicator levels
    Scenario {
        /// Indicator override, e.g. `--set VIX=35`; repeatable
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, f64)>,

        /// Days to roll forward
        #[arg(long, default_value_t = 6)]
        steps: usize,
    },

    /// Replay historical windows and report realized accuracy
    Backtest {
        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,
    },

    /// List catalogued models and their load status
    Models,
}

fn parse_override(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

#[derive(Serialize)]
struct ModelListing<'a> {
    name: &'a str,
    architecture: String,
    input: (usize, usize),
    scaler: &'a str,
    r2: f64,
    loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "goldsight starting");

    let config = ForecastConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let registry = Arc::new(
        ModelRegistry::load(&cli.models, &config)
            .with_context(|| format!("loading model catalog {}", cli.models.display()))?,
    );

    if let Commands::Models = cli.command {
        let listing: Vec<ModelListing<'_>> = registry
            .models()
            .iter()
            .map(|m| ModelListing {
                name: &m.descriptor.name,
                architecture: m.descriptor.architecture.to_string(),
                input: m.descriptor.input.dims(),
                scaler: &m.descriptor.scaler,
                r2: m.descriptor.metrics.r2,
                loaded: m.is_loaded(),
                error: m.model.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        return emit(&listing, cli.pretty);
    }

    let pipeline = ForecastPipeline::new(config, registry);
    let token = CancellationToken::new();

    let sources = load_source_dir(&cli.data)
        .with_context(|| format!("reading sources from {}", cli.data.display()))?;
    if sources.is_empty() {
        bail!("no source CSV files found in {}", cli.data.display());
    }
    let prepared = pipeline.prepare(&sources, &token)?;

    match cli.command {
        Commands::Forecast { date } => {
            let report = match date {
                Some(date) => pipeline.forecast(&prepared, date, &token)?,
                None => pipeline.forecast_latest(&prepared, &token)?,
            };
            emit(&report, cli.pretty)
        }
        Commands::Scenario { overrides, steps } => {
            let overrides: BTreeMap<String, f64> = overrides.into_iter().collect();
            let request = ScenarioRequest::from_overrides(&prepared.table, &overrides, steps)?;
            let forecast = pipeline.scenario(&prepared, &request, &token)?;
            emit(&forecast, cli.pretty)
        }
        Commands::Backtest { from, to } => {
            let report = pipeline.backtest(&prepared, from, to, &token)?;
            emit(&report, cli.pretty)
        }
        Commands::Models => Ok(()),
    }
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
