use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portfolio_mc::io::{
    create_timestamped_output_dir, read_estimates_csv, write_estimates_csv, write_intervals_csv,
    write_summary_json, write_total_samples_csv,
};
use portfolio_mc::{
    parse_models, run_engine, summarize_run, synthetic_portfolio, EngineConfig, FailurePolicy,
    IntervalMethod,
};

#[derive(Debug, Parser)]
#[command(name = "portfolio-mc")]
#[command(about = "Monte Carlo total-cost intervals for a portfolio of three-point estimates")]
struct Cli {
    /// CSV with header `id,low,central,high`.
    #[arg(long, conflicts_with = "synthetic")]
    estimates: Option<PathBuf>,

    /// Generate this many synthetic projects instead of reading a CSV.
    #[arg(long)]
    synthetic: Option<usize>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "output-portfolio-mc")]
    outdir: PathBuf,

    #[arg(long)]
    draws: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Comma-separated model names.
    #[arg(long)]
    models: Option<String>,

    /// Comma-separated confidence levels, e.g. `0.95,0.89`.
    #[arg(long)]
    levels: Option<String>,

    #[arg(long)]
    policy: Option<FailurePolicy>,

    #[arg(long)]
    interval_method: Option<IntervalMethod>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_levels(raw: &str) -> Result<Vec<f64>> {
    let levels = raw
        .split(',')
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .map(|level| {
            level
                .parse::<f64>()
                .with_context(|| format!("invalid confidence level '{level}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    if levels.is_empty() {
        bail!("levels list cannot be empty");
    }
    Ok(levels)
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(draws) = cli.draws {
        config.draws = draws;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(raw) = &cli.models {
        config.models = parse_models(raw)?;
    }
    if let Some(raw) = &cli.levels {
        config.confidence_levels = parse_levels(raw)?;
    }
    if let Some(policy) = cli.policy {
        config.failure_policy = policy;
    }
    if let Some(method) = cli.interval_method {
        config.interval_method = method;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = resolve_config(&cli)?;
    let run_dir = create_timestamped_output_dir(&cli.outdir).with_context(|| {
        format!(
            "failed to create run directory under {}",
            cli.outdir.display()
        )
    })?;

    let estimates = match (&cli.estimates, cli.synthetic) {
        (Some(path), _) => read_estimates_csv(path)
            .with_context(|| format!("failed to read estimates: {}", path.display()))?,
        (None, Some(count)) => {
            let estimates = synthetic_portfolio(count, config.seed)?;
            write_estimates_csv(&run_dir.join("estimates.csv"), &estimates)?;
            estimates
        }
        (None, None) => bail!("either --estimates <csv> or --synthetic <n> is required"),
    };

    info!(
        projects = estimates.len(),
        draws = config.draws,
        seed = config.seed,
        "starting run"
    );
    let run = run_engine(&estimates, &config).context("engine run failed")?;

    for model_run in &run.models {
        let path = run_dir.join(format!("total_samples_{}.csv", model_run.model));
        write_total_samples_csv(&path, &model_run.simulation)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    let records = run.interval_records();
    write_intervals_csv(&run_dir.join("intervals.csv"), &records)?;
    write_summary_json(&run_dir.join("summary.json"), &summarize_run(&run))?;

    for model_run in &run.models {
        for failure in &model_run.simulation.failures {
            println!(
                "model={} omitted={} reason={}",
                model_run.model, failure.project_id, failure.reason
            );
        }
    }
    for record in &records {
        println!(
            "model={} level={:.2} lower={:.2} upper={:.2} width={:.2} segments={}",
            record.model,
            record.confidence_level,
            record.lower,
            record.upper,
            record.width,
            record.segments
        );
    }
    println!("outputs: {}", run_dir.display());

    Ok(())
}
