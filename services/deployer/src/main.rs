//! Fleet deployer CLI
//!
//! Plans a rollout against snapshots of a fleet without touching any remote
//! system. Snapshots are JSON files as listed by the machines API.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::de::DeserializeOwned;
use tabled::Table;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_deployer::{DeployConfig, Deployment, RolloutPlan};
use fleet_id::{ReleaseId, ReleaseVersion};
use fleet_reconcile::{
    Guest, LaunchContext, Machine, ReleaseMetadata, StaticAppConfig, Volume, VolumePool,
};

/// Fleet rollout tooling.
#[derive(Debug, Parser)]
#[command(name = "deployer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show what a rollout would do.
    Plan(PlanArgs),
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    /// Live machines (JSON array).
    #[arg(long)]
    machines: PathBuf,

    /// Volumes (JSON array).
    #[arg(long)]
    volumes: PathBuf,

    /// App config (JSON object with primary_region and processes).
    #[arg(long)]
    app_config: PathBuf,

    /// Guest override for new machines (JSON object).
    #[arg(long)]
    guest: Option<PathBuf>,

    /// Image reference to deploy.
    #[arg(long)]
    image: String,

    #[arg(long)]
    release_id: String,

    #[arg(long)]
    release_version: u32,

    #[arg(long, default_value = "app")]
    app: String,

    #[arg(long, default_value = "personal")]
    org: String,

    /// Mark machines as belonging to a managed Postgres cluster.
    #[arg(long)]
    managed_postgres: bool,

    /// Plan a restart instead of a deploy. Also set by FLEET_RESTART_ONLY.
    #[arg(long)]
    restart_only: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = DeployConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Plan(args) => plan(args, &config),
    }
}

fn plan(args: PlanArgs, config: &DeployConfig) -> Result<()> {
    let restart_only = args.restart_only || config.restart_only;
    let machines: Vec<Machine> = load_json(&args.machines)?;
    let volumes: Vec<Volume> = load_json(&args.volumes)?;
    let app_config: StaticAppConfig = load_json(&args.app_config)?;
    let guest: Option<Guest> = args.guest.as_deref().map(load_json::<Guest>).transpose()?;

    let release_id = ReleaseId::parse(&args.release_id).context("invalid --release-id")?;
    let release = ReleaseMetadata::new(release_id, ReleaseVersion::new(args.release_version))
        .managed_postgres(args.managed_postgres);

    let deployment = Deployment {
        launch: LaunchContext {
            app: args.app,
            org_slug: args.org,
            image: args.image,
            release,
        },
        guest,
        machines,
        volumes: VolumePool::from_volumes(volumes),
    };

    info!(
        app = %deployment.launch.app,
        machine_count = deployment.machines.len(),
        restart_only,
        "Planning rollout"
    );

    let plan = if restart_only {
        RolloutPlan::restart(&deployment, &app_config)
    } else {
        RolloutPlan::deploy(&deployment, &app_config)?
    };

    match args.format {
        OutputFormat::Table => print_table(&plan),
        OutputFormat::Json => print_json(&plan)?,
    }
    Ok(())
}

fn print_table(plan: &RolloutPlan) {
    if let Some(summary) = plan.diff.summary() {
        println!("{}", summary.trim_end().yellow());
        println!();
    }

    let rows = plan.rows();
    if rows.is_empty() {
        println!("{}", "No machines to deploy.".dimmed());
    } else {
        println!("{}", Table::new(&rows));
    }

    for warning in plan.warnings() {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning);
    }

    let replacements = plan.replacement_count();
    if replacements > 0 {
        println!(
            "{} {replacements} machine(s) will be destroyed and replaced",
            "Info:".blue().bold()
        );
    }
}

fn print_json(plan: &RolloutPlan) -> Result<()> {
    let out = serde_json::json!({
        "summary": plan.diff.summary(),
        "machines": plan.rows(),
        "warnings": plan.warnings().map(ToString::to_string).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
