use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use pressureradar::config::{ConfigSet, RadarConfig};
use pressureradar::gate::{self, CheckStatus, QualityReport};

#[derive(Parser)]
#[command(
    name = "pressureradar",
    about = "Temporal anomaly scoring and decayed pressure propagation",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a snapshot file and gate the result
    Run {
        /// Snapshot JSONL input
        #[arg(long)]
        input: PathBuf,

        /// Events JSONL (spike events are derived when omitted)
        #[arg(long)]
        events: Option<PathBuf>,

        /// Event forcing store built by `forcing`
        #[arg(long)]
        forcing: Option<PathBuf>,

        /// Precomputed deltaT_v1 artifact for the persistence stage
        #[arg(long)]
        deltas: Option<PathBuf>,

        /// Root for runs/ and latest/
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory holding the JSON configuration documents
        #[arg(long)]
        config_dir: Option<PathBuf>,

        /// Event strength half-life in days
        #[arg(long)]
        half_life_days: Option<f64>,

        /// Geo profile name
        #[arg(long)]
        geo_profile: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Build the event forcing store from an event-map JSONL file
    Forcing {
        /// Event-map JSONL input
        #[arg(long)]
        input: PathBuf,

        /// Output JSON path
        #[arg(long)]
        output: PathBuf,

        /// Decay constant in hour buckets
        #[arg(long, default_value = "12")]
        tau: f64,

        /// Directory holding the JSON configuration documents
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },

    /// Re-evaluate the quality gate over a run directory
    Gate {
        /// Run directory containing radar.db and persistence.json
        #[arg(long)]
        run_dir: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Load and validate every configuration document
    CheckConfig {
        /// Directory holding the JSON configuration documents
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

fn print_gate(report: &QualityReport) {
    println!("\nPressureRadar Quality Gate");
    println!("{:<30} | {:<6} | {:<12} | Details", "Check", "Status", "Value");
    println!("{:-<30}-|-{:-<6}-|-{:-<12}-|-{:-<40}", "", "", "", "");
    for check in &report.checks {
        let status_str = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warning => "WARN",
        };
        println!(
            "{:<30} | {:<6} | {:<12} | {}",
            check.name, status_str, check.value, check.details
        );
    }
    if report.ok {
        println!("\nPASS");
    } else {
        println!("\nFAILED: {}", report.critical_failed.join(", "));
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut settings = RadarConfig::load_or_default();

    match cli.command {
        Commands::Run {
            input,
            events,
            forcing,
            deltas,
            output_dir,
            config_dir,
            half_life_days,
            geo_profile,
            json,
        } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            if let Some(dir) = config_dir {
                settings.config_dir = dir;
            }
            if let Some(hl) = half_life_days {
                settings.half_life_days = hl;
            }
            if let Some(profile) = geo_profile {
                settings.geo_profile = profile;
            }

            tracing::info!(input = %input.display(), "Running pipeline");
            let summary = pressureradar::run_pipeline(&pressureradar::RunOptions {
                input,
                events,
                forcing,
                deltas,
                settings,
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("run:     {}", summary.run_id);
                println!("dir:     {}", summary.run_dir.display());
                println!("digest:  {}", summary.digest);
                println!(
                    "rows:    {} snapshots, {} anomaly records, {} edges, {} projections",
                    summary.counts.snapshots,
                    summary.counts.anomaly_records,
                    summary.counts.chain_edges,
                    summary.counts.series_chain
                );
                print_gate(&summary.gate);
                if let Some(latest) = &summary.promoted {
                    println!("promoted: {}", latest.display());
                }
            }
            if !summary.gate.ok {
                std::process::exit(1);
            }
        }
        Commands::Forcing {
            input,
            output,
            tau,
            config_dir,
        } => {
            let dir = config_dir.unwrap_or(settings.config_dir);
            pressureradar::analysis::runner::build_forcing(&input, &output, tau, &dir)?;
            println!("forcing store written to {}", output.display());
        }
        Commands::Gate { run_dir, json } => {
            let report = gate::evaluate_run_dir(&run_dir, &settings.gate)?;
            let path = gate::write_report(&report, &run_dir.join("reports"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_gate(&report);
                println!("report: {}", path.display());
            }
            if !report.ok {
                std::process::exit(1);
            }
        }
        Commands::CheckConfig { config_dir } => {
            let dir = config_dir.unwrap_or(settings.config_dir);
            let configs = ConfigSet::load(&dir)?;
            configs.geo.profile(&settings.geo_profile)?;
            println!("configuration in {} is valid", dir.display());
            println!("  signals:      {}", configs.signals.signals.len());
            println!("  chain window: {}", configs.chain.window);
            println!("  geo profiles: {}", configs.geo.profiles.len());
            println!("  persistence:  window {}", configs.persistence.window);
        }
    }

    Ok(())
}
