use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use runlens::alerts::evaluator::evaluate_alert_rules_for_repo;
use runlens::alerts::store::SqliteAlertStore;
use runlens::analysis::anomaly::DEFAULT_Z_THRESHOLD;
use runlens::insights::collect_insights;
use runlens::models::WorkflowRun;

#[derive(Parser)]
#[command(name = "runlens")]
#[command(author, version, about = "CI run signal engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive DORA metrics, anomalies and optimization tips from a run batch
    Analyze {
        /// JSON file holding a newest-first array of workflow runs
        #[arg(short, long)]
        input: PathBuf,

        /// Repository key, e.g. "acme/api"
        #[arg(short, long)]
        repo: String,

        /// Z-score threshold for anomaly detection
        #[arg(short, long, default_value_t = DEFAULT_Z_THRESHOLD)]
        threshold: f64,
    },
    /// Evaluate persisted alert rules against the stored run history
    EvaluateAlerts {
        /// Path to the SQLite alert store
        #[arg(short, long, env = "RUNLENS_DB")]
        db: PathBuf,

        /// Repository key, e.g. "acme/api"
        #[arg(short, long)]
        repo: String,
    },
}

impl Cli {
    pub fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Analyze {
                input,
                repo,
                threshold,
            } => {
                info!("Analyzing run batch for repository: {repo}");

                let raw = std::fs::read_to_string(input)?;
                let runs: Vec<WorkflowRun> = serde_json::from_str(&raw)?;
                info!("Loaded {} runs from {}", runs.len(), input.display());

                let insights = collect_insights(repo, &runs, *threshold);

                let json_output = if self.pretty {
                    serde_json::to_string_pretty(&insights)?
                } else {
                    serde_json::to_string(&insights)?
                };

                if let Some(output_path) = &self.output {
                    std::fs::write(output_path, json_output)?;
                    info!("Insights written to: {}", output_path.display());
                } else {
                    println!("{}", json_output);
                }

                Ok(())
            }
            Commands::EvaluateAlerts { db, repo } => {
                info!("Evaluating alert rules for repository: {repo}");

                let store = SqliteAlertStore::open(db)?;
                let fired = evaluate_alert_rules_for_repo(&store, repo)?;

                println!("{fired}");
                Ok(())
            }
        }
    }
}
