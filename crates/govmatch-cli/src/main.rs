use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use govmatch_adapters::{normalize_batch, JsonBatchSource, RawOpportunitySource};
use govmatch_engine::MatchEngine;
use govmatch_scan::{
    run_scan_once, ClusterRepository, ScanConfig, YamlClusterRepository, DEFAULT_ALERT_THRESHOLD,
};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "govmatch")]
#[command(about = "Opportunity matching and scan CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score a raw record batch against the cluster registry and print the
    /// ranked matches.
    Score {
        /// JSON file with raw records (bare array or SAM.gov-style envelope).
        #[arg(long)]
        batch: PathBuf,
        /// YAML cluster registry.
        #[arg(long)]
        clusters: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
    },
    /// Run one freshness-tracked scan and print the run summary.
    Scan {
        #[arg(long)]
        batch: PathBuf,
        #[arg(long)]
        clusters: PathBuf,
        #[arg(long, default_value_t = DEFAULT_ALERT_THRESHOLD)]
        threshold: f64,
        /// Tracked-id state file; defaults to GOVMATCH_STATE_PATH.
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            batch,
            clusters,
            min_score,
        } => {
            let records = JsonBatchSource::new(&batch).fetch()?;
            let clusters = YamlClusterRepository::new(&clusters).list()?;
            let (opportunities, dropped) = normalize_batch(&records);
            let engine = MatchEngine::default();
            let results = engine.score_opportunities(&opportunities, &clusters, min_score);

            for result in &results {
                println!(
                    "{:5.1}  {:<8}  {}  {}  [{}]",
                    result.overall_score,
                    format!("{:?}", result.tier),
                    result.opportunity.notice_id,
                    result.opportunity.title,
                    result.cluster_name.as_deref().unwrap_or("-"),
                );
                println!("       {}", result.explanation);
            }
            println!(
                "normalized {} of {} records ({} dropped); {} matches at or above {:.0}",
                opportunities.len(),
                records.len(),
                dropped,
                results.len(),
                min_score
            );
        }
        Commands::Scan {
            batch,
            clusters,
            threshold,
            state,
        } => {
            let records = JsonBatchSource::new(&batch).fetch()?;
            let mut config = ScanConfig::from_env();
            config.alert_threshold = threshold;
            config.clusters_path = clusters;
            if let Some(state) = state {
                config.state_path = state;
            }

            let outcome = run_scan_once(&config, &records)?;
            println!(
                "scan complete: run_id={} fetched={} scored={} dropped={} new_above_threshold={} tracked={}",
                outcome.run.run_id,
                outcome.run.total_fetched,
                outcome.run.total_scored,
                outcome.dropped_records,
                outcome.run.new_above_threshold,
                outcome.run.tracked_ids,
            );
            for result in &outcome.new_matches {
                println!(
                    "  {:5.1}  {}  {}",
                    result.overall_score, result.opportunity.notice_id, result.opportunity.title
                );
            }
            if let Some(err) = outcome.tracker_error {
                eprintln!("warning: scan state was not persisted: {err}");
            }
        }
    }

    Ok(())
}
