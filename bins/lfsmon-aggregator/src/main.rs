use std::path::PathBuf;

use clap::Parser;
use lfsmon_aggregator::{AggregatorApp, AggregatorConfig};
use lfsmon_app::run_application;
use lfsmon_config::Config;
use lfsmon_logging::init_logging;

/// Lustre performance aggregator: polls every MDS and OSS node collector
/// on a fixed cadence and stores the diffs.
#[derive(Parser, Debug)]
#[command(name = "lfsmon-aggregator", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "aggregator.toml")]
    config: PathBuf,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", AggregatorConfig::default_toml()?);
        return Ok(());
    }

    let config = AggregatorConfig::load(&args.config)?;
    if args.check {
        println!("{}: ok", args.config.display());
        return Ok(());
    }

    let _guard = init_logging(&config.log)?;
    tracing::info!(
        config = %args.config.display(),
        fsname = %config.collector.fsname,
        "loaded configuration"
    );

    run_application(AggregatorApp::new(), config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.describe()))
}
