use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use lfsmon_app::{run_application, Application};
use lfsmon_config::{invalid, Config, ConfigError};
use lfsmon_logging::{init_logging, LogConfig};
use lfsmon_net::{Server, SessionFactory};
use lfsmon_net_tcp::TcpListener;
use lfsmon_snapshot::procfs::DEFAULT_PROC_ROOT;
use lfsmon_snapshot::{CounterSource, MdtSource, NodeSessionFactory, OstSource};
use lfsmon_types::{MdsStats, OstStats, Status, StatusCode, SystemClock};
use serde::{Deserialize, Serialize};

/// Lustre node collector: serves per-target and per-client counter diffs
/// of this server to the aggregator.
#[derive(Parser, Debug)]
#[command(name = "lfsmon-node-collector", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "node-collector.toml")]
    config: PathBuf,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeCollectorConfig {
    /// `host:port` the counter service listens on.
    #[serde(default = "default_listen")]
    listen: String,
    /// Root of the Lustre proc tree.
    #[serde(default = "default_proc_root")]
    proc_root: PathBuf,
    #[serde(default = "default_log")]
    log: LogConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8888".into()
}

fn default_proc_root() -> PathBuf {
    PathBuf::from(DEFAULT_PROC_ROOT)
}

fn default_log() -> LogConfig {
    LogConfig::default().with_prefix("lfsmon-node-collector")
}

impl Default for NodeCollectorConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            proc_root: default_proc_root(),
            log: default_log(),
        }
    }
}

impl Config for NodeCollectorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.listen.contains(':') {
            return invalid(format!("listen address '{}' has no port", self.listen));
        }
        Ok(())
    }
}

#[derive(Default)]
struct NodeCollectorApp {
    server: Option<Server>,
}

#[async_trait]
impl Application for NodeCollectorApp {
    type Config = NodeCollectorConfig;

    fn name(&self) -> &str {
        "lfsmon-node-collector"
    }

    async fn start(&mut self, config: &NodeCollectorConfig) -> lfsmon_types::Result<()> {
        let ost: Arc<dyn CounterSource<OstStats>> = Arc::new(OstSource::new(&config.proc_root));
        let mdt: Arc<dyn CounterSource<MdsStats>> = Arc::new(MdtSource::new(&config.proc_root));
        tracing::info!(
            proc_root = %config.proc_root.display(),
            ost = ost.is_available(),
            mdt = mdt.is_available(),
            "counter sources probed"
        );
        let sessions: Arc<dyn SessionFactory> =
            Arc::new(NodeSessionFactory::new(ost, mdt, Arc::new(SystemClock)));
        let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
            Status::with_message(StatusCode::IO_ERROR, format!("cannot listen on {}: {e}", config.listen))
        })?;
        let mut server = Server::new(sessions);
        server.start(listener);
        self.server = Some(server);
        Ok(())
    }

    async fn stop(&mut self) -> lfsmon_types::Result<()> {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", NodeCollectorConfig::default_toml()?);
        return Ok(());
    }

    let config = NodeCollectorConfig::load(&args.config)?;
    let _guard = init_logging(&config.log)?;
    tracing::info!(config = %args.config.display(), listen = %config.listen, "loaded configuration");

    run_application(NodeCollectorApp::default(), config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trip() {
        let text = NodeCollectorConfig::default_toml().unwrap();
        let parsed = NodeCollectorConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.listen, "0.0.0.0:8888");
        assert_eq!(parsed.proc_root, PathBuf::from("/proc/fs/lustre"));
        assert_eq!(parsed.log.file_prefix, "lfsmon-node-collector");
    }

    #[test]
    fn test_listen_needs_port() {
        assert!(NodeCollectorConfig::from_toml_str("listen = \"0.0.0.0\"").is_err());
    }

    #[tokio::test]
    async fn test_start_without_lustre() {
        let root = tempfile::tempdir().unwrap();
        let config = NodeCollectorConfig {
            listen: "127.0.0.1:0".into(),
            proc_root: root.path().to_path_buf(),
            log: LogConfig::default(),
        };
        let mut app = NodeCollectorApp::default();
        app.start(&config).await.unwrap();
        assert!(app.server.as_ref().is_some_and(Server::is_running));
        app.stop().await.unwrap();
        assert!(app.server.is_none());
    }
}
