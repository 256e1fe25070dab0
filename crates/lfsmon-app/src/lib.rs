use async_trait::async_trait;
use lfsmon_types::{status_code::StatusCode, Result, Status};
use serde::{Deserialize, Serialize};

/// Identity of a running lfsmon process, logged at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub hostname: String,
    pub pid: u32,
}

impl AppInfo {
    pub fn current(name: impl Into<String>) -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
            })
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            name: name.into(),
            hostname,
            pid: std::process::id(),
        }
    }
}

/// Lifecycle shared by the node collector and the aggregator.
#[async_trait]
pub trait Application: Send + 'static {
    type Config: lfsmon_config::Config + Clone + Send + Sync;

    fn name(&self) -> &str;
    async fn start(&mut self, config: &Self::Config) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
}

/// Wait for a shutdown signal (CTRL+C or SIGTERM).
pub async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).map_err(|e| {
            Status::with_message(
                StatusCode::IO_ERROR,
                format!("cannot register SIGTERM handler: {e}"),
            )
        })?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.map_err(|e| Status::with_message(StatusCode::IO_ERROR, format!("ctrl-c handler: {e}")))?;
            tracing::info!("Received CTRL+C");
        }
        _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
    }
    Ok(())
}

/// Start, wait for a signal, stop.
pub async fn run_application<A: Application>(mut app: A, config: A::Config) -> Result<()> {
    let info = AppInfo::current(app.name());
    tracing::info!(name = %info.name, host = %info.hostname, pid = info.pid, "starting");
    app.start(&config).await?;
    let waited = wait_for_shutdown_signal().await;
    app.stop().await?;
    tracing::info!(name = %info.name, "stopped");
    waited
}
