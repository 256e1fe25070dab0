//! Wiring of the aggregating process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lfsmon_app::Application;
use lfsmon_net::{Server, ServiceRegistry, SessionFactory};
use lfsmon_net_tcp::{TcpConnector, TcpListener, TcpSocket};
use lfsmon_store::{DocumentSink, MemorySink, SqliteSink};
use lfsmon_types::{Clock, MdsStats, OstStats, Role, Status, StatusCode, SystemClock};
use lfsmon_utils::BackgroundRunner;

use crate::client::{CounterConnector, RpcCounterConnector};
use crate::config::{AggregatorConfig, Backend, DatabaseConfig};
use crate::error::CollectError;
use crate::nid::NidNormalizer;
use crate::persist::{build_persister, SamplePersister};
use crate::pipeline::{spawn_node_pipeline, PipelineShared};
use crate::query_service::QueryService;
use crate::registry::ActiveTargets;
use crate::scheduler::Scheduler;
use crate::stats::StatsCollector;
use crate::writer::{IndexedCollections, LatestMark, PersistenceWriter};

/// How the aggregator reaches node collectors, per counter family.
pub struct Connectors {
    pub ost: Arc<dyn CounterConnector<OstStats>>,
    pub mdt: Arc<dyn CounterConnector<MdsStats>>,
}

impl Connectors {
    pub fn tcp(call_timeout: Duration) -> Self {
        let tcp = Arc::new(TcpConnector::new());
        Self {
            ost: Arc::new(RpcCounterConnector::<TcpSocket>::new(tcp.clone(), call_timeout)),
            mdt: Arc::new(RpcCounterConnector::<TcpSocket>::new(tcp, call_timeout)),
        }
    }
}

pub fn open_sink(config: &DatabaseConfig) -> Result<Arc<dyn DocumentSink>, CollectError> {
    let sink: Arc<dyn DocumentSink> = match config.backend {
        Backend::Sqlite => Arc::new(SqliteSink::open(&config.path, &config.name)?),
        Backend::Memory => Arc::new(MemorySink::new()),
    };
    Ok(sink)
}

/// A running aggregator: one pipeline per node, the scheduler, and the
/// optional query service.
pub struct Aggregator {
    runner: BackgroundRunner,
    persister: Arc<dyn SamplePersister>,
    sink: Arc<dyn DocumentSink>,
    registry: Arc<ActiveTargets>,
    stats: Arc<StatsCollector>,
    query_server: Option<Server>,
}

impl Aggregator {
    /// Start against real node collectors and the configured sink.
    pub async fn start(config: &AggregatorConfig) -> Result<Self, CollectError> {
        let connectors = Connectors::tcp(Duration::from_millis(config.collector.call_timeout_ms));
        let sink = open_sink(&config.database)?;
        Self::start_with(config, connectors, sink, Arc::new(SystemClock)).await
    }

    pub async fn start_with(
        config: &AggregatorConfig,
        connectors: Connectors,
        sink: Arc<dyn DocumentSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CollectError> {
        let collector = &config.collector;
        let mut runner = BackgroundRunner::new();
        let nids = Arc::new(NidNormalizer::from_config(&config.nidmapping)?);
        let persister = build_persister(&config.database, Arc::clone(&sink), runner.shutdown_signal());
        let stats = Arc::new(StatsCollector::new());
        let registry = Arc::new(ActiveTargets::new());
        let indexed = Arc::new(IndexedCollections::new());
        let mark = Arc::new(LatestMark::new());

        let writer_for = |role: Role| {
            let writer = PersistenceWriter::new(
                collector.fsname.clone(),
                Arc::clone(&sink),
                Arc::clone(&persister),
                Arc::clone(&nids),
                Arc::clone(&indexed),
                Arc::clone(&stats),
            );
            // Storage servers are released after metadata servers within a
            // tick, so they own the watermark.
            Arc::new(match role {
                Role::Oss => writer.advancing_watermark(Arc::clone(&mark)),
                Role::Mds => writer,
            })
        };
        let mds_writer = writer_for(Role::Mds);
        let oss_writer = writer_for(Role::Oss);

        let shared = PipelineShared {
            clock,
            snap_interval: collector.snap_interval,
            max_entries: collector.max_entries,
            retry_delay: Duration::from_millis(collector.retry_delay_ms),
            registry: Arc::clone(&registry),
            stats: Arc::clone(&stats),
        };

        let mut scheduler = Scheduler::new(Duration::from_secs(collector.interval), Arc::clone(&stats));
        for (role, node) in collector.nodes() {
            let slot = match role {
                Role::Mds => spawn_node_pipeline(
                    &mut runner,
                    &node,
                    Arc::clone(&connectors.mdt),
                    Arc::clone(&mds_writer),
                    &shared,
                ),
                Role::Oss => spawn_node_pipeline(
                    &mut runner,
                    &node,
                    Arc::clone(&connectors.ost),
                    Arc::clone(&oss_writer),
                    &shared,
                ),
            };
            scheduler.add(slot);
        }
        tracing::info!(
            fsname = %collector.fsname,
            mds = collector.mds.len(),
            oss = collector.oss.len(),
            interval = collector.interval,
            snap_interval = collector.snap_interval,
            "node pipelines started"
        );
        runner.spawn("scheduler", move |shutdown| scheduler.run(shutdown));

        let query_server = match &collector.query_listen {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(CollectError::Connection)?;
                Some(start_query_server(listener, Arc::clone(&registry)))
            }
            None => None,
        };

        Ok(Self {
            runner,
            persister,
            sink,
            registry,
            stats,
            query_server,
        })
    }

    pub fn registry(&self) -> &Arc<ActiveTargets> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn sink(&self) -> &Arc<dyn DocumentSink> {
        &self.sink
    }

    /// Stop every task, then flush the persister.
    pub async fn stop(mut self) {
        if let Some(server) = self.query_server.as_mut() {
            server.stop();
        }
        self.runner.shutdown().await;
        self.persister.shutdown().await;
        self.stats.log_summary();
    }
}

fn start_query_server(listener: TcpListener, registry: Arc<ActiveTargets>) -> Server {
    let services = ServiceRegistry::new();
    services.register(Box::new(QueryService::new(registry)));
    let sessions: Arc<dyn SessionFactory> = Arc::new(Arc::new(services));
    let mut server = Server::new(sessions);
    server.start(listener);
    server
}

impl From<CollectError> for Status {
    fn from(e: CollectError) -> Self {
        let code = match &e {
            CollectError::Config(_) => StatusCode::INVALID_CONFIG,
            CollectError::Persistence(_) | CollectError::Connection(_) | CollectError::WatermarkHeld { .. } => {
                StatusCode::IO_ERROR
            }
            CollectError::Protocol(s) | CollectError::Data(s) => s.code(),
            CollectError::QueueFull { .. } => StatusCode::QUEUE_FULL,
            CollectError::Shutdown => StatusCode::INTERRUPTED,
        };
        Status::with_message(code, e.to_string())
    }
}

/// [`Aggregator`] under the shared application lifecycle.
#[derive(Default)]
pub struct AggregatorApp {
    running: Option<Aggregator>,
}

impl AggregatorApp {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Application for AggregatorApp {
    type Config = AggregatorConfig;

    fn name(&self) -> &str {
        "lfsmon-aggregator"
    }

    async fn start(&mut self, config: &AggregatorConfig) -> lfsmon_types::Result<()> {
        self.running = Some(Aggregator::start(config).await?);
        Ok(())
    }

    async fn stop(&mut self) -> lfsmon_types::Result<()> {
        if let Some(aggregator) = self.running.take() {
            aggregator.stop().await;
        }
        Ok(())
    }
}
