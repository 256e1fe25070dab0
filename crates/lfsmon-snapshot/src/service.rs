use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lfsmon_net::{ServiceHandler, ServiceRegistry, SessionFactory};
use lfsmon_proto::{
    counter_service_id, counters_method, decode, encode, node_info_method, BaselineRsp, RoleRsp,
    TargetListReq, TargetListRsp, NODE_INFO_SERVICE_ID,
};
use lfsmon_types::{Clock, CounterVector, MdsStats, OstStats, RPCCode, Role, Status, StatusCode};
use parking_lot::Mutex;

use crate::engine::SnapshotEngine;
use crate::source::CounterSource;

/// Run a procfs read on the blocking pool.
async fn read_blocking<T, F>(f: F) -> Result<T, Status>
where
    F: FnOnce() -> Result<T, Status> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Status::with_message(StatusCode::UNKNOWN, e.to_string()))?
}

/// Serves `initializeBaseline` and `getDiff` for one target family.
pub struct CounterService<V: CounterVector> {
    engine: Arc<Mutex<SnapshotEngine<V>>>,
}

impl<V: CounterVector> CounterService<V> {
    pub fn new(engine: SnapshotEngine<V>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }
}

#[async_trait]
impl<V: CounterVector> ServiceHandler for CounterService<V> {
    fn service_id(&self) -> u16 {
        counter_service_id(V::ROLE)
    }

    fn service_name(&self) -> &str {
        match V::ROLE {
            Role::Oss => "ost-counters",
            Role::Mds => "mdt-counters",
        }
    }

    async fn handle(&self, method_id: u16, _request: Bytes) -> Result<Bytes, Status> {
        let initializing = match method_id {
            counters_method::INITIALIZE_BASELINE => true,
            counters_method::GET_DIFF => false,
            _ => return Err(Status::new(RPCCode::INVALID_METHOD_ID)),
        };
        let engine = Arc::clone(&self.engine);
        let reply = read_blocking(move || {
            let mut engine = engine.lock();
            let diff = engine.diff(initializing)?;
            Ok((diff, engine.tracked_targets()))
        })
        .await?;
        match reply {
            (Some(diff), _) => encode(&diff),
            (None, targets) => encode(&BaselineRsp { targets }),
        }
    }
}

/// Role and target queries.
pub struct NodeInfoService {
    ost: Arc<dyn CounterSource<OstStats>>,
    mdt: Arc<dyn CounterSource<MdsStats>>,
}

impl NodeInfoService {
    pub fn new(ost: Arc<dyn CounterSource<OstStats>>, mdt: Arc<dyn CounterSource<MdsStats>>) -> Self {
        Self { ost, mdt }
    }

    async fn list_targets(&self, role: Role) -> Result<Vec<String>, Status> {
        match role {
            Role::Oss => {
                let ost = Arc::clone(&self.ost);
                read_blocking(move || Ok(ost.list_targets()?)).await
            }
            Role::Mds => {
                let mdt = Arc::clone(&self.mdt);
                read_blocking(move || Ok(mdt.list_targets()?)).await
            }
        }
    }
}

#[async_trait]
impl ServiceHandler for NodeInfoService {
    fn service_id(&self) -> u16 {
        NODE_INFO_SERVICE_ID
    }

    fn service_name(&self) -> &str {
        "node-info"
    }

    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes, Status> {
        match method_id {
            node_info_method::IS_OST => encode(&RoleRsp {
                hosted: self.ost.is_available(),
            }),
            node_info_method::IS_MDT => encode(&RoleRsp {
                hosted: self.mdt.is_available(),
            }),
            node_info_method::LIST_ACTIVE_TARGETS => {
                let req: TargetListReq = decode(&request)?;
                encode(&TargetListRsp {
                    targets: self.list_targets(req.role).await?,
                })
            }
            _ => Err(Status::new(RPCCode::INVALID_METHOD_ID)),
        }
    }
}

/// Gives every connection its own pair of snapshot engines.
///
/// A reconnecting aggregator therefore always starts from a fresh
/// baseline, never from slots filled for an earlier connection.
pub struct NodeSessionFactory {
    ost: Arc<dyn CounterSource<OstStats>>,
    mdt: Arc<dyn CounterSource<MdsStats>>,
    clock: Arc<dyn Clock>,
}

impl NodeSessionFactory {
    pub fn new(
        ost: Arc<dyn CounterSource<OstStats>>,
        mdt: Arc<dyn CounterSource<MdsStats>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { ost, mdt, clock }
    }
}

impl SessionFactory for NodeSessionFactory {
    fn open_session(&self, peer: SocketAddr) -> Arc<ServiceRegistry> {
        tracing::debug!(%peer, ost = self.ost.is_available(), mdt = self.mdt.is_available(), "new counter session");
        let registry = ServiceRegistry::new();
        registry.register(Box::new(NodeInfoService::new(
            Arc::clone(&self.ost),
            Arc::clone(&self.mdt),
        )));
        registry.register(Box::new(CounterService::new(SnapshotEngine::new(
            Arc::clone(&self.ost),
            Arc::clone(&self.clock),
        ))));
        registry.register(Box::new(CounterService::new(SnapshotEngine::new(
            Arc::clone(&self.mdt),
            Arc::clone(&self.clock),
        ))));
        Arc::new(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AbsoluteCounters, MemorySource};
    use lfsmon_proto::{MDT_COUNTERS_SERVICE_ID, OST_COUNTERS_SERVICE_ID};
    use lfsmon_types::{CounterDiff, ManualClock, MonitorCode};

    struct Fixture {
        ost: Arc<MemorySource<OstStats>>,
        clock: Arc<ManualClock>,
        factory: NodeSessionFactory,
    }

    fn fixture() -> Fixture {
        let ost = Arc::new(MemorySource::new(
            AbsoluteCounters::default().with_target("fs-OST0000", OstStats::new(100, 2000, 10, 500)),
        ));
        let mdt: Arc<dyn CounterSource<MdsStats>> = Arc::new(MemorySource::unavailable());
        let clock = Arc::new(ManualClock::at_secs(1000));
        let factory = NodeSessionFactory::new(
            Arc::clone(&ost) as Arc<dyn CounterSource<OstStats>>,
            mdt,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Fixture { ost, clock, factory }
    }

    fn peer() -> SocketAddr {
        "10.0.0.9:40000".parse().unwrap()
    }

    async fn call(registry: &ServiceRegistry, service: u16, method: u16, body: &[u8]) -> Result<Bytes, Status> {
        let handler = registry.get(service).unwrap();
        handler.handle(method, Bytes::copy_from_slice(body)).await
    }

    #[tokio::test]
    async fn test_baseline_then_diff() {
        let f = fixture();
        let session = f.factory.open_session(peer());

        let rsp: BaselineRsp = decode(
            &call(&session, OST_COUNTERS_SERVICE_ID, counters_method::INITIALIZE_BASELINE, b"")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(rsp.targets, 1);

        f.clock.set_secs(1005);
        f.ost.set(AbsoluteCounters::default().with_target("fs-OST0000", OstStats::new(150, 2500, 10, 500)));
        let diff: CounterDiff<OstStats> = decode(
            &call(&session, OST_COUNTERS_SERVICE_ID, counters_method::GET_DIFF, b"")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(diff.totals["fs-OST0000"], OstStats::new(50, 500, 0, 0));
        assert_eq!(diff.elapsed_secs, 5.0);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_snapshots() {
        let f = fixture();
        let first = f.factory.open_session(peer());
        call(&first, OST_COUNTERS_SERVICE_ID, counters_method::INITIALIZE_BASELINE, b"")
            .await
            .unwrap();

        let second = f.factory.open_session(peer());
        let err = call(&second, OST_COUNTERS_SERVICE_ID, counters_method::GET_DIFF, b"")
            .await
            .unwrap_err();
        assert_eq!(err.code(), MonitorCode::NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_missing_role_is_unsupported() {
        let f = fixture();
        let session = f.factory.open_session(peer());
        let err = call(&session, MDT_COUNTERS_SERVICE_ID, counters_method::INITIALIZE_BASELINE, b"")
            .await
            .unwrap_err();
        assert_eq!(err.code(), MonitorCode::UNSUPPORTED_ROLE);
    }

    #[tokio::test]
    async fn test_node_info() {
        let f = fixture();
        let session = f.factory.open_session(peer());

        let is_ost: RoleRsp = decode(&call(&session, NODE_INFO_SERVICE_ID, node_info_method::IS_OST, b"").await.unwrap()).unwrap();
        let is_mdt: RoleRsp = decode(&call(&session, NODE_INFO_SERVICE_ID, node_info_method::IS_MDT, b"").await.unwrap()).unwrap();
        assert!(is_ost.hosted);
        assert!(!is_mdt.hosted);

        let req = encode(&TargetListReq { role: Role::Oss }).unwrap();
        let targets: TargetListRsp = decode(
            &call(&session, NODE_INFO_SERVICE_ID, node_info_method::LIST_ACTIVE_TARGETS, &req)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(targets.targets, vec!["fs-OST0000".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let f = fixture();
        let session = f.factory.open_session(peer());
        let err = call(&session, OST_COUNTERS_SERVICE_ID, 99, b"").await.unwrap_err();
        assert_eq!(err.code(), RPCCode::INVALID_METHOD_ID);
    }
}
