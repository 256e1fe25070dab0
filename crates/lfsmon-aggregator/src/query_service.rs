use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lfsmon_net::ServiceHandler;
use lfsmon_proto::{encode, query_method, NodeListRsp, TargetMapRsp, QUERY_SERVICE_ID};
use lfsmon_types::{RPCCode, Role, Status};

use crate::registry::ActiveTargets;

/// Read-only view of [`ActiveTargets`] for external tools.
pub struct QueryService {
    registry: Arc<ActiveTargets>,
}

impl QueryService {
    pub fn new(registry: Arc<ActiveTargets>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ServiceHandler for QueryService {
    fn service_id(&self) -> u16 {
        QUERY_SERVICE_ID
    }

    fn service_name(&self) -> &str {
        "query"
    }

    async fn handle(&self, method_id: u16, _request: Bytes) -> Result<Bytes, Status> {
        match method_id {
            query_method::OSS_LIST => encode(&NodeListRsp {
                nodes: self.registry.nodes(Role::Oss),
            }),
            query_method::MDS_LIST => encode(&NodeListRsp {
                nodes: self.registry.nodes(Role::Mds),
            }),
            query_method::OST_LIST => encode(&TargetMapRsp {
                targets: self.registry.targets(Role::Oss),
            }),
            query_method::MDT_LIST => encode(&TargetMapRsp {
                targets: self.registry.targets(Role::Mds),
            }),
            _ => Err(Status::new(RPCCode::INVALID_METHOD_ID)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfsmon_proto::decode;

    #[tokio::test]
    async fn test_lists() {
        let registry = Arc::new(ActiveTargets::new());
        registry.update(Role::Oss, "oss1", &["fs-OST0000".to_string()]);
        registry.update(Role::Mds, "mds1", &["fs-MDT0000".to_string()]);
        let svc = QueryService::new(registry);

        let oss: NodeListRsp = decode(&svc.handle(query_method::OSS_LIST, Bytes::new()).await.unwrap()).unwrap();
        assert_eq!(oss.nodes, vec!["oss1"]);
        let mdts: TargetMapRsp = decode(&svc.handle(query_method::MDT_LIST, Bytes::new()).await.unwrap()).unwrap();
        assert_eq!(mdts.targets["mds1"], vec!["fs-MDT0000"]);
        let osts: TargetMapRsp = decode(&svc.handle(query_method::OST_LIST, Bytes::new()).await.unwrap()).unwrap();
        assert_eq!(osts.targets.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let svc = QueryService::new(Arc::new(ActiveTargets::new()));
        let err = svc.handle(42, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), RPCCode::INVALID_METHOD_ID);
    }
}
