use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lfsmon_types::Status;

/// Trait implemented by RPC service handlers.
///
/// Each service is identified by a numeric `service_id` and exposes methods
/// identified by `method_id`. The handler receives a raw request payload and
/// returns either a raw response payload or a `Status` error.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn service_id(&self) -> u16;

    /// Human-readable name (used for logging).
    fn service_name(&self) -> &str;

    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes, Status>;
}

/// Registry mapping service IDs to their handlers.
pub struct ServiceRegistry {
    services: DashMap<u16, Box<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service handler, replacing any handler with the same ID.
    pub fn register(&self, service: Box<dyn ServiceHandler>) {
        let id = service.service_id();
        self.services.insert(id, service);
    }

    pub fn get(
        &self,
        service_id: u16,
    ) -> Option<dashmap::mapref::one::Ref<'_, u16, Box<dyn ServiceHandler>>> {
        self.services.get(&service_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces the services visible to one accepted connection.
///
/// Handlers with per-connection state (such as counter snapshots) get a
/// fresh registry per session; stateless services share one.
pub trait SessionFactory: Send + Sync + 'static {
    fn open_session(&self, peer: SocketAddr) -> Arc<ServiceRegistry>;
}

impl SessionFactory for Arc<ServiceRegistry> {
    fn open_session(&self, _peer: SocketAddr) -> Arc<ServiceRegistry> {
        Arc::clone(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfsmon_types::StatusCode;

    struct EchoService;

    #[async_trait]
    impl ServiceHandler for EchoService {
        fn service_id(&self) -> u16 {
            1
        }
        fn service_name(&self) -> &str {
            "echo"
        }
        async fn handle(&self, _method_id: u16, request: Bytes) -> Result<Bytes, Status> {
            Ok(request)
        }
    }

    struct FailService;

    #[async_trait]
    impl ServiceHandler for FailService {
        fn service_id(&self) -> u16 {
            2
        }
        fn service_name(&self) -> &str {
            "fail"
        }
        async fn handle(&self, _method_id: u16, _request: Bytes) -> Result<Bytes, Status> {
            Err(Status::new(StatusCode::UNKNOWN))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ServiceRegistry::new();
        registry.register(Box::new(EchoService));
        registry.register(Box::new(FailService));

        assert_eq!(registry.get(1).unwrap().service_name(), "echo");
        assert!(registry.get(2).is_some());
        assert!(registry.get(99).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_shared_registry_session() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(Box::new(EchoService));
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let session = registry.open_session(peer);
        assert!(Arc::ptr_eq(&session, &registry));
    }

    #[tokio::test]
    async fn test_fail_handler() {
        let result = FailService.handle(0, Bytes::new()).await;
        assert_eq!(result.unwrap_err().code(), StatusCode::UNKNOWN);
    }
}
