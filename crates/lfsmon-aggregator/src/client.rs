//! Per-node protocol client.
//!
//! A [`ProtocolClient`] owns one logical connection to a node collector and
//! walks `Disconnected -> Connecting -> Baseline -> Steady`. Any failure
//! drops the connection, and the next connection starts from a fresh
//! baseline, so no diff ever spans a disconnect.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lfsmon_net::{AsyncConnector, RpcClient, Socket};
use lfsmon_proto::{
    counter_service_id, counters_method, decode, encode, node_info_method, BaselineRsp,
    TargetListReq, TargetListRsp, NODE_INFO_SERVICE_ID,
};
use lfsmon_types::{CounterDiff, CounterVector, MonitorCode, Status};
use lfsmon_utils::{sleep_or_shutdown, ShutdownSignal};

use crate::error::CollectError;

/// One open connection to a node, for one counter family.
#[async_trait]
pub trait CounterSession<V: CounterVector>: Send {
    /// Take the baseline snapshot; returns the number of targets seen.
    async fn initialize_baseline(&mut self) -> Result<usize, CollectError>;

    async fn get_diff(&mut self) -> Result<CounterDiff<V>, CollectError>;

    async fn list_active_targets(&mut self) -> Result<Vec<String>, CollectError>;

    async fn close(&mut self);
}

/// Opens [`CounterSession`]s.
#[async_trait]
pub trait CounterConnector<V: CounterVector>: Send + Sync {
    async fn connect(&self, node: &str) -> Result<Box<dyn CounterSession<V>>, CollectError>;
}

/// Connects to node collectors over the RPC layer.
pub struct RpcCounterConnector<S: Socket> {
    connector: Arc<dyn AsyncConnector<S>>,
    call_timeout: Duration,
}

impl<S: Socket> RpcCounterConnector<S> {
    pub fn new(connector: Arc<dyn AsyncConnector<S>>, call_timeout: Duration) -> Self {
        Self {
            connector,
            call_timeout,
        }
    }
}

#[async_trait]
impl<S: Socket, V: CounterVector> CounterConnector<V> for RpcCounterConnector<S> {
    async fn connect(&self, node: &str) -> Result<Box<dyn CounterSession<V>>, CollectError> {
        let client = RpcClient::connect(self.connector.as_ref(), node, self.call_timeout).await?;
        Ok(Box::new(RpcCounterSession {
            client,
            _family: PhantomData,
        }))
    }
}

struct RpcCounterSession<S: Socket, V> {
    client: RpcClient<S>,
    _family: PhantomData<fn() -> V>,
}

#[async_trait]
impl<S: Socket, V: CounterVector> CounterSession<V> for RpcCounterSession<S, V> {
    async fn initialize_baseline(&mut self) -> Result<usize, CollectError> {
        let body = self
            .client
            .call(counter_service_id(V::ROLE), counters_method::INITIALIZE_BASELINE, b"")
            .await?;
        let rsp: BaselineRsp = decode(&body)?;
        Ok(rsp.targets)
    }

    async fn get_diff(&mut self) -> Result<CounterDiff<V>, CollectError> {
        let body = self
            .client
            .call(counter_service_id(V::ROLE), counters_method::GET_DIFF, b"")
            .await?;
        Ok(decode(&body)?)
    }

    async fn list_active_targets(&mut self) -> Result<Vec<String>, CollectError> {
        let req = encode(&TargetListReq { role: V::ROLE })?;
        let body = self
            .client
            .call(NODE_INFO_SERVICE_ID, node_info_method::LIST_ACTIVE_TARGETS, &req)
            .await?;
        let rsp: TargetListRsp = decode(&body)?;
        Ok(rsp.targets)
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    /// Baseline taken on the current connection, no diff yet.
    Baseline,
    Steady,
}

pub struct ProtocolClient<V: CounterVector> {
    node: String,
    connector: Arc<dyn CounterConnector<V>>,
    retry_delay: Duration,
    state: ClientState,
    session: Option<Box<dyn CounterSession<V>>>,
    targets: Vec<String>,
}

impl<V: CounterVector> ProtocolClient<V> {
    pub fn new(node: impl Into<String>, connector: Arc<dyn CounterConnector<V>>, retry_delay: Duration) -> Self {
        Self {
            node: node.into(),
            connector,
            retry_delay,
            state: ClientState::Disconnected,
            session: None,
            targets: Vec::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether a diff may be asked for.
    pub fn is_established(&self) -> bool {
        matches!(self.state, ClientState::Baseline | ClientState::Steady)
    }

    /// Targets the node reported when the baseline was taken.
    pub fn active_targets(&self) -> &[String] {
        &self.targets
    }

    /// Connect and take a baseline, retrying with the fixed delay until it
    /// works. Returns `false` only when shutdown interrupts it.
    pub async fn establish(&mut self, shutdown: &mut ShutdownSignal) -> bool {
        while !self.is_established() {
            if *shutdown.borrow() {
                return false;
            }
            if let Err(e) = self.try_establish().await {
                tracing::warn!(node = %self.node, role = %V::ROLE, error = %e, "connect failed, retrying");
                self.disconnect().await;
                if !sleep_or_shutdown(self.retry_delay, shutdown).await {
                    return false;
                }
            }
        }
        true
    }

    async fn try_establish(&mut self) -> Result<(), CollectError> {
        self.state = ClientState::Connecting;
        let mut session = self.connector.connect(&self.node).await?;
        let baseline = async {
            let count = session.initialize_baseline().await?;
            let targets = session.list_active_targets().await?;
            Ok::<_, CollectError>((count, targets))
        }
        .await;
        match baseline {
            Ok((count, targets)) => {
                tracing::info!(node = %self.node, role = %V::ROLE, targets = count, "connected, baseline taken");
                self.targets = targets;
                self.session = Some(session);
                self.state = ClientState::Baseline;
                Ok(())
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// One steady-state diff.
    ///
    /// On failure the connection is dropped and the fixed delay is slept
    /// before the error is returned; the next [`establish`](Self::establish)
    /// takes a new baseline.
    pub async fn diff(&mut self, shutdown: &mut ShutdownSignal) -> Result<CounterDiff<V>, CollectError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CollectError::Protocol(Status::new(MonitorCode::NOT_INITIALIZED)));
        };
        match session.get_diff().await {
            Ok(diff) => {
                self.state = ClientState::Steady;
                Ok(diff)
            }
            Err(e) => {
                tracing::warn!(node = %self.node, role = %V::ROLE, error = %e, "diff failed, disconnecting");
                self.disconnect().await;
                sleep_or_shutdown(self.retry_delay, shutdown).await;
                Err(e)
            }
        }
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            tracing::info!(node = %self.node, role = %V::ROLE, "disconnected");
        }
        self.state = ClientState::Disconnected;
    }
}
