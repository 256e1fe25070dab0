use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use lfsmon_types::{RPCCode, StatusCode, status_code_t};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::error::NetError;
use crate::service::SessionFactory;
use crate::socket::{Listener, Socket};
use crate::transport::{recv_message, send_message};

/// Size of `[service_id: u16][method_id: u16]` at the front of a request.
pub const REQUEST_ENVELOPE_SIZE: usize = 4;

/// Size of `[status_code: u16]` at the front of a response.
pub const RESPONSE_ENVELOPE_SIZE: usize = 2;

/// RPC server hosting the services produced by a [`SessionFactory`].
///
/// Requests on one connection are handled strictly one after another, so a
/// session's handlers are never re-entered concurrently.
pub struct Server {
    sessions: Arc<dyn SessionFactory>,
    /// Signalled when `stop()` is called to cancel the accept loop.
    shutdown: Arc<Notify>,
    running: bool,
}

impl Server {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            sessions,
            shutdown: Arc::new(Notify::new()),
            running: false,
        }
    }

    /// Start accepting connections; each connection runs in its own task.
    pub fn start<L: Listener>(&mut self, listener: L) {
        if self.running {
            tracing::warn!("server already running, ignoring duplicate start");
            return;
        }
        self.running = true;

        let sessions = Arc::clone(&self.sessions);
        let shutdown = Arc::clone(&self.shutdown);
        let addr = listener.local_addr();

        tracing::info!(%addr, "server starting");

        tokio::spawn(async move {
            Self::accept_loop(listener, sessions, shutdown).await;
            tracing::info!(%addr, "server accept loop exited");
        });
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::info!("server stopping");
            self.shutdown.notify_waiters();
            self.running = false;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    async fn accept_loop<L: Listener>(
        listener: L,
        sessions: Arc<dyn SessionFactory>,
        shutdown: Arc<Notify>,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    tracing::info!("server shutdown signal received");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok(socket) => {
                            let sessions = Arc::clone(&sessions);
                            let shutdown = Arc::clone(&shutdown);
                            tasks.spawn(async move {
                                if let Err(e) = Self::handle_connection(socket, sessions, shutdown).await {
                                    tracing::debug!("connection handler finished: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }

        tasks.shutdown().await;
    }

    pub(crate) async fn handle_connection<S: Socket>(
        socket: S,
        sessions: Arc<dyn SessionFactory>,
        shutdown: Arc<Notify>,
    ) -> Result<(), NetError> {
        let peer = socket.peer_addr();
        let services = sessions.open_session(peer);
        tracing::info!(%peer, "session opened");

        let result = loop {
            let payload = tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    break Err(NetError::ShuttingDown);
                }

                result = recv_message(&socket) => {
                    match result {
                        Ok(payload) => payload,
                        Err(e) => break Err(e),
                    }
                }
            };

            if payload.len() < REQUEST_ENVELOPE_SIZE {
                tracing::warn!(%peer, "request too small: {} bytes", payload.len());
                if let Err(e) = send_message(&socket, &encode_response(RPCCode::REQUEST_IS_EMPTY, b"")).await {
                    break Err(e);
                }
                continue;
            }

            let service_id = u16::from_le_bytes([payload[0], payload[1]]);
            let method_id = u16::from_le_bytes([payload[2], payload[3]]);
            let body = payload.slice(REQUEST_ENVELOPE_SIZE..);

            tracing::trace!(%peer, service_id, method_id, body_len = body.len(), "dispatching request");

            let response = match services.get(service_id) {
                Some(handler) => match handler.handle(method_id, body).await {
                    Ok(resp) => encode_response(StatusCode::OK, &resp),
                    Err(status) => {
                        tracing::debug!(%peer, service_id, method_id, status = %status, "handler returned error");
                        encode_response(status.code(), status.message().unwrap_or_default().as_bytes())
                    }
                },
                None => {
                    tracing::warn!(%peer, service_id, "service not found");
                    encode_response(RPCCode::INVALID_SERVICE_ID, b"")
                }
            };

            if let Err(e) = send_message(&socket, &response).await {
                break Err(e);
            }
        };

        tracing::info!(%peer, "session closed");
        result
    }
}

/// Encode a response as `[status_code: u16 LE][body]`.
///
/// For non-OK codes the body is the status message.
pub fn encode_response(code: status_code_t, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RESPONSE_ENVELOPE_SIZE + body.len());
    buf.put_u16_le(code);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// Build the request envelope: `[service_id: u16 LE][method_id: u16 LE][body]`.
pub fn encode_request(service_id: u16, method_id: u16, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(REQUEST_ENVELOPE_SIZE + body.len());
    buf.put_u16_le(service_id);
    buf.put_u16_le(method_id);
    buf.extend_from_slice(body);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::frame;
    use crate::service::{ServiceHandler, ServiceRegistry};
    use crate::transport::decode_frame;
    use async_trait::async_trait;
    use lfsmon_types::{MonitorCode, Status};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSocket {
        outbox: Arc<Mutex<Vec<Bytes>>>,
        inbox: Mutex<VecDeque<Bytes>>,
    }

    impl MockSocket {
        fn new(requests: Vec<Bytes>) -> (Self, Arc<Mutex<Vec<Bytes>>>) {
            let outbox = Arc::new(Mutex::new(Vec::new()));
            let socket = Self {
                outbox: Arc::clone(&outbox),
                inbox: Mutex::new(requests.into_iter().map(|r| Bytes::from(frame(&r))).collect()),
            };
            (socket, outbox)
        }
    }

    #[async_trait]
    impl Socket for MockSocket {
        async fn send(&self, data: Bytes) -> Result<(), NetError> {
            self.outbox.lock().push(data);
            Ok(())
        }
        async fn recv(&self) -> Result<Bytes, NetError> {
            self.inbox.lock().pop_front().ok_or(NetError::ConnectionClosed)
        }
        fn peer_addr(&self) -> SocketAddr {
            "10.0.0.1:5000".parse().unwrap()
        }
        fn local_addr(&self) -> SocketAddr {
            "0.0.0.0:9000".parse().unwrap()
        }
        async fn close(&self) {}
    }

    struct EchoService;

    #[async_trait]
    impl ServiceHandler for EchoService {
        fn service_id(&self) -> u16 {
            1
        }
        fn service_name(&self) -> &str {
            "echo"
        }
        async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes, Status> {
            if method_id == 7 {
                return Err(Status::with_message(MonitorCode::UNSUPPORTED_ROLE, "no ost"));
            }
            Ok(request)
        }
    }

    fn responses(outbox: &Mutex<Vec<Bytes>>) -> Vec<(u16, Bytes)> {
        outbox
            .lock()
            .iter()
            .map(|f| {
                let payload = decode_frame(f.clone()).unwrap();
                (u16::from_le_bytes([payload[0], payload[1]]), payload.slice(2..))
            })
            .collect()
    }

    fn shared_registry() -> Arc<dyn SessionFactory> {
        let registry = ServiceRegistry::new();
        registry.register(Box::new(EchoService));
        Arc::new(Arc::new(registry))
    }

    #[test]
    fn test_encode_request() {
        let req = encode_request(1, 2, b"hello");
        assert_eq!(req.len(), 4 + 5);
        assert_eq!(u16::from_le_bytes([req[0], req[1]]), 1);
        assert_eq!(u16::from_le_bytes([req[2], req[3]]), 2);
        assert_eq!(&req[4..], b"hello");
    }

    #[tokio::test]
    async fn test_handle_connection_echo_and_error() {
        let (socket, outbox) = MockSocket::new(vec![
            encode_request(1, 0, b"ping"),
            encode_request(1, 7, b""),
            encode_request(99, 0, b""),
        ]);

        let result =
            Server::handle_connection(socket, shared_registry(), Arc::new(Notify::new())).await;
        assert!(matches!(result, Err(NetError::ConnectionClosed)));

        let resp = responses(&outbox);
        assert_eq!(resp.len(), 3);
        assert_eq!(resp[0], (StatusCode::OK, Bytes::from_static(b"ping")));
        assert_eq!(resp[1], (MonitorCode::UNSUPPORTED_ROLE, Bytes::from_static(b"no ost")));
        assert_eq!(resp[2].0, RPCCode::INVALID_SERVICE_ID);
    }

    #[tokio::test]
    async fn test_short_request_is_answered() {
        let (socket, outbox) = MockSocket::new(vec![Bytes::from_static(b"x")]);
        let _ = Server::handle_connection(socket, shared_registry(), Arc::new(Notify::new())).await;
        assert_eq!(responses(&outbox)[0].0, RPCCode::REQUEST_IS_EMPTY);
    }

    struct CountingFactory {
        opened: AtomicUsize,
    }

    impl SessionFactory for CountingFactory {
        fn open_session(&self, _peer: SocketAddr) -> Arc<ServiceRegistry> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Arc::new(ServiceRegistry::new())
        }
    }

    #[tokio::test]
    async fn test_session_opened_per_connection() {
        let factory = Arc::new(CountingFactory {
            opened: AtomicUsize::new(0),
        });
        for _ in 0..2 {
            let (socket, _) = MockSocket::new(vec![]);
            let _ = Server::handle_connection(
                socket,
                Arc::clone(&factory) as Arc<dyn SessionFactory>,
                Arc::new(Notify::new()),
            )
            .await;
        }
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }
}
