//! Framed request/reply RPC used between the aggregator and node collectors.
//!
//! Every message is an 8-byte [`MessageHeader`] followed by its payload.
//! Requests carry `[service_id: u16][method_id: u16][body]`, replies carry
//! `[status_code: u16][body]`, all little-endian.

pub mod error;
pub mod message;
pub mod socket;
pub mod transport;
pub mod service;
pub mod server;
pub mod client;

pub use error::NetError;
pub use message::MessageHeader;
pub use socket::{Listener, Socket};
pub use transport::{recv_message, send_message, AsyncConnector};
pub use service::{ServiceHandler, ServiceRegistry, SessionFactory};
pub use server::Server;
pub use client::RpcClient;
