//! Service ids, method ids and message bodies exchanged over lfsmon RPC.
//!
//! Bodies are JSON; the envelope and status codes live in `lfsmon-net`.

pub mod counters;
pub mod query;

use bytes::Bytes;
use lfsmon_types::{Status, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use counters::*;
pub use query::*;

/// Serialize a message body.
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, Status> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(|e| Status::with_message(StatusCode::INVALID_FORMAT, e.to_string()))
}

/// Deserialize a message body. An empty body decodes as JSON `null`.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Status> {
    let body: &[u8] = if body.is_empty() { b"null" } else { body };
    serde_json::from_slice(body)
        .map_err(|e| Status::with_message(StatusCode::INVALID_FORMAT, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_garbage() {
        let err = decode::<TargetListRsp>(b"{not json").unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_FORMAT);
    }

    #[test]
    fn test_empty_body_is_unit() {
        let _unit: () = decode(b"").unwrap();
    }
}
