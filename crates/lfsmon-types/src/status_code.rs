/// Status code type, carried as a little-endian `u16` on the wire.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const QUEUE_FULL: status_code_t = 6;
    pub const INTERRUPTED: status_code_t = 27;
    pub const INVALID_FORMAT: status_code_t = 33;
    pub const IO_ERROR: status_code_t = 69;
    pub const UNKNOWN: status_code_t = 999;
}

/// RPC status codes (2xxx).
pub mod RPCCode {
    use super::status_code_t;

    pub const INVALID_MESSAGE_TYPE: status_code_t = 2000;
    pub const REQUEST_IS_EMPTY: status_code_t = 2001;
    pub const VERIFY_REQUEST_FAILED: status_code_t = 2002;
    pub const VERIFY_RESPONSE_FAILED: status_code_t = 2003;
    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const SEND_FAILED: status_code_t = 2007;
    pub const INVALID_SERVICE_ID: status_code_t = 2010;
    pub const INVALID_METHOD_ID: status_code_t = 2011;
    pub const SOCKET_CLOSED: status_code_t = 2012;
    pub const CONNECT_FAILED: status_code_t = 2013;
}

/// Counter-monitoring status codes (3xxx).
pub mod MonitorCode {
    use super::status_code_t;

    /// The node does not host the requested target family.
    pub const UNSUPPORTED_ROLE: status_code_t = 3000;
    pub const COUNTER_READ_FAILED: status_code_t = 3001;
    /// A steady-state diff was requested before the baseline was taken.
    pub const NOT_INITIALIZED: status_code_t = 3002;
}

/// Return a human-readable name for a status code.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::QUEUE_FULL => "QueueFull",
        StatusCode::INTERRUPTED => "Interrupted",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::UNKNOWN => "Unknown",

        RPCCode::INVALID_MESSAGE_TYPE => "RPC::InvalidMessageType",
        RPCCode::REQUEST_IS_EMPTY => "RPC::RequestIsEmpty",
        RPCCode::VERIFY_REQUEST_FAILED => "RPC::VerifyRequestFailed",
        RPCCode::VERIFY_RESPONSE_FAILED => "RPC::VerifyResponseFailed",
        RPCCode::TIMEOUT => "RPC::Timeout",
        RPCCode::INVALID_ADDR => "RPC::InvalidAddr",
        RPCCode::SEND_FAILED => "RPC::SendFailed",
        RPCCode::INVALID_SERVICE_ID => "RPC::InvalidServiceID",
        RPCCode::INVALID_METHOD_ID => "RPC::InvalidMethodID",
        RPCCode::SOCKET_CLOSED => "RPC::SocketClosed",
        RPCCode::CONNECT_FAILED => "RPC::ConnectFailed",

        MonitorCode::UNSUPPORTED_ROLE => "Monitor::UnsupportedRole",
        MonitorCode::COUNTER_READ_FAILED => "Monitor::CounterReadFailed",
        MonitorCode::NOT_INITIALIZED => "Monitor::NotInitialized",

        _ => "Unknown",
    }
}
