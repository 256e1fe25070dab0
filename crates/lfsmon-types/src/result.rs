use crate::status::Status;
use crate::status_code::status_code_t;

/// The result type used across RPC boundaries, with `Status` as the error.
pub type Result<T> = std::result::Result<T, Status>;

/// Create an error result from a status code.
pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

/// Create an error result from a status code and message.
pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}
