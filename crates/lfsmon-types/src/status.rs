use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status_code::{self, status_code_t, StatusCode};

/// A status value carrying a code and optional message.
///
/// This is the error half of every RPC reply; the code survives the wire,
/// the message is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    /// Create a status with just a code.
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create a status with a code and a descriptive message.
    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Produce a human-readable description like `"Monitor::UnsupportedRole(3000) no mdt"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}
