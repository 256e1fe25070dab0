#[allow(non_snake_case)]
pub mod status_code;

pub mod status;
pub mod result;

pub mod counters;
pub mod sample;
pub mod time;

// Re-export commonly used items at the crate root.
pub use counters::{CounterVector, MdsStats, OstStats, Role};
pub use result::{make_error, make_error_msg, Result};
pub use sample::{ClientCounters, CounterDiff, Sample};
pub use status::Status;
pub use status_code::*;
pub use time::{align_timestamp, elapsed_secs, Clock, ManualClock, SystemClock};
