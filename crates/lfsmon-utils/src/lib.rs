pub mod background_runner;
pub mod retry;

pub use background_runner::{sleep_or_shutdown, BackgroundRunner, ShutdownSignal};
pub use retry::FixedRetry;
