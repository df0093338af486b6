//! Application startup: logging, HTTP server and shutdown wiring

mod http;
mod logging;
mod shutdown;

pub use http::{main_server, routes};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, ROOT_LOG_FILE, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_os_signals};
