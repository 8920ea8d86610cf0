//! Custom actix middlewares.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsCollector;
