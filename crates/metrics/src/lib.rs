pub mod prometheus;
pub mod tracing;

pub use crate::prometheus::PrometheusMetrics;
pub use crate::tracing::{init_tracing, TracingService};
