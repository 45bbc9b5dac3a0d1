pub mod metrics;
pub mod tracing;

pub use self::metrics::{encode_metrics, init_metrics, Metrics};
pub use self::tracing::init_tracing;
