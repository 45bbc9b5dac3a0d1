mod loader;
mod root;
mod telemetry;
mod throttling;

pub use loader::{load_from_path, load_from_str, validate_config};
pub use root::Config;
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use throttling::ThrottlingSettings;
