mod http;
mod monitoring;

pub use http::client::HttpClientConfig;
pub use monitoring::{EnvFilterConfig, MonitoringConfig};
