mod http;

pub use http::HaClient;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistant {
    pub url: String,
    pub token: String,
}

impl HomeAssistant {
    pub fn new_client(&self) -> anyhow::Result<HaClient> {
        HaClient::new(&self.url, &self.token)
    }
}
