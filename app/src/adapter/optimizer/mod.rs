mod client;

pub use client::OptimizerClient;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Optimizer {
    pub url: String,
}

impl Optimizer {
    pub fn new_client(&self) -> anyhow::Result<OptimizerClient> {
        OptimizerClient::new(&self.url)
    }
}
