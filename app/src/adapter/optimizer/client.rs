use std::collections::HashMap;

use infrastructure::HttpClientConfig;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use crate::coordinator::{OptimizationProfile, OptimizationRequest, ProfilePoint};
use crate::core::time::DateTime;
use crate::core::unit::{DegreeCelsius, KiloWatt};
use crate::history::{HistoryBatch, RemoteDataDates};
use crate::port::{OptimizerError, OptimizerPort};

const LAMBDA_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(40);

/// Client for the remote optimization endpoint. All operations go through a
/// single URL; the requested operation is part of the payload.
#[derive(Debug, Clone)]
pub struct OptimizerClient {
    client: ClientWithMiddleware,
    url: String,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    operation: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

/// Second element of every response. Application-level failures arrive with
/// an HTTP 200 and success set to false.
#[derive(Debug, Deserialize)]
struct LambdaStatus {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    x: String,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct ProfileResults {
    temps: Vec<SeriesPoint>,
    prices: Vec<SeriesPoint>,
    base_demand: Vec<SeriesPoint>,
    optimised_demand: Vec<SeriesPoint>,
    base_cost: f64,
    optimised_cost: f64,
}

impl OptimizerClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(None).new_tracing_client()?;

        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    async fn call<T: Serialize>(&self, operation: &'static str, body: &T) -> Result<serde_json::Value, OptimizerError> {
        let request = self.client.post(&self.url).json(&Envelope { operation, body }).send();

        let response = tokio::time::timeout(LAMBDA_TIMEOUT, request)
            .await
            .map_err(|_| OptimizerError::Timeout)?
            .map_err(|e| OptimizerError::Communication { message: e.to_string() })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(OptimizerError::Authentication),
            StatusCode::BAD_GATEWAY => {
                tracing::debug!("Bad gateway from optimizer endpoint, likely a cold start or deploy in progress");
            }
            _ => {}
        }

        let response = response
            .error_for_status()
            .map_err(|e| OptimizerError::Communication { message: e.to_string() })?;

        let (results, status): (serde_json::Value, LambdaStatus) = response
            .json()
            .await
            .map_err(|e| OptimizerError::Communication { message: e.to_string() })?;

        if !status.success {
            return Err(OptimizerError::Lambda {
                message: status.error_message.unwrap_or_else(|| "unknown error".to_owned()),
            });
        }

        Ok(results)
    }

    fn parse<T: serde::de::DeserializeOwned>(results: serde_json::Value) -> Result<T, OptimizerError> {
        serde_json::from_value(results).map_err(|e| OptimizerError::Communication {
            message: format!("Unexpected response shape: {}", e),
        })
    }
}

fn to_profile(results: ProfileResults) -> Result<OptimizationProfile, OptimizerError> {
    fn index(series: Vec<SeriesPoint>) -> HashMap<String, f64> {
        series.into_iter().map(|p| (p.x, p.y)).collect()
    }

    let prices = index(results.prices);
    let base_demand = index(results.base_demand);
    let optimised_demand = index(results.optimised_demand);

    let mut points = Vec::with_capacity(results.temps.len());
    for temp in results.temps {
        let timestamp = DateTime::from_schedule_str(&temp.x).map_err(|e| OptimizerError::Communication {
            message: format!("Invalid schedule timestamp {}: {}", temp.x, e),
        })?;

        let missing = || OptimizerError::Communication {
            message: format!("Incomplete schedule interval at {}", temp.x),
        };

        points.push(ProfilePoint {
            timestamp,
            setpoint: DegreeCelsius(temp.y),
            price: *prices.get(&temp.x).ok_or_else(missing)?,
            base_demand: KiloWatt(*base_demand.get(&temp.x).ok_or_else(missing)?),
            optimised_demand: KiloWatt(*optimised_demand.get(&temp.x).ok_or_else(missing)?),
        });
    }

    points.sort_by_key(|p| p.timestamp);

    Ok(OptimizationProfile {
        points,
        base_cost: results.base_cost,
        optimised_cost: results.optimised_cost,
        projected_percent_savings: results.base_cost / results.optimised_cost * 100.0 - 100.0,
    })
}

impl OptimizerPort for OptimizerClient {
    async fn get_profile(&self, request: &OptimizationRequest) -> Result<OptimizationProfile, OptimizerError> {
        let results = self.call("get_profile", request).await?;
        to_profile(Self::parse(results)?)
    }

    async fn upload_history(&self, batch: &HistoryBatch) -> Result<RemoteDataDates, OptimizerError> {
        let results = self.call("upload_history", batch).await?;
        Self::parse(results)
    }

    async fn get_data_dates(&self, user_hash: &str) -> Result<RemoteDataDates, OptimizerError> {
        let results = self
            .call("get_data_dates", &serde_json::json!({ "user_hash": user_hash }))
            .await?;
        Self::parse(results)
    }
}
