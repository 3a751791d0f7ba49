use std::collections::HashMap;

use anyhow::Context;
use infrastructure::HttpClientConfig;
use reqwest_middleware::ClientWithMiddleware;

use crate::core::time::{DateTime, DateTimeRange};
use crate::core::unit::{DegreeCelsius, TemperatureUnit};
use crate::port::{ClimatePort, ClimateReading, HvacMode, InstallationInfo, RawStateChange, StateHistoryPort};

/// REST client for the Home Assistant instance this service runs alongside.
#[derive(Debug, Clone)]
pub struct HaClient {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct HaStateEvent {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
    last_updated: DateTime,
}

#[derive(Debug, serde::Deserialize)]
struct HaConfig {
    version: String,
    time_zone: String,
    currency: String,
    country: Option<String>,
    language: String,
    unit_system: HaUnitSystem,
}

#[derive(Debug, serde::Deserialize)]
struct HaUnitSystem {
    temperature: String,
}

impl HaClient {
    pub fn new(url: &str, token: &str) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(Some(token.to_owned())).new_tracing_client()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
        })
    }

    /// Static installation details, read once at startup. An unsupported
    /// display unit is a configuration error and fails setup.
    pub async fn installation_info(&self) -> anyhow::Result<InstallationInfo> {
        let response = self
            .client
            .get(format!("{}/api/config", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let config: HaConfig = response.json().await.context("Error reading Home Assistant config")?;

        Ok(InstallationInfo {
            temperature_unit: TemperatureUnit::try_from(config.unit_system.temperature.as_str())?,
            version: config.version,
            time_zone: config.time_zone,
            currency: config.currency,
            country: config.country,
            language: config.language,
        })
    }

    async fn get_state(&self, entity_id: &str) -> anyhow::Result<HaStateEvent> {
        let response = self
            .client
            .get(format!("{}/api/states/{}", self.base_url, entity_id))
            .send()
            .await?
            .error_for_status()?;

        response
            .json::<HaStateEvent>()
            .await
            .with_context(|| format!("Error getting state of {}", entity_id))
    }

    #[tracing::instrument(skip(self, service_data))]
    async fn call_service(&self, domain: &str, service: &str, service_data: serde_json::Value) -> anyhow::Result<()> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);

        tracing::info!("Calling HA service {}: {:?}", url, serde_json::to_string(&service_data)?);

        let response = self.client.post(url).json(&service_data).send().await?;
        response.error_for_status()?;

        Ok(())
    }

    fn attribute_f64(state: &HaStateEvent, key: &str) -> Option<f64> {
        state.attributes.get(key).and_then(|v| v.as_f64())
    }
}

impl StateHistoryPort for HaClient {
    async fn state_changes(&self, entity_id: &str, range: DateTimeRange) -> anyhow::Result<Vec<RawStateChange>> {
        let url = format!("{}/api/history/period/{}", self.base_url, range.start().to_iso_string());
        let response = self
            .client
            .get(url)
            .query(&[
                ("filter_entity_id", entity_id),
                ("end_time", &range.end().to_iso_string()),
                ("no_attributes", "false"),
            ])
            .send()
            .await?
            .error_for_status()?;

        // One inner list per requested entity
        let mut periods: Vec<Vec<HaStateEvent>> = response
            .json()
            .await
            .with_context(|| format!("Error getting history of {}", entity_id))?;

        let events = if periods.is_empty() { vec![] } else { periods.remove(0) };

        Ok(events
            .into_iter()
            .map(|e| RawStateChange {
                entity_id: e.entity_id,
                state: e.state,
                attributes: e.attributes,
                timestamp: e.last_updated,
            })
            .collect())
    }
}

impl ClimatePort for HaClient {
    async fn climate_reading(&self, entity_id: &str) -> anyhow::Result<ClimateReading> {
        let state = self.get_state(entity_id).await?;

        Ok(ClimateReading {
            current_temperature: Self::attribute_f64(&state, "current_temperature").map(DegreeCelsius),
            target_temperature: Self::attribute_f64(&state, "temperature")
                .or_else(|| Self::attribute_f64(&state, "target_temp_low"))
                .map(DegreeCelsius),
            hvac_mode: HvacMode::from(state.state.as_str()),
        })
    }

    async fn set_target_temperature(&self, entity_id: &str, value: DegreeCelsius) -> anyhow::Result<()> {
        let state = self.get_state(entity_id).await?;

        // In heat/cool mode the low end of the range is the controllable
        // quantity; the high end is preserved as-is
        let service_data = if HvacMode::from(state.state.as_str()) == HvacMode::HeatCool {
            let target_temp_high = Self::attribute_f64(&state, "target_temp_high")
                .ok_or_else(|| anyhow::anyhow!("{} is in heat_cool mode but has no target_temp_high", entity_id))?;

            serde_json::json!({
                "entity_id": entity_id,
                "target_temp_low": value.0,
                "target_temp_high": target_temp_high,
            })
        } else {
            serde_json::json!({
                "entity_id": entity_id,
                "temperature": value.0,
            })
        };

        self.call_service("climate", "set_temperature", service_data).await
    }
}
