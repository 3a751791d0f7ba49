use config::{Config, ConfigError, Environment, File};
use infrastructure::MonitoringConfig;
use serde::Deserialize;

use crate::history::SensorColumn;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub monitoring: MonitoringConfig,
    pub homeassistant: crate::adapter::homeassistant::HomeAssistant,
    pub optimizer: crate::adapter::optimizer::Optimizer,
    pub heating: HeatingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeatingSettings {
    pub climate_entity_id: String,
    pub heat_pump_power_entity_id: Option<String>,
    pub external_temp_entity_id: Option<String>,
    pub postcode: String,
    pub tariff: String,
    pub user_hash: String,
    #[serde(default = "default_set_point")]
    pub set_point: f64,
    #[serde(default = "default_temp_range")]
    pub temp_range: f64,
}

fn default_set_point() -> f64 {
    20.0
}

fn default_temp_range() -> f64 {
    3.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::default().separator("_").list_separator(","));

        let s = builder.build()?;
        s.try_deserialize()
    }
}

impl HeatingSettings {
    /// The sensor columns to record, paired with the entity that feeds each.
    /// The climate entity is mandatory; the other columns are recorded only
    /// when an entity is configured for them.
    pub fn column_bindings(&self) -> Vec<(SensorColumn, String)> {
        let mut bindings = vec![(SensorColumn::ClimateEntity, self.climate_entity_id.clone())];

        if let Some(entity_id) = &self.heat_pump_power_entity_id {
            bindings.push((SensorColumn::HeatPumpPower, entity_id.clone()));
        }
        if let Some(entity_id) = &self.external_temp_entity_id {
            bindings.push((SensorColumn::ExternalTemperature, entity_id.clone()));
        }

        bindings
    }
}
