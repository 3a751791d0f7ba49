//! Local sensor history: extraction from the recorder, unit normalization and
//! incremental upload to the remote store.
//!
//! All temperatures are normalized to °C and all power readings to kW before
//! anything leaves the house.

pub mod extractor;
pub mod uploader;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::time::DateTime;
use crate::port::InstallationInfo;

/// Logical measurement stream, independent of which entity backs it in a
/// given installation. Serialized as the remote store's column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorColumn {
    ClimateEntity,
    HeatPumpPower,
    ExternalTemperature,
}

impl SensorColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorColumn::ClimateEntity => "climate_entity",
            SensorColumn::HeatPumpPower => "heat_pump_power",
            SensorColumn::ExternalTemperature => "external_temperature",
        }
    }
}

impl std::fmt::Display for SensorColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySample {
    pub timestamp: DateTime,
    pub state: StateValue,
    pub attributes: HashMap<String, serde_json::Value>,
}

/// Attributes that do not vary per time step, taken once per column from the
/// most recent sample of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct ConstantAttributes {
    pub entity_id: String,
    pub attributes: HashMap<String, serde_json::Value>,
}

/// The exact payload unit uploaded to the remote store. Built fresh per
/// upload call and discarded once the store confirms it.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryBatch {
    pub histories: HashMap<SensorColumn, Vec<HistorySample>>,
    pub constant_attributes: HashMap<SensorColumn, ConstantAttributes>,
    pub user_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

/// Installation snapshot sent along with history uploads.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub service_version: String,
    pub installation_version: String,
    pub time_zone: String,
    pub currency: String,
    pub country: Option<String>,
    pub language: String,
    pub postcode: String,
    pub tariff: String,
}

impl UserInfo {
    pub fn new(installation: &InstallationInfo, postcode: &str, tariff: &str) -> Self {
        Self {
            service_version: env!("CARGO_PKG_VERSION").to_owned(),
            installation_version: installation.version.clone(),
            time_zone: installation.time_zone.clone(),
            currency: installation.currency.clone(),
            country: installation.country.clone(),
            language: installation.language.clone(),
            postcode: postcode.to_owned(),
            tariff: tariff.to_owned(),
        }
    }
}

/// Oldest and newest timestamp currently stored remotely, per column.
/// `None` means the store has no data for that column yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteDataDates {
    #[serde(rename = "oldest_dates")]
    pub oldest: HashMap<SensorColumn, Option<DateTime>>,
    #[serde(rename = "newest_dates")]
    pub newest: HashMap<SensorColumn, Option<DateTime>>,
}
