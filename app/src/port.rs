#![allow(async_fn_in_trait)]

use std::collections::HashMap;

use anyhow::Result;
use derive_more::derive::{Display, Error};

use crate::coordinator::{OptimizationProfile, OptimizationRequest};
use crate::core::time::{DateTime, DateTimeRange};
use crate::core::unit::{DegreeCelsius, TemperatureUnit};
use crate::history::{HistoryBatch, RemoteDataDates};

/// One raw state-change record as logged by the installation's recorder.
#[derive(Debug, Clone)]
pub struct RawStateChange {
    pub entity_id: String,
    pub state: String,
    pub attributes: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime,
}

impl RawStateChange {
    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.attributes.get("unit_of_measurement").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HvacMode {
    Heat,
    Cool,
    HeatCool,
    Off,
    Other(String),
}

impl From<&str> for HvacMode {
    fn from(value: &str) -> Self {
        match value {
            "heat" => HvacMode::Heat,
            "cool" => HvacMode::Cool,
            "heat_cool" => HvacMode::HeatCool,
            "off" => HvacMode::Off,
            other => HvacMode::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClimateReading {
    pub hvac_mode: HvacMode,
    pub current_temperature: Option<DegreeCelsius>,
    pub target_temperature: Option<DegreeCelsius>,
}

/// Static installation details, read once at startup.
#[derive(Debug, Clone)]
pub struct InstallationInfo {
    pub temperature_unit: TemperatureUnit,
    pub version: String,
    pub time_zone: String,
    pub currency: String,
    pub country: Option<String>,
    pub language: String,
}

/// Read access to the installation's recorded state-change history.
pub trait StateHistoryPort {
    async fn state_changes(&self, entity_id: &str, range: DateTimeRange) -> Result<Vec<RawStateChange>>;
}

/// The heat pump's climate entity: live readings and setpoint control.
pub trait ClimatePort {
    async fn climate_reading(&self, entity_id: &str) -> Result<ClimateReading>;

    /// Pushes a new target temperature. Implementations honor the HVAC mode,
    /// steering the low end of the range when the mode is heat/cool.
    async fn set_target_temperature(&self, entity_id: &str, value: DegreeCelsius) -> Result<()>;
}

/// The remote optimizer and its history store, behind a single endpoint.
pub trait OptimizerPort {
    async fn get_profile(&self, request: &OptimizationRequest) -> Result<OptimizationProfile, OptimizerError>;

    async fn upload_history(&self, batch: &HistoryBatch) -> Result<RemoteDataDates, OptimizerError>;

    async fn get_data_dates(&self, user_hash: &str) -> Result<RemoteDataDates, OptimizerError>;
}

#[derive(Debug, Display, Error)]
pub enum OptimizerError {
    #[display("Invalid credentials")]
    Authentication,

    #[display("Timeout calling the optimizer")]
    Timeout,

    #[display("Error communicating with the optimizer: {message}")]
    Communication { message: String },

    #[display("Optimizer reported a failure: {message}")]
    Lambda { message: String },
}
