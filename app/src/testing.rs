//! In-memory stand-ins for the service's ports, shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::coordinator::{OptimizationProfile, OptimizationRequest, ProfilePoint};
use crate::core::time::{DateTime, DateTimeRange, Duration};
use crate::core::unit::{DegreeCelsius, KiloWatt};
use crate::history::{HistoryBatch, RemoteDataDates, SensorColumn};
use crate::port::{ClimatePort, ClimateReading, HvacMode, OptimizerError, OptimizerPort, RawStateChange, StateHistoryPort};
use crate::t;

pub fn power_change(entity_id: &str, hours_ago: i64) -> RawStateChange {
    RawStateChange {
        entity_id: entity_id.to_owned(),
        state: "1500".to_owned(),
        attributes: HashMap::from([(
            "unit_of_measurement".to_owned(),
            serde_json::json!("W"),
        )]),
        timestamp: t!(now) - Duration::hours(hours_ago),
    }
}

#[derive(Clone, Default)]
pub struct FakeHistory {
    changes: Arc<Mutex<HashMap<String, Vec<RawStateChange>>>>,
}

impl FakeHistory {
    pub fn add(&self, entity_id: &str, change: RawStateChange) {
        self.changes.lock().unwrap().entry(entity_id.to_owned()).or_default().push(change);
    }
}

impl StateHistoryPort for FakeHistory {
    async fn state_changes(&self, entity_id: &str, range: DateTimeRange) -> anyhow::Result<Vec<RawStateChange>> {
        let mut result: Vec<RawStateChange> = self
            .changes
            .lock()
            .unwrap()
            .get(entity_id)
            .map(|v| v.iter().filter(|c| range.contains(c.timestamp)).cloned().collect())
            .unwrap_or_default();

        result.sort_by_key(|c| c.timestamp);
        Ok(result)
    }
}

enum FailKind {
    Authentication,
    Communication,
}

#[derive(Default)]
struct FakeOptimizerState {
    stored: HashMap<SensorColumn, Vec<DateTime>>,
    uploads: Vec<HistoryBatch>,
    profile: Option<OptimizationProfile>,
    profile_calls: usize,
    last_request: Option<OptimizationRequest>,
    fail: Option<FailKind>,
}

impl FakeOptimizerState {
    fn dates(&self) -> RemoteDataDates {
        let mut dates = RemoteDataDates::default();
        for (column, timestamps) in &self.stored {
            dates.oldest.insert(*column, timestamps.first().copied());
            dates.newest.insert(*column, timestamps.last().copied());
        }
        dates
    }

    fn check_failure(&self) -> Result<(), OptimizerError> {
        match self.fail {
            Some(FailKind::Authentication) => Err(OptimizerError::Authentication),
            Some(FailKind::Communication) => Err(OptimizerError::Communication {
                message: "connection refused".to_owned(),
            }),
            None => Ok(()),
        }
    }
}

/// Remote optimizer double that keeps an actual per-column store, so cursor
/// arithmetic is exercised against realistic oldest/newest responses.
#[derive(Clone, Default)]
pub struct FakeOptimizer {
    inner: Arc<Mutex<FakeOptimizerState>>,
}

impl FakeOptimizer {
    pub fn set_profile(&self, profile: OptimizationProfile) {
        self.inner.lock().unwrap().profile = Some(profile);
    }

    pub fn fail_with_authentication(&self) {
        self.inner.lock().unwrap().fail = Some(FailKind::Authentication);
    }

    pub fn fail_with_communication(&self) {
        self.inner.lock().unwrap().fail = Some(FailKind::Communication);
    }

    pub fn profile_calls(&self) -> usize {
        self.inner.lock().unwrap().profile_calls
    }

    pub fn last_request(&self) -> Option<OptimizationRequest> {
        self.inner.lock().unwrap().last_request.clone()
    }

    pub fn uploads(&self) -> Vec<HistoryBatch> {
        self.inner.lock().unwrap().uploads.clone()
    }

    pub fn oldest(&self, column: SensorColumn) -> Option<DateTime> {
        self.inner.lock().unwrap().stored.get(&column).and_then(|v| v.first().copied())
    }

    pub fn newest(&self, column: SensorColumn) -> Option<DateTime> {
        self.inner.lock().unwrap().stored.get(&column).and_then(|v| v.last().copied())
    }
}

impl OptimizerPort for FakeOptimizer {
    async fn get_profile(&self, request: &OptimizationRequest) -> Result<OptimizationProfile, OptimizerError> {
        let mut state = self.inner.lock().unwrap();
        state.check_failure()?;

        state.profile_calls += 1;
        state.last_request = Some(request.clone());
        state.profile.clone().ok_or(OptimizerError::Lambda {
            message: "no profile scripted".to_owned(),
        })
    }

    async fn upload_history(&self, batch: &HistoryBatch) -> Result<RemoteDataDates, OptimizerError> {
        let mut state = self.inner.lock().unwrap();
        state.check_failure()?;

        for (column, samples) in &batch.histories {
            let stored = state.stored.entry(*column).or_default();
            stored.extend(samples.iter().map(|s| s.timestamp));
            stored.sort();
        }
        state.uploads.push(batch.clone());

        Ok(state.dates())
    }

    async fn get_data_dates(&self, _user_hash: &str) -> Result<RemoteDataDates, OptimizerError> {
        let state = self.inner.lock().unwrap();
        state.check_failure()?;

        Ok(state.dates())
    }
}

struct FakeClimateState {
    reading: ClimateReading,
    set_calls: Vec<DegreeCelsius>,
}

#[derive(Clone)]
pub struct FakeClimate {
    inner: Arc<Mutex<FakeClimateState>>,
}

impl Default for FakeClimate {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClimateState {
                reading: ClimateReading {
                    hvac_mode: HvacMode::Heat,
                    current_temperature: Some(DegreeCelsius(20.0)),
                    target_temperature: Some(DegreeCelsius(20.0)),
                },
                set_calls: vec![],
            })),
        }
    }
}

impl FakeClimate {
    pub fn set_current_temperature(&self, value: f64) {
        self.inner.lock().unwrap().reading.current_temperature = Some(DegreeCelsius(value));
    }

    /// Simulates the user adjusting the thermostat between ticks.
    pub fn set_target_temperature_locally(&self, value: f64) {
        self.inner.lock().unwrap().reading.target_temperature = Some(DegreeCelsius(value));
    }

    pub fn set_calls(&self) -> Vec<DegreeCelsius> {
        self.inner.lock().unwrap().set_calls.clone()
    }
}

impl ClimatePort for FakeClimate {
    async fn climate_reading(&self, _entity_id: &str) -> anyhow::Result<ClimateReading> {
        Ok(self.inner.lock().unwrap().reading.clone())
    }

    async fn set_target_temperature(&self, _entity_id: &str, value: DegreeCelsius) -> anyhow::Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.set_calls.push(value);
        state.reading.target_temperature = Some(value);
        Ok(())
    }
}

pub struct FakeProfileBuilder {
    points: Vec<ProfilePoint>,
}

impl FakeProfileBuilder {
    pub fn new() -> Self {
        Self { points: vec![] }
    }

    pub fn point(mut self, timestamp: DateTime, setpoint: f64) -> Self {
        self.points.push(ProfilePoint {
            timestamp,
            setpoint: DegreeCelsius(setpoint),
            price: 0.3,
            base_demand: KiloWatt(2.0),
            optimised_demand: KiloWatt(1.2),
        });
        self
    }

    pub fn build(mut self) -> OptimizationProfile {
        self.points.sort_by_key(|p| p.timestamp);
        OptimizationProfile {
            points: self.points,
            base_cost: 100.0,
            optimised_cost: 80.0,
            projected_percent_savings: 25.0,
        }
    }
}
