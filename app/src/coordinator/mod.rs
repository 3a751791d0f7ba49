//! The update loop's decision engine: decides per tick whether to refresh the
//! optimization profile, keep draining the history backlog, or do nothing,
//! and shapes the profile into the setpoint that applies right now.

pub mod selector;

use anyhow::{Context, anyhow};
use derive_more::derive::{Display, Error};
use serde::Serialize;

use crate::core::time::DateTime;
use crate::core::unit::{DegreeCelsius, KiloWatt};
use crate::history::uploader::{BacklogStatus, HistoryUploader};
use crate::port::{ClimatePort, ClimateReading, OptimizerError, OptimizerPort, StateHistoryPort};
use crate::t;

/// Parameters of the remote optimization, sent with every profile request.
/// The live fields are recomputed from sensor readings on every tick.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRequest {
    pub set_point: DegreeCelsius,
    pub temp_range: DegreeCelsius,
    pub postcode: String,
    pub user_hash: String,
    pub initial_internal_temp: Option<DegreeCelsius>,
    pub outside_range: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePoint {
    pub timestamp: DateTime,
    pub setpoint: DegreeCelsius,
    pub price: f64,
    pub base_demand: KiloWatt,
    pub optimised_demand: KiloWatt,
}

/// A full optimization result: one point per scheduled interval, ascending by
/// timestamp, plus the schedule-wide cost figures.
#[derive(Debug, Clone)]
pub struct OptimizationProfile {
    pub points: Vec<ProfilePoint>,
    pub base_cost: f64,
    pub optimised_cost: f64,
    pub projected_percent_savings: f64,
}

/// The point-in-time answer applied to the heat pump and shown to the user.
#[derive(Debug, Clone)]
pub struct ScheduleSlice {
    pub timestamp: DateTime,
    pub setpoint: DegreeCelsius,
    pub price: f64,
    pub base_demand: KiloWatt,
    pub optimised_demand: KiloWatt,
    pub base_cost: f64,
    pub optimised_cost: f64,
    pub projected_percent_savings: f64,
}

#[derive(Debug, Display, Error)]
pub enum UpdateError {
    #[display("Authentication failed, reconfiguration required: {_0}")]
    AuthenticationRequired(anyhow::Error),

    #[display("Update failed: {_0}")]
    Failed(anyhow::Error),
}

/// Drives one poll tick: expiry/override bookkeeping, history catch-up, the
/// remote optimizer call and the setpoint push.
///
/// The controller performs no retries of its own; the host's poll cadence is
/// the sole retry mechanism, and a failed tick leaves the previously computed
/// slice in place.
pub struct ProfileRefreshController<H, C, O> {
    climate: C,
    optimizer: O,
    uploader: HistoryUploader<H, O>,
    climate_entity_id: String,
    request: OptimizationRequest,
    profile: Option<OptimizationProfile>,
    expire_time: Option<DateTime>,
    manual_update: bool,
    outside_range: bool,
    last_commanded: Option<DegreeCelsius>,
    last_slice: Option<ScheduleSlice>,
}

impl<H, C, O> ProfileRefreshController<H, C, O>
where
    H: StateHistoryPort,
    C: ClimatePort,
    O: OptimizerPort,
{
    pub fn new(
        climate: C,
        optimizer: O,
        uploader: HistoryUploader<H, O>,
        climate_entity_id: String,
        request: OptimizationRequest,
    ) -> Self {
        Self {
            climate,
            optimizer,
            uploader,
            climate_entity_id,
            request,
            profile: None,
            expire_time: None,
            manual_update: false,
            outside_range: false,
            last_commanded: None,
            last_slice: None,
        }
    }

    /// The slice computed by the last successful tick.
    pub fn current_schedule(&self) -> Option<&ScheduleSlice> {
        self.last_slice.as_ref()
    }

    pub async fn tick(&mut self) -> Result<ScheduleSlice, UpdateError> {
        let reading = self
            .climate
            .climate_reading(&self.climate_entity_id)
            .await
            .context("Error reading climate entity")
            .map_err(UpdateError::Failed)?;

        self.detect_user_setpoint_change(&reading);
        self.refresh_live_state(&reading);

        if self.expired() || self.manual_update {
            self.refresh_profile().await.map_err(classify)?;
        } else if !self.uploader.history_upload_complete() {
            // Throttled to one pass per tick so backlog pagination never
            // blocks the poll cycle
            if self.uploader.upload_old_history().await.map_err(classify)? == BacklogStatus::Completed {
                // Local history is now believed complete remotely: re-optimize
                // once over the full data set
                self.manual_update = true;
            }
        }

        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| UpdateError::Failed(anyhow!("No optimization profile available")))?;

        let mut slice = selector::current_slice(profile, t!(now)).map_err(UpdateError::Failed)?;

        if self.outside_range {
            // Comfort takes priority over cost while far outside tolerance
            slice.setpoint = self.request.set_point;
        }

        self.push_temperature(slice.setpoint).await;
        self.last_slice = Some(slice.clone());

        Ok(slice)
    }

    /// A target temperature that differs from the last one this service
    /// commanded means the user touched the thermostat. The new value becomes
    /// the setpoint and forces an immediate re-optimization.
    fn detect_user_setpoint_change(&mut self, reading: &ClimateReading) {
        let (Some(observed), Some(commanded)) = (reading.target_temperature, self.last_commanded) else {
            return;
        };

        if (observed - commanded).0.abs() > 0.05 {
            tracing::info!(
                "User setpoint change detected ({} -> {}), forcing re-optimization",
                commanded,
                observed
            );
            self.request.set_point = observed;
            self.manual_update = true;
        }
    }

    fn refresh_live_state(&mut self, reading: &ClimateReading) {
        if let Some(current) = reading.current_temperature {
            self.request.initial_internal_temp = Some(current);
        }

        let was_outside = self.outside_range;
        self.outside_range = match self.request.initial_internal_temp {
            Some(internal) => (internal - self.request.set_point).0.abs() > self.request.temp_range.0,
            None => false,
        };
        self.request.outside_range = self.outside_range;

        if was_outside && !self.outside_range {
            // Comfort restored: resume cost-aware scheduling right away
            self.manual_update = true;
        }
    }

    fn expired(&self) -> bool {
        match self.expire_time {
            Some(expire_time) => t!(now) >= expire_time,
            None => true,
        }
    }

    async fn refresh_profile(&mut self) -> anyhow::Result<()> {
        // One upload batch may not cover the whole gap: drain the backlog of
        // recent history before asking for a fresh schedule
        loop {
            let missing = self.uploader.columns_missing_from_remote().await?;
            if missing.is_empty() {
                break;
            }

            if self.uploader.upload_new_history(&missing).await? == 0 {
                tracing::warn!("History upload made no progress for {:?}, refreshing anyway", missing);
                break;
            }
        }

        let profile = self.optimizer.get_profile(&self.request).await?;

        let last_scheduled = profile
            .points
            .last()
            .map(|p| p.timestamp)
            .ok_or_else(|| anyhow!("Optimizer returned an empty schedule"))?;

        // The grace offset compensates for the optimizer's daily refresh
        // cadence; expiry never moves backwards
        let expire_time = last_scheduled + t!(90 minutes);
        self.expire_time = Some(match self.expire_time {
            Some(previous) => previous.max(expire_time),
            None => expire_time,
        });

        tracing::debug!("New optimization profile valid until {}", expire_time);

        self.profile = Some(profile);
        self.manual_update = false;

        Ok(())
    }

    async fn push_temperature(&mut self, value: DegreeCelsius) {
        match self.climate.set_target_temperature(&self.climate_entity_id, value).await {
            Ok(()) => self.last_commanded = Some(value),
            Err(e) => {
                // Actuator rejection never aborts the tick
                tracing::error!("Heat pump rejected target temperature {}: {:?}", value, e);
            }
        }
    }

    #[cfg(test)]
    fn expire_time(&self) -> Option<DateTime> {
        self.expire_time
    }
}

fn classify(err: anyhow::Error) -> UpdateError {
    let authentication = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<OptimizerError>(), Some(OptimizerError::Authentication)));

    if authentication {
        UpdateError::AuthenticationRequired(err)
    } else {
        UpdateError::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{Duration, FIXED_NOW};
    use crate::history::SensorColumn;
    use crate::testing::{FakeClimate, FakeHistory, FakeOptimizer, FakeProfileBuilder, power_change};

    fn request() -> OptimizationRequest {
        OptimizationRequest {
            set_point: DegreeCelsius(20.0),
            temp_range: DegreeCelsius(3.0),
            postcode: "SW1A 1AA".to_owned(),
            user_hash: "hash-1".to_owned(),
            initial_internal_temp: None,
            outside_range: false,
        }
    }

    async fn controller_with(
        climate: FakeClimate,
        optimizer: FakeOptimizer,
    ) -> ProfileRefreshController<FakeHistory, FakeClimate, FakeOptimizer> {
        let mut uploader = HistoryUploader::new(
            FakeHistory::default(),
            optimizer.clone(),
            vec![],
            crate::core::unit::TemperatureUnit::Celsius,
            "hash-1".to_owned(),
            None,
        );
        // No columns configured: the backlog drains on the first pass
        uploader.upload_old_history().await.unwrap();

        ProfileRefreshController::new(climate, optimizer, uploader, "climate.heat_pump".to_owned(), request())
    }

    fn fixed_now() -> DateTime {
        DateTime::from_iso("2026-02-01T12:00:00Z").unwrap()
    }

    #[tokio::test]
    async fn test_first_tick_fetches_profile_and_applies_current_interval() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now - Duration::hours(1), 19.0)
                        .point(now - Duration::minutes(30), 21.5)
                        .point(now + Duration::minutes(30), 22.0)
                        .build(),
                );
                let climate = FakeClimate::default();

                let mut controller = controller_with(climate.clone(), optimizer.clone()).await;
                let slice = controller.tick().await.unwrap();

                assert_eq!(optimizer.profile_calls(), 1);
                assert_eq!(slice.timestamp, now - Duration::minutes(30));
                assert_eq!(slice.setpoint, DegreeCelsius(21.5));
                assert_eq!(climate.set_calls(), vec![DegreeCelsius(21.5)]);
                assert_eq!(
                    controller.expire_time(),
                    Some(now + Duration::minutes(30) + Duration::minutes(90))
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_unexpired_profile_is_not_refetched() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now - Duration::minutes(30), 21.5)
                        .point(now + Duration::hours(6), 22.0)
                        .build(),
                );

                let mut controller = controller_with(FakeClimate::default(), optimizer.clone()).await;
                controller.tick().await.unwrap();
                controller.tick().await.unwrap();

                assert_eq!(optimizer.profile_calls(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_expired_profile_is_refetched_and_expiry_is_monotonic() {
        let now = fixed_now();
        let optimizer = FakeOptimizer::default();
        optimizer.set_profile(
            FakeProfileBuilder::new()
                .point(now - Duration::minutes(30), 21.5)
                .point(now + Duration::minutes(30), 22.0)
                .build(),
        );

        let mut controller = FIXED_NOW
            .scope(now, async {
                let mut controller = controller_with(FakeClimate::default(), optimizer.clone()).await;
                controller.tick().await.unwrap();
                controller
            })
            .await;
        let first_expiry = controller.expire_time().unwrap();

        let later = now + Duration::hours(3);
        FIXED_NOW
            .scope(later, async {
                controller.tick().await.unwrap();
            })
            .await;

        assert_eq!(optimizer.profile_calls(), 2);
        assert!(controller.expire_time().unwrap() >= first_expiry);
    }

    #[tokio::test]
    async fn test_deadband_overrides_optimizer_setpoint() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(FakeProfileBuilder::new().point(now, 23.5).build());

                let climate = FakeClimate::default();
                climate.set_current_temperature(25.0); // |25 - 20| > 3

                let mut controller = controller_with(climate.clone(), optimizer).await;
                let slice = controller.tick().await.unwrap();

                assert_eq!(slice.setpoint, DegreeCelsius(20.0));
                assert_eq!(climate.set_calls(), vec![DegreeCelsius(20.0)]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_deadband_falling_edge_forces_reoptimization() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now, 21.0)
                        .point(now + Duration::hours(6), 22.0)
                        .build(),
                );

                let climate = FakeClimate::default();
                climate.set_current_temperature(25.0);

                let mut controller = controller_with(climate.clone(), optimizer.clone()).await;
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 1);

                // Still outside: no extra optimizer traffic
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 1);

                // Back inside tolerance: falling edge forces a refresh
                climate.set_current_temperature(21.0);
                let slice = controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 2);
                assert_eq!(slice.setpoint, DegreeCelsius(21.0));
            })
            .await;
    }

    #[tokio::test]
    async fn test_user_setpoint_change_forces_refresh_with_new_setpoint() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now, 21.0)
                        .point(now + Duration::hours(6), 22.0)
                        .build(),
                );
                let climate = FakeClimate::default();

                let mut controller = controller_with(climate.clone(), optimizer.clone()).await;
                controller.tick().await.unwrap();

                // The user turns the thermostat up between ticks
                climate.set_target_temperature_locally(23.0);
                controller.tick().await.unwrap();

                assert_eq!(optimizer.profile_calls(), 2);
                assert_eq!(optimizer.last_request().unwrap().set_point, DegreeCelsius(23.0));
            })
            .await;
    }

    #[tokio::test]
    async fn test_authentication_failure_is_fatal() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();

                let mut controller = controller_with(FakeClimate::default(), optimizer.clone()).await;
                optimizer.fail_with_authentication();
                let err = controller.tick().await.unwrap_err();

                assert!(matches!(err, UpdateError::AuthenticationRequired(_)));
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_slice() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now, 21.0)
                        .point(now + Duration::hours(6), 22.0)
                        .build(),
                );
                let climate = FakeClimate::default();

                let mut controller = controller_with(climate.clone(), optimizer.clone()).await;
                controller.tick().await.unwrap();

                // Next refresh attempt fails transiently
                optimizer.fail_with_communication();
                climate.set_target_temperature_locally(23.0); // forces a refresh

                let err = controller.tick().await.unwrap_err();
                assert!(matches!(err, UpdateError::Failed(_)));

                let stale = controller.current_schedule().unwrap();
                assert_eq!(stale.setpoint, DegreeCelsius(21.0));
            })
            .await;
    }

    #[tokio::test]
    async fn test_backlog_completion_triggers_one_reoptimization() {
        let now = fixed_now();
        FIXED_NOW
            .scope(now, async {
                let entity = "sensor.heat_pump_power";
                let history = FakeHistory::default();
                for hours_ago in 0..24 {
                    history.add(entity, power_change(entity, hours_ago));
                }

                let optimizer = FakeOptimizer::default();
                optimizer.set_profile(
                    FakeProfileBuilder::new()
                        .point(now, 21.0)
                        .point(now + Duration::hours(6), 22.0)
                        .build(),
                );

                let uploader = HistoryUploader::new(
                    history,
                    optimizer.clone(),
                    vec![(SensorColumn::HeatPumpPower, entity.to_owned())],
                    crate::core::unit::TemperatureUnit::Celsius,
                    "hash-1".to_owned(),
                    None,
                );
                let mut controller = ProfileRefreshController::new(
                    FakeClimate::default(),
                    optimizer.clone(),
                    uploader,
                    "climate.heat_pump".to_owned(),
                    request(),
                );

                // Tick 1: refresh (uploads the recent window, fetches profile)
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 1);

                // Tick 2: backlog pass finds nothing older, marks complete
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 1);

                // Tick 3: the completion forces one re-optimization
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 2);

                // Tick 4: steady state
                controller.tick().await.unwrap();
                assert_eq!(optimizer.profile_calls(), 2);
            })
            .await;
    }
}
