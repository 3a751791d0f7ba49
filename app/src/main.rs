use settings::Settings;

use crate::coordinator::{OptimizationRequest, ProfileRefreshController, UpdateError};
use crate::core::unit::DegreeCelsius;
use crate::history::UserInfo;
use crate::history::uploader::HistoryUploader;

mod adapter;
mod coordinator;
mod core;
mod history;
pub mod port;
mod settings;
#[cfg(test)]
mod testing;

const UPDATE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");

    settings.monitoring.init().expect("Error initializing monitoring");

    let ha_client = settings
        .homeassistant
        .new_client()
        .expect("Error creating Home Assistant client");
    let optimizer_client = settings.optimizer.new_client().expect("Error creating optimizer client");

    let installation = ha_client
        .installation_info()
        .await
        .expect("Error reading installation info");

    tracing::info!(
        "Starting {} against installation {} ({})",
        settings.monitoring.app_name,
        installation.version,
        installation.temperature_unit
    );

    let uploader = HistoryUploader::new(
        ha_client.clone(),
        optimizer_client.clone(),
        settings.heating.column_bindings(),
        installation.temperature_unit,
        settings.heating.user_hash.clone(),
        Some(UserInfo::new(&installation, &settings.heating.postcode, &settings.heating.tariff)),
    );

    let request = OptimizationRequest {
        set_point: DegreeCelsius(settings.heating.set_point),
        temp_range: DegreeCelsius(settings.heating.temp_range),
        postcode: settings.heating.postcode.clone(),
        user_hash: settings.heating.user_hash.clone(),
        initial_internal_temp: None,
        outside_range: false,
    };

    let mut controller = ProfileRefreshController::new(
        ha_client.clone(),
        optimizer_client,
        uploader,
        settings.heating.climate_entity_id.clone(),
        request,
    );

    let mut interval = tokio::time::interval(UPDATE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match controller.tick().await {
            Ok(slice) => {
                tracing::debug!("Schedule slice applied: setpoint {}", slice.setpoint);
            }
            Err(UpdateError::AuthenticationRequired(e)) => {
                tracing::error!("Optimizer rejected the credentials, shutting down: {:?}", e);
                std::process::exit(1);
            }
            Err(UpdateError::Failed(e)) => {
                tracing::warn!("Update failed, keeping previous schedule: {:?}", e);
            }
        }
    }
}
