use std::collections::HashMap;

use anyhow::bail;

use crate::core::unit::{DegreeCelsius, KiloWatt, TemperatureUnit};
use crate::port::RawStateChange;

use super::{ConstantAttributes, HistorySample, SensorColumn, StateValue};

/// Climate attributes that carry a temperature and need °C normalization.
const CLIMATE_TEMPERATURE_ATTRIBUTES: [&str; 4] =
    ["current_temperature", "target_temp_high", "target_temp_low", "temperature"];

/// Normalizes one column's raw state changes into upload-ready samples.
///
/// Temperatures come out in °C and power readings in kW, whatever the
/// installation logs them as.
pub fn states_to_history(
    column: SensorColumn,
    changes: &[RawStateChange],
    display_unit: TemperatureUnit,
) -> anyhow::Result<(Vec<HistorySample>, ConstantAttributes)> {
    let samples = match column {
        SensorColumn::ClimateEntity => climate_history(changes, display_unit)?,
        SensorColumn::HeatPumpPower => power_history(changes),
        SensorColumn::ExternalTemperature => external_temp_history(changes)?,
    };

    Ok((samples, constant_attributes_of(changes)?))
}

/// Climate states are logged in the installation's display unit, not the unit
/// of the entity. Conversion keys off the display unit; past logs recorded
/// under a previously configured unit cannot be told apart.
fn climate_history(changes: &[RawStateChange], display_unit: TemperatureUnit) -> anyhow::Result<Vec<HistorySample>> {
    let mut samples = Vec::with_capacity(changes.len());

    for change in changes {
        let mut attributes = change.attributes.clone();

        for key in CLIMATE_TEMPERATURE_ATTRIBUTES {
            let Some(value) = attributes.get(key) else {
                continue;
            };

            match value.as_f64() {
                Some(raw) => {
                    let celsius = match display_unit {
                        TemperatureUnit::Fahrenheit => DegreeCelsius::from_fahrenheit(raw),
                        TemperatureUnit::Celsius => DegreeCelsius(raw),
                    };
                    attributes.insert(key.to_owned(), serde_json::json!(celsius.0));
                }
                None => {
                    tracing::warn!("Could not convert climate attribute {} ({}) to float", key, value);
                }
            }
        }

        samples.push(HistorySample {
            timestamp: change.timestamp,
            state: StateValue::Text(change.state.clone()),
            attributes,
        });
    }

    Ok(samples)
}

/// Power readings carry their unit with every record, so each time step is
/// converted on its own. Unsupported units skip the sample, they do not fail
/// the batch.
fn power_history(changes: &[RawStateChange]) -> Vec<HistorySample> {
    let mut samples = Vec::with_capacity(changes.len());

    for change in changes {
        if change.state.is_empty() {
            tracing::warn!("State change of {} at {} has no state value", change.entity_id, change.timestamp);
            continue;
        }

        let Some(unit) = change.unit_of_measurement() else {
            tracing::warn!("unit_of_measurement missing from state change of {} at {}", change.entity_id, change.timestamp);
            continue;
        };

        let kilowatts = match (unit, change.state.parse::<f64>()) {
            ("W", Ok(raw)) => KiloWatt::from_watts(raw),
            ("kW", Ok(raw)) => KiloWatt(raw),
            ("W" | "kW", Err(_)) => {
                tracing::warn!("Could not convert state ({}) of {} to float", change.state, change.entity_id);
                continue;
            }
            (other, _) => {
                tracing::warn!("Power sensor {} uses unsupported unit ({})", change.entity_id, other);
                continue;
            }
        };

        samples.push(HistorySample {
            timestamp: change.timestamp,
            state: StateValue::Number(kilowatts.0),
            attributes: HashMap::new(),
        });
    }

    samples
}

/// External temperature readings carry their unit with every record as well,
/// but an unknown unit here is a configuration error and fails the batch.
fn external_temp_history(changes: &[RawStateChange]) -> anyhow::Result<Vec<HistorySample>> {
    let mut samples = Vec::with_capacity(changes.len());

    for change in changes {
        if change.state.is_empty() {
            tracing::warn!("State change of {} at {} has no state value", change.entity_id, change.timestamp);
            continue;
        }

        let Some(unit) = change.unit_of_measurement() else {
            tracing::warn!("unit_of_measurement missing from state change of {} at {}", change.entity_id, change.timestamp);
            continue;
        };

        let celsius = match (unit, change.state.parse::<f64>()) {
            ("°F", Ok(raw)) => DegreeCelsius::from_fahrenheit(raw),
            ("°C", Ok(raw)) => DegreeCelsius(raw),
            ("°F" | "°C", Err(_)) => {
                tracing::warn!("Could not convert state ({}) of {} to float", change.state, change.entity_id);
                continue;
            }
            (other, _) => {
                bail!("External temperature sensor {} uses unknown unit ({})", change.entity_id, other);
            }
        };

        samples.push(HistorySample {
            timestamp: change.timestamp,
            state: StateValue::Number(celsius.0),
            attributes: HashMap::new(),
        });
    }

    Ok(samples)
}

fn constant_attributes_of(changes: &[RawStateChange]) -> anyhow::Result<ConstantAttributes> {
    let latest = match changes.last() {
        Some(c) => c,
        None => bail!("No state changes to extract"),
    };

    Ok(ConstantAttributes {
        entity_id: latest.entity_id.clone(),
        attributes: latest.attributes.clone(),
    })
}
