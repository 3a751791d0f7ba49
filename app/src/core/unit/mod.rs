#![allow(dead_code)]

mod degree_celsius;
mod kilowatt;

pub use degree_celsius::DegreeCelsius;
pub use kilowatt::KiloWatt;

/// Temperature display unit of the installation, as reported by its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TryFrom<&str> for TemperatureUnit {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "°C" => Ok(TemperatureUnit::Celsius),
            "°F" => Ok(TemperatureUnit::Fahrenheit),
            other => anyhow::bail!("Unsupported temperature unit ({})", other),
        }
    }
}

impl std::fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "°C"),
            TemperatureUnit::Fahrenheit => write!(f, "°F"),
        }
    }
}
