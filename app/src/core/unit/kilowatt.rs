use std::fmt::Display;

use derive_more::derive::AsRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, AsRef, Serialize, Deserialize)]
pub struct KiloWatt(pub f64);

impl KiloWatt {
    pub fn from_watts(value: f64) -> Self {
        Self(value / 1000.0)
    }
}

impl From<f64> for KiloWatt {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<KiloWatt> for f64 {
    fn from(value: KiloWatt) -> Self {
        value.0
    }
}

impl Display for KiloWatt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} kW", self.0)
    }
}
