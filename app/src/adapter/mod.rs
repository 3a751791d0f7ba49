pub mod homeassistant;
pub mod optimizer;
