#![allow(dead_code)]

pub mod builder;
mod datetime;
mod duration;
mod range;

pub use datetime::DateTime;
pub use duration::Duration;
pub use range::DateTimeRange;

#[cfg(test)]
pub use datetime::FIXED_NOW;
