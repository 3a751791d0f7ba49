use crate::core::time::DateTime;

use super::{OptimizationProfile, ScheduleSlice};

/// Picks the schedule interval that applies right now: the greatest timestamp
/// not after `now` (last-known-value, not nearest-neighbor).
///
/// A profile whose intervals all lie ahead of `now` can occur right after a
/// refresh whose first interval starts slightly in the future; the earliest
/// interval is used then instead of failing.
pub fn current_slice(profile: &OptimizationProfile, now: DateTime) -> anyhow::Result<ScheduleSlice> {
    let point = profile
        .points
        .iter()
        .rev()
        .find(|p| p.timestamp <= now)
        .or_else(|| profile.points.first())
        .ok_or_else(|| anyhow::anyhow!("Optimization profile contains no intervals"))?;

    Ok(ScheduleSlice {
        timestamp: point.timestamp,
        setpoint: point.setpoint,
        price: point.price,
        base_demand: point.base_demand,
        optimised_demand: point.optimised_demand,
        base_cost: profile.base_cost,
        optimised_cost: profile.optimised_cost,
        projected_percent_savings: profile.projected_percent_savings,
    })
}
