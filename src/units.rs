//! Weight units and trend helpers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const LB_TO_KG: f64 = 0.453_592_37;
const KG_TO_LB: f64 = 2.204_622_62;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Metric,
    Imperial,
}

impl std::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightUnit::Metric => write!(f, "metric"),
            WeightUnit::Imperial => write!(f, "imperial"),
        }
    }
}

/// A recorded weight, in whichever unit the caller keeps consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Convert between units, rounded to two decimals.
pub fn convert_weight(weight: f64, from: WeightUnit, to: WeightUnit) -> f64 {
    match (from, to) {
        (WeightUnit::Imperial, WeightUnit::Metric) => round2(weight * LB_TO_KG),
        (WeightUnit::Metric, WeightUnit::Imperial) => round2(weight * KG_TO_LB),
        _ => weight,
    }
}

pub fn format_weight(weight: f64, unit: WeightUnit) -> String {
    match unit {
        WeightUnit::Metric => format!("{} kg", weight),
        WeightUnit::Imperial => format!("{} lbs", weight),
    }
}

/// Average change per day between the two latest records.
///
/// `None` unless both exist, both fall within the last week, and `last` is
/// strictly after `prev`.
pub fn avg_daily_weight_change(
    last: Option<&WeightRecord>,
    prev: Option<&WeightRecord>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let (last, prev) = (last?, prev?);
    let week = Duration::days(7);
    if now - last.timestamp > week || now - prev.timestamp > week {
        return None;
    }

    let elapsed = last.timestamp - prev.timestamp;
    if elapsed <= Duration::zero() {
        return None;
    }

    let days = elapsed.num_milliseconds() as f64 / Duration::days(1).num_milliseconds() as f64;
    Some(round2((last.weight - prev.weight) / days))
}
