//! Sensor type inference from the set of reported fields.

use crate::sensor::types::SensorType;
use std::collections::HashSet;

/// Infer the sensor type from field presence. First matching rule wins:
///
/// 1. `pressure` -> THB
/// 2. `humidity` -> TH
/// 3. `currentspeed` or `averagespeed` -> W
/// 4. `raintotal` or `rainrate` -> R
/// 5. `uvindex` -> UV
/// 6. `brightness` -> L
/// 7. `temperature` -> T
///
/// Returns `None` when nothing matches.
pub fn classify<'a, I>(fields: I) -> Option<SensorType>
where
    I: IntoIterator<Item = &'a str>,
{
    let present: HashSet<&str> = fields.into_iter().collect();
    let has = |name: &str| present.contains(name);

    if has("pressure") {
        Some(SensorType::Thb)
    } else if has("humidity") {
        Some(SensorType::Th)
    } else if has("currentspeed") || has("averagespeed") {
        Some(SensorType::Wind)
    } else if has("raintotal") || has("rainrate") {
        Some(SensorType::Rain)
    } else if has("uvindex") {
        Some(SensorType::Uv)
    } else if has("brightness") {
        Some(SensorType::Light)
    } else if has("temperature") {
        Some(SensorType::Temperature)
    } else {
        None
    }
}
