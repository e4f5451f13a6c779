use crate::model::score::Score;
use crate::model::ticks::Tick;
use log::info;

/// Granularity of a structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditUnit {
    #[default]
    Measure,
    Beat,
}

pub fn parse_edit_unit(s: &str) -> EditUnit {
    match s.to_lowercase().as_str() {
        "m" | "measure" | "bar" => EditUnit::Measure,
        "b" | "beat" => EditUnit::Beat,
        other => {
            info!("Unknown edit unit '{}', defaulting to `measure`..!", other);
            EditUnit::Measure
        }
    }
}

pub fn unit_ticks(score: &Score, unit: EditUnit) -> Tick {
    match unit {
        EditUnit::Measure => score.measure_tick(),
        EditUnit::Beat => score.beat_tick(),
    }
}

/// Tick where the 1-based unit `number` starts. `None` if it lies past the tick range.
pub fn unit_position(score: &Score, unit: EditUnit, number: u32) -> Option<Tick> {
    number.saturating_sub(1).checked_mul(unit_ticks(score, unit))
}
