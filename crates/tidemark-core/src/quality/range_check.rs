use serde::{Deserialize, Serialize};

use super::AutoQcRoutine;
use crate::flags::Flag;
use crate::sensor_value::{RoutineFlag, SensorValue};

pub const ROUTINE_NAME: &str = "range_check";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Flags values outside configured limits. The `bad` limits take precedence
/// over the `questionable` ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeCheck {
    #[serde(default)]
    pub questionable: Option<Bounds>,
    #[serde(default)]
    pub bad: Option<Bounds>,
}

impl AutoQcRoutine for RangeCheck {
    fn name(&self) -> &'static str {
        ROUTINE_NAME
    }

    fn check(&self, value: &SensorValue) -> Option<RoutineFlag> {
        let number = value.double_value()?;

        let (flag, bounds) = match (self.bad, self.questionable) {
            (Some(bad), _) if !bad.contains(number) => (Flag::Bad, bad),
            (_, Some(questionable)) if !questionable.contains(number) => {
                (Flag::Questionable, questionable)
            }
            _ => return None,
        };

        Some(RoutineFlag::new(
            ROUTINE_NAME,
            flag,
            format!("Out of range ({} to {})", bounds.min, bounds.max),
        ))
    }
}
