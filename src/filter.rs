use crate::params::ParamUpdate;
use serde::{Deserialize, Serialize};

/// Output filter level, ordered strictest-last. Each level admits a subset
/// of the level below it for non-first updates; a first observation is
/// always reportable regardless of level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterLevel {
    /// Report everything.
    All = 0,
    /// Only changed values.
    Changed = 1,
    /// Changed values, excluding continuously-varying measurements.
    NoMeasurements = 2,
    /// As level 2, also excluding date/time values.
    NoDateTime = 3,
}

impl FilterLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(FilterLevel::All),
            1 => Some(FilterLevel::Changed),
            2 => Some(FilterLevel::NoMeasurements),
            3 => Some(FilterLevel::NoDateTime),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decides per update whether it is reportable under the current level.
/// The level is runtime-mutable via the command channel; a change takes
/// effect on the next evaluation, never retroactively.
#[derive(Debug, Clone, Copy)]
pub struct OutputFilter {
    level: FilterLevel,
}

impl OutputFilter {
    pub fn new(level: FilterLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> FilterLevel {
        self.level
    }

    pub fn set_level(&mut self, level: FilterLevel) {
        self.level = level;
    }

    pub fn admit(&self, update: &ParamUpdate) -> bool {
        if update.first {
            return true;
        }
        match self.level {
            FilterLevel::All => true,
            FilterLevel::Changed => update.changed,
            FilterLevel::NoMeasurements => update.changed && !update.key.category.is_measurement(),
            FilterLevel::NoDateTime => {
                update.changed
                    && !update.key.category.is_measurement()
                    && !update.key.category.is_datetime()
            }
        }
    }
}
