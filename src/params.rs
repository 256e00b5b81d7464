use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Semantic category of a reportable value. Categories partition the topic
/// namespace and carry the measurement/date-time tags the output filter
/// levels act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamCategory {
    Temperature,
    Flow,
    Flag,
    DateTime,
    Schedule,
    Counter,
    System,
    Unknown,
}

impl ParamCategory {
    /// Single-character code used at a fixed offset in per-parameter topics.
    pub fn code(self) -> char {
        match self {
            ParamCategory::Temperature => 'T',
            ParamCategory::Flow => 'F',
            ParamCategory::Flag => 'B',
            ParamCategory::DateTime => 'D',
            ParamCategory::Schedule => 'H',
            ParamCategory::Counter => 'C',
            ParamCategory::System => 'S',
            ParamCategory::Unknown => 'U',
        }
    }

    /// Continuously-varying measurements, excluded at filter level 2+.
    pub fn is_measurement(self) -> bool {
        matches!(self, ParamCategory::Temperature | ParamCategory::Flow)
    }

    /// Date/time values, excluded at filter level 3.
    pub fn is_datetime(self) -> bool {
        matches!(self, ParamCategory::DateTime)
    }
}

/// Stable identifier for one reportable value. Keys never change meaning
/// across the process lifetime; topic strings are deterministic functions
/// of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterKey {
    pub category: ParamCategory,
    pub source: u8,
    pub index: u16,
}

impl ParameterKey {
    pub fn new(category: ParamCategory, source: u8, index: u16) -> Self {
        Self {
            category,
            source,
            index,
        }
    }
}

/// Typed scalar or small structured value. Comparison is exact field
/// comparison, never approximate, so change detection is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Signed fixed-point temperature, 1/256 degree C per LSB (bus f8.8).
    Temperature(i16),
    /// Flow rate in 1/10 l/min.
    Flow(u16),
    Flag(bool),
    Byte(u8),
    Counter(u32),
    DateTime {
        year: u8,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
    },
    Schedule {
        slot: u8,
        setting: u8,
    },
}

impl ParamValue {
    /// Text rendering used for per-parameter topic payloads.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Temperature(raw) => format!("{:.2}", f32::from(*raw) / 256.0),
            ParamValue::Flow(raw) => format!("{:.1}", f32::from(*raw) / 10.0),
            ParamValue::Flag(v) => if *v { "1" } else { "0" }.to_string(),
            ParamValue::Byte(v) => format!("{v}"),
            ParamValue::Counter(v) => format!("{v}"),
            ParamValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
            } => format!("20{year:02}-{month:02}-{day:02} {hour:02}:{minute:02}"),
            ParamValue::Schedule { slot, setting } => format!("{slot}:{setting}"),
        }
    }

    /// JSON rendering used for the aggregated document.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Temperature(raw) => {
                serde_json::json!(f64::from(*raw) / 256.0)
            }
            ParamValue::Flow(raw) => serde_json::json!(f64::from(*raw) / 10.0),
            ParamValue::Flag(v) => serde_json::json!(v),
            ParamValue::Byte(v) => serde_json::json!(v),
            ParamValue::Counter(v) => serde_json::json!(v),
            ParamValue::DateTime { .. } | ParamValue::Schedule { .. } => {
                serde_json::json!(self.render())
            }
        }
    }
}

/// One parameter observation after table processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamUpdate {
    pub key: ParameterKey,
    pub value: ParamValue,
    pub changed: bool,
    pub first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStatus {
    pub changed: bool,
    pub first: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub tracked: u32,
    pub updates: u32,
    pub changes: u32,
    pub rejected_unknown: u32,
}

/// Last-known value per parameter key. Values are created on first decode,
/// updated on every subsequent decode and never deleted while the process
/// runs. Unknown-functionality keys are capped so an enabled include-unknown
/// path cannot grow the table without bound.
#[derive(Debug)]
pub struct ParameterTable {
    values: HashMap<ParameterKey, ParamValue>,
    max_entries: usize,
    stats: TableStats,
}

impl ParameterTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            values: HashMap::new(),
            max_entries,
            stats: TableStats::default(),
        }
    }

    /// Store `value` under `key` and report whether it changed and whether
    /// this is the first observation of the key. Returns `None` when an
    /// unknown-category key is deterministically rejected at the cap.
    pub fn update(&mut self, key: ParameterKey, value: ParamValue) -> Option<UpdateStatus> {
        if key.category == ParamCategory::Unknown
            && !self.values.contains_key(&key)
            && self.values.len() >= self.max_entries
        {
            self.stats.rejected_unknown = self.stats.rejected_unknown.saturating_add(1);
            return None;
        }

        self.stats.updates = self.stats.updates.saturating_add(1);
        let previous = self.values.insert(key, value);
        let status = match previous {
            None => UpdateStatus {
                changed: true,
                first: true,
            },
            Some(old) => UpdateStatus {
                changed: old != value,
                first: false,
            },
        };
        if status.changed {
            self.stats.changes = self.stats.changes.saturating_add(1);
        }
        self.stats.tracked = self.values.len() as u32;
        Some(status)
    }

    pub fn get(&self, key: &ParameterKey) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: u16) -> ParameterKey {
        ParameterKey::new(ParamCategory::Temperature, 0, index)
    }

    #[test]
    fn test_first_then_unchanged_then_changed() {
        let mut table = ParameterTable::new(64);

        let s1 = table.update(key(3), ParamValue::Temperature(5376)).unwrap();
        assert!(s1.first && s1.changed);

        let s2 = table.update(key(3), ParamValue::Temperature(5376)).unwrap();
        assert!(!s2.first && !s2.changed);

        let s3 = table.update(key(3), ParamValue::Temperature(5504)).unwrap();
        assert!(!s3.first && s3.changed);
    }

    #[test]
    fn test_value_comparison_is_exact() {
        let mut table = ParameterTable::new(64);
        table.update(key(1), ParamValue::Temperature(5376)).unwrap();

        // One LSB of f8.8 is far below any sensible rounding threshold,
        // and must still register as a change
        let status = table.update(key(1), ParamValue::Temperature(5377)).unwrap();
        assert!(status.changed);
    }

    #[test]
    fn test_unknown_keys_capped_deterministically() {
        let mut table = ParameterTable::new(2);
        let unknown = |i| ParameterKey::new(ParamCategory::Unknown, 0, i);

        assert!(table.update(unknown(0), ParamValue::Byte(1)).is_some());
        assert!(table.update(unknown(1), ParamValue::Byte(2)).is_some());
        assert!(table.update(unknown(2), ParamValue::Byte(3)).is_none());
        assert_eq!(table.stats().rejected_unknown, 1);

        // Existing unknown keys keep updating past the cap
        assert!(table.update(unknown(0), ParamValue::Byte(9)).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_known_categories_bypass_the_cap() {
        let mut table = ParameterTable::new(1);
        table
            .update(
                ParameterKey::new(ParamCategory::Unknown, 0, 0),
                ParamValue::Byte(0),
            )
            .unwrap();
        // Known-functionality keys form a closed set and are always admitted
        assert!(table.update(key(0), ParamValue::Temperature(0)).is_some());
    }

    #[test]
    fn test_temperature_rendering() {
        assert_eq!(ParamValue::Temperature(5504).render(), "21.50");
        assert_eq!(ParamValue::Temperature(-256).render(), "-1.00");
        assert_eq!(ParamValue::Flag(true).render(), "1");
    }
}
