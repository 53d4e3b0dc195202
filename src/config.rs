use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const EVENTS_PER_SECOND_RANGE: RangeInclusive<i64> = 1..=200_000;
/// Lower bound is one display frame so a flush loop never spins.
pub const BUFFER_INTERVAL_MS_RANGE: RangeInclusive<i64> = 16..=10_000;
pub const THROTTLE_THRESHOLD_RANGE: RangeInclusive<i64> = 2..=1_000_000;
pub const WINDOW_SIZE_RANGE: RangeInclusive<i64> = 1..=10_000;
pub const ROW_HEIGHT_RANGE: RangeInclusive<i64> = 1..=1_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub events_per_second: u32,
    pub buffer_interval_ms: u64,
    pub throttle_threshold: usize,
    /// Viewport height, in rows.
    pub window_size: usize,
    pub row_height: u32,
    pub burst_enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            events_per_second: 2_000,
            buffer_interval_ms: 100,
            throttle_threshold: 500,
            window_size: 20,
            row_height: 1,
            burst_enabled: false,
        }
    }
}

impl StreamConfig {
    pub fn buffer_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_interval_ms)
    }

    pub fn viewport_height(&self) -> u64 {
        self.window_size as u64 * self.row_height as u64
    }

    /// Build a config from raw values, clamping each into range.
    pub fn clamped(patch: &ConfigPatch) -> Self {
        let mut config = Self::default();
        config.apply(patch);
        config
    }

    /// This config with every field forced into its valid range.
    pub fn clamp(self) -> Self {
        Self::clamped(&ConfigPatch {
            events_per_second: Some(wide(self.events_per_second)),
            buffer_interval_ms: Some(wide(self.buffer_interval_ms)),
            throttle_threshold: Some(wide(self.throttle_threshold)),
            window_size: Some(wide(self.window_size)),
            row_height: Some(wide(self.row_height)),
            burst_enabled: Some(self.burst_enabled),
        })
    }

    /// Apply every field present in `patch`, clamped into its valid range.
    /// Returns true if any field actually changed.
    pub fn apply(&mut self, patch: &ConfigPatch) -> bool {
        let before = *self;

        if let Some(eps) = patch.events_per_second {
            self.events_per_second = clamp(eps, EVENTS_PER_SECOND_RANGE) as u32;
        }
        if let Some(ms) = patch.buffer_interval_ms {
            self.buffer_interval_ms = clamp(ms, BUFFER_INTERVAL_MS_RANGE) as u64;
        }
        if let Some(threshold) = patch.throttle_threshold {
            self.throttle_threshold = clamp(threshold, THROTTLE_THRESHOLD_RANGE) as usize;
        }
        if let Some(rows) = patch.window_size {
            self.window_size = clamp(rows, WINDOW_SIZE_RANGE) as usize;
        }
        if let Some(height) = patch.row_height {
            self.row_height = clamp(height, ROW_HEIGHT_RANGE) as u32;
        }
        if let Some(burst) = patch.burst_enabled {
            self.burst_enabled = burst;
        }

        *self != before
    }
}

fn clamp(value: i64, range: RangeInclusive<i64>) -> i64 {
    value.clamp(*range.start(), *range.end())
}

fn wide<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Partial reconfiguration. Fields are wide and signed so that out-of-range
/// requests can be expressed and then clamped.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub events_per_second: Option<i64>,
    pub buffer_interval_ms: Option<i64>,
    pub throttle_threshold: Option<i64>,
    pub window_size: Option<i64>,
    pub row_height: Option<i64>,
    pub burst_enabled: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True if the patch carries a field the event source cares about.
    pub fn touches_source(&self) -> bool {
        self.events_per_second.is_some() || self.burst_enabled.is_some()
    }
}

/// A config value paired with a version that increments on every effective
/// change. Readers compare versions instead of relying on update ordering.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: u64,
    pub config: StreamConfig,
}

impl VersionedConfig {
    pub fn new(config: StreamConfig) -> Self {
        Self { version: 0, config }
    }

    /// Returns true if the patch changed the config (and bumped the version).
    pub fn apply(&mut self, patch: &ConfigPatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        let changed = self.config.apply(patch);
        if changed {
            self.version += 1;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_interval_clamps_to_minimum() {
        let mut config = StreamConfig::default();
        config.apply(&ConfigPatch { buffer_interval_ms: Some(-50), ..Default::default() });
        assert_eq!(config.buffer_interval_ms, 16);
    }

    #[test]
    fn oversized_values_clamp_to_maximum() {
        let config = StreamConfig::clamped(&ConfigPatch {
            events_per_second: Some(i64::MAX),
            throttle_threshold: Some(0),
            row_height: Some(5_000),
            ..Default::default()
        });
        assert_eq!(config.events_per_second, 200_000);
        assert_eq!(config.throttle_threshold, 2);
        assert_eq!(config.row_height, 1_000);
    }

    #[test]
    fn clamp_fixes_out_of_range_fields() {
        let config = StreamConfig {
            events_per_second: 0,
            buffer_interval_ms: 0,
            throttle_threshold: usize::MAX,
            window_size: 0,
            row_height: u32::MAX,
            burst_enabled: true,
        }
        .clamp();
        assert_eq!(config.events_per_second, 1);
        assert_eq!(config.buffer_interval_ms, 16);
        assert_eq!(config.throttle_threshold, 1_000_000);
        assert_eq!(config.window_size, 1);
        assert_eq!(config.row_height, 1_000);
        assert!(config.burst_enabled);
        assert_eq!(StreamConfig::default().clamp(), StreamConfig::default());
    }

    #[test]
    fn unchanged_patch_keeps_version() {
        let mut versioned = VersionedConfig::new(StreamConfig::default());
        let same = ConfigPatch { buffer_interval_ms: Some(100), ..Default::default() };
        assert!(!versioned.apply(&same));
        assert_eq!(versioned.version, 0);

        let changed = ConfigPatch { burst_enabled: Some(true), ..Default::default() };
        assert!(versioned.apply(&changed));
        assert_eq!(versioned.version, 1);
    }

    #[test]
    fn patch_deserializes_from_partial_json() {
        let patch: ConfigPatch = serde_json::from_str(r#"{"eventsPerSecond": 500}"#).unwrap();
        assert_eq!(patch.events_per_second, Some(500));
        assert!(patch.touches_source());
        assert_eq!(patch.buffer_interval_ms, None);
    }
}
