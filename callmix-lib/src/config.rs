//! Runtime configuration for the bridging core.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MIXING_INTERVAL_MS, DEFAULT_SILENCE_THRESHOLD_MS, DEFAULT_TALK_THRESHOLD,
    FEATURE_DIGIT_TIMEOUT_MS, MIXING_INTERVALS_MS, MULTIPLEXED_BRIDGES_PER_THREAD,
    SUPPORTED_SAMPLE_RATES,
};
use crate::error::ConfigError;

/// Serialized softmix tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftmixSettings {
    /// Emit talking state changes for participants.
    #[serde(alias = "talk_detection_events")]
    pub talk_detection: bool,
    /// Average absolute amplitude treated as speech.
    #[serde(alias = "dsp_talking_threshold")]
    pub talk_threshold: u32,
    /// Quiet time before a talker is considered silent (ms).
    #[serde(alias = "dsp_silence_threshold")]
    pub silence_threshold_ms: u64,
}

impl Default for SoftmixSettings {
    fn default() -> Self {
        Self {
            talk_detection: false,
            talk_threshold: DEFAULT_TALK_THRESHOLD,
            silence_threshold_ms: DEFAULT_SILENCE_THRESHOLD_MS,
        }
    }
}

/// Settings shared by every bridge created from one core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Softmix mixing interval (ms); one of 10, 20 or 40.
    #[serde(alias = "mixing_interval")]
    pub mixing_interval_ms: u32,
    /// Softmix mixing rate (Hz); 0 picks the highest native rate.
    #[serde(alias = "internal_sample_rate_hz")]
    pub internal_sample_rate: u32,
    /// Per-digit timeout while collecting a feature sequence (ms).
    pub feature_digit_timeout_ms: u64,
    /// Two-party bridges served by one multiplexed thread.
    pub multiplexed_bridges_per_thread: usize,
    pub softmix: SoftmixSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            mixing_interval_ms: DEFAULT_MIXING_INTERVAL_MS,
            internal_sample_rate: 0,
            feature_digit_timeout_ms: FEATURE_DIGIT_TIMEOUT_MS,
            multiplexed_bridges_per_thread: MULTIPLEXED_BRIDGES_PER_THREAD,
            softmix: SoftmixSettings::default(),
        }
    }
}

impl CoreConfig {
    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Load a JSON configuration file.
    ///
    /// # Arguments
    ///
    /// * `path` - File to read.
    ///
    /// # Returns
    ///
    /// The normalised configuration, or the io/parse failure.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Clamp values into the ranges the core supports.
    pub fn normalized(mut self) -> Self {
        let interval = normalize_mixing_interval(self.mixing_interval_ms);
        if interval != self.mixing_interval_ms {
            log::warn!(
                "mixing interval {}ms is not supported, using {}ms",
                self.mixing_interval_ms,
                interval
            );
            self.mixing_interval_ms = interval;
        }
        if self.internal_sample_rate != 0 {
            self.internal_sample_rate = normalize_sample_rate(self.internal_sample_rate);
        }
        self.multiplexed_bridges_per_thread = self.multiplexed_bridges_per_thread.max(1);
        self
    }
}

/// Nearest supported mixing interval; ties go to the shorter one.
pub fn normalize_mixing_interval(ms: u32) -> u32 {
    MIXING_INTERVALS_MS
        .iter()
        .copied()
        .min_by_key(|candidate| candidate.abs_diff(ms))
        .unwrap_or(DEFAULT_MIXING_INTERVAL_MS)
}

/// Smallest supported mixing rate at or above `rate`.
pub fn normalize_sample_rate(rate: u32) -> u32 {
    SUPPORTED_SAMPLE_RATES
        .iter()
        .copied()
        .find(|supported| *supported >= rate)
        .unwrap_or(SUPPORTED_SAMPLE_RATES[SUPPORTED_SAMPLE_RATES.len() - 1])
}
