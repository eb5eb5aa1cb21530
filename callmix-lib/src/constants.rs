//! Shared constants for mixing, audiohook and feature defaults.

/// Sample rate used when nothing else decides one (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Mixing intervals a softmix bridge accepts (ms).
pub const MIXING_INTERVALS_MS: [u32; 3] = [10, 20, 40];

/// Mixing interval used when none is configured (ms).
pub const DEFAULT_MIXING_INTERVAL_MS: u32 = 20;

/// Signed-linear rates the softmix engine is willing to mix at (Hz).
///
/// Automatic rate selection clamps a channel's native rate to the
/// nearest entry at or above it.
pub const SUPPORTED_SAMPLE_RATES: [u32; 9] =
    [8000, 12000, 16000, 24000, 32000, 44100, 48000, 96000, 192000];

/// Allowed lead of one audiohook side over the other before a sync flush (ms).
pub const AUDIOHOOK_SYNC_TOLERANCE_MS: u64 = 100;

/// Backlog above which a small-queue audiohook drops its buffers (ms).
pub const AUDIOHOOK_SMALL_QUEUE_TOLERANCE_MS: u64 = 100;

/// Longest a reader waits on an audiohook trigger before re-checking (ms).
pub const AUDIOHOOK_TRIGGER_WAIT_MS: u64 = 50;

/// Audio a sample factory is able to hold before refusing input (ms).
pub const FACTORY_HOLD_MS: u64 = 1000;

/// Per-digit timeout while collecting a DTMF feature sequence (ms).
pub const FEATURE_DIGIT_TIMEOUT_MS: u64 = 3000;

/// Longest DTMF sequence a feature hook may use.
pub const MAXIMUM_DTMF_FEATURE_STRING: usize = 11;

/// Two-party bridges served by one multiplexed thread.
pub const MULTIPLEXED_BRIDGES_PER_THREAD: usize = 4;

/// Average absolute amplitude above which a softmix channel is talking.
pub const DEFAULT_TALK_THRESHOLD: u32 = 160;

/// Quiet time after which a talking softmix channel stops talking (ms).
pub const DEFAULT_SILENCE_THRESHOLD_MS: u64 = 2500;
