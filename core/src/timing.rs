//! Duration estimates for narration when no synthesis feedback exists.

use std::time::Duration;

/// Floor for any estimated line, in milliseconds.
pub const MIN_FALLBACK_MS: f64 = 2400.0;
/// Estimated time per spoken word at rate 1.0, in milliseconds.
pub const MS_PER_WORD: f64 = 380.0;
/// Short lines are counted as at least this many words.
pub const MIN_WORDS: usize = 3;

const MIN_RATE: f32 = 0.05;

/// Estimate how long `text` would take to narrate at `rate`.
///
/// `max(2400, max(3, words) * 380) / rate`, rounded to whole milliseconds.
pub fn fallback_speech_duration(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(MIN_WORDS);
    let base = (words as f64 * MS_PER_WORD).max(MIN_FALLBACK_MS);
    let rate = if rate.is_finite() {
        rate.max(MIN_RATE)
    } else {
        1.0
    };
    Duration::from_millis((base / rate as f64).round() as u64)
}
