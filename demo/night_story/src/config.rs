use std::fs;
use std::path::{Path, PathBuf};

use nocturne_audio::{EspeakConfig, OutputConfig};
use nocturne_core::{SoundConfig, SpeechConfig};

/// High-level configuration for the night_story demo
#[derive(Clone, Debug)]
pub struct ExperienceConfig {
    pub speech: SpeechConfig,
    pub sound: SoundConfig,
    pub espeak: EspeakConfig,
    pub output: OutputConfig,
    pub display: DisplayConfig,
}

/// Front-end switches
#[derive(Clone, Debug)]
pub struct DisplayConfig {
    /// Print every state change as one JSON object per line instead of prose
    pub json_lines: bool,
    /// Use the speech engine; when off, lines are held for an estimated time
    pub speech_enabled: bool,
    /// Open an audio output device for sound effects
    pub sound_enabled: bool,
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            json_lines: env_flag("NIGHT_STORY_JSON", false),
            speech_enabled: env_flag("NIGHT_STORY_SPEECH", true),
            sound_enabled: env_flag("NIGHT_STORY_SOUND", true),
        }
    }
}

impl Default for ExperienceConfig {
    fn default() -> Self {
        // Module defaults already consider env vars
        Self {
            speech: SpeechConfig::default(),
            sound: SoundConfig::default(),
            espeak: EspeakConfig::default(),
            output: OutputConfig::from_env(),
            display: DisplayConfig::default(),
        }
    }
}

impl ExperienceConfig {
    /// Load configuration from a TOML file (path via NOCTURNE_CONFIG or ./night_story.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("NOCTURNE_CONFIG").unwrap_or_else(|_| "night_story.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "night_story", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target = "night_story", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "night_story", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        toml::from_str::<ExperienceToml>(s).map(|t| t.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ExperienceToml {
    pub speech: Option<SpeechToml>,
    pub sound: Option<SoundToml>,
    pub tts: Option<TtsToml>,
    pub output: Option<OutputConfig>,
    pub display: Option<DisplayToml>,
}

impl ExperienceToml {
    fn overlay(self, mut base: ExperienceConfig) -> ExperienceConfig {
        if let Some(s) = self.speech {
            s.apply(&mut base.speech);
        }
        if let Some(s) = self.sound {
            s.apply(&mut base.sound);
        }
        if let Some(t) = self.tts {
            t.apply(&mut base.espeak);
        }
        if let Some(o) = self.output {
            if o.device_name.is_some() {
                base.output = o;
            }
        }
        if let Some(d) = self.display {
            d.apply(&mut base.display);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeechToml {
    pub language: Option<String>,
    pub regional_fallback: Option<String>,
    pub whisper_locale: Option<String>,
    pub low_voice_hints: Option<Vec<String>>,
    pub high_voice_hints: Option<Vec<String>>,
}
impl SpeechToml {
    fn apply(self, s: &mut SpeechConfig) {
        if let Some(x) = self.language {
            s.language = x;
        }
        if let Some(x) = self.regional_fallback {
            s.regional_fallback = x;
        }
        if let Some(x) = self.whisper_locale {
            s.whisper_locale = x;
        }
        if let Some(x) = self.low_voice_hints {
            s.low_voice_hints = x.into_iter().map(|h| h.to_lowercase()).collect();
        }
        if let Some(x) = self.high_voice_hints {
            s.high_voice_hints = x.into_iter().map(|h| h.to_lowercase()).collect();
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SoundToml {
    pub lead_ms: Option<u64>,
}
impl SoundToml {
    fn apply(self, s: &mut SoundConfig) {
        if let Some(x) = self.lead_ms {
            s.lead_time = x as f64 / 1000.0;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TtsToml {
    pub espeak_bin: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}
impl TtsToml {
    fn apply(self, t: &mut EspeakConfig) {
        if let Some(x) = self.espeak_bin {
            t.espeak_bin = Some(x);
        }
        if let Some(x) = self.timeout_ms {
            t.timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct DisplayToml {
    pub json_lines: Option<bool>,
    pub speech_enabled: Option<bool>,
    pub sound_enabled: Option<bool>,
}
impl DisplayToml {
    fn apply(self, d: &mut DisplayConfig) {
        if let Some(x) = self.json_lines {
            d.json_lines = x;
        }
        if let Some(x) = self.speech_enabled {
            d.speech_enabled = x;
        }
        if let Some(x) = self.sound_enabled {
            d.sound_enabled = x;
        }
    }
}
