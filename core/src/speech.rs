//! Speech driver.
//!
//! Submits one narration line at a time to a [`SpeechService`] and resolves
//! once the utterance ends or errors. When no service is available the line
//! is held for an estimated duration instead, so the player always advances.
//!
//! Voice selection is tone-specific:
//! - narrator: story language → regional fallback → lower/male-sounding name → first voice
//! - whisper: higher/female-sounding name → alternate regional locale → first voice
//!
//! Env overrides (see [`SpeechConfig`]):
//! - NOCTURNE_LANG, NOCTURNE_REGION_FALLBACK, NOCTURNE_WHISPER_LOCALE

use crate::event::{EventStream, PlayerEvent};
use crate::timing::fallback_speech_duration;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// A voice as reported by the speech service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    /// BCP-47-ish locale, e.g. `en-US` or `en_GB`.
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Narrator,
    Whisper,
}

impl Tone {
    /// Lines pitched above 1.0 are whispered.
    pub fn for_pitch(pitch: f32) -> Self {
        if pitch > 1.0 {
            Tone::Whisper
        } else {
            Tone::Narrator
        }
    }

    pub fn volume(self) -> f32 {
        match self {
            Tone::Whisper => 0.65,
            Tone::Narrator => 0.9,
        }
    }

    /// Whisper lifts pitch by 0.4, never past 2.0.
    pub fn effective_pitch(self, pitch: f32) -> f32 {
        match self {
            Tone::Whisper => (pitch + 0.4).min(2.0),
            Tone::Narrator => pitch,
        }
    }
}

/// A fully configured request to the speech service.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<Voice>,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceOutcome {
    Ended,
    /// Stopped by `cancel()`: a reset or newer speech took over.
    Cancelled,
    Failed(String),
}

/// Single-resolution completion handle for one utterance.
///
/// Resolves exactly once, to the outcome the service reported. If the
/// service drops its side without reporting, it resolves to `Failed`.
pub struct Completion {
    rx: oneshot::Receiver<UtteranceOutcome>,
}

impl Completion {
    /// A linked (reporter, handle) pair.
    pub fn channel() -> (oneshot::Sender<UtteranceOutcome>, Completion) {
        let (tx, rx) = oneshot::channel();
        (tx, Completion { rx })
    }

    /// A handle that is already resolved.
    pub fn ready(outcome: UtteranceOutcome) -> Completion {
        let (tx, handle) = Self::channel();
        let _ = tx.send(outcome);
        handle
    }
}

impl Future for Completion {
    type Output = UtteranceOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| UtteranceOutcome::Failed("utterance dropped".into()))
        })
    }
}

/// Text-to-speech engine as seen by the driver.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Voices known right now. May be empty until the service has finished
    /// enumerating them.
    fn voices(&self) -> Vec<Voice>;

    /// Generation counter bumped whenever the voice list changes. `None` if
    /// the list never changes.
    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        None
    }

    /// Submit an utterance. The returned handle resolves on end or error.
    async fn speak(&self, utterance: Utterance) -> Result<Completion>;

    /// Cancel every pending and active utterance. Their handles resolve to
    /// `Cancelled`.
    fn cancel(&self);

    fn is_speaking(&self) -> bool;
}

/// Voice-selection and locale preferences.
#[derive(Clone, Debug)]
pub struct SpeechConfig {
    /// Spoken language of the story; narrator voices whose locale starts with it win.
    pub language: String,
    /// Narrator fallback: any locale containing this tag.
    pub regional_fallback: String,
    /// Whisper fallback: locale matching this alternate regional tag.
    pub whisper_locale: String,
    /// Name fragments that suggest a lower-pitched voice.
    pub low_voice_hints: Vec<String>,
    /// Name fragments that suggest a higher-pitched voice.
    pub high_voice_hints: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let env_or = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let hints = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            language: env_or("NOCTURNE_LANG", "en-US"),
            regional_fallback: env_or("NOCTURNE_REGION_FALLBACK", "en"),
            whisper_locale: env_or("NOCTURNE_WHISPER_LOCALE", "en-GB"),
            low_voice_hints: hints(&[
                "male", "man", "david", "daniel", "alex", "fred", "george", "james", "mark",
                "guy", "bass", "deep",
            ]),
            high_voice_hints: hints(&[
                "female", "woman", "samantha", "victoria", "zira", "karen", "susan", "moira",
                "tessa", "fiona", "whisper",
            ]),
        }
    }
}

fn normalize_locale(lang: &str) -> String {
    lang.trim().to_lowercase().replace('_', "-")
}

fn suggests_high(name: &str, cfg: &SpeechConfig) -> bool {
    let name = name.to_lowercase();
    cfg.high_voice_hints.iter().any(|h| name.contains(h.as_str()))
}

fn suggests_low(name: &str, cfg: &SpeechConfig) -> bool {
    // "female" contains "male"; a high hint always wins
    if suggests_high(name, cfg) {
        return false;
    }
    let name = name.to_lowercase();
    cfg.low_voice_hints.iter().any(|h| name.contains(h.as_str()))
}

/// Pick a voice for `tone` from `voices`. `None` only when `voices` is empty.
pub fn select_voice(voices: &[Voice], tone: Tone, cfg: &SpeechConfig) -> Option<Voice> {
    let lang = normalize_locale(&cfg.language);
    let region = normalize_locale(&cfg.regional_fallback);
    let whisper_locale = normalize_locale(&cfg.whisper_locale);

    let chosen = match tone {
        Tone::Narrator => voices
            .iter()
            .find(|v| !lang.is_empty() && normalize_locale(&v.lang).starts_with(&lang))
            .or_else(|| {
                voices
                    .iter()
                    .find(|v| !region.is_empty() && normalize_locale(&v.lang).contains(&region))
            })
            .or_else(|| voices.iter().find(|v| suggests_low(&v.name, cfg))),
        Tone::Whisper => voices
            .iter()
            .find(|v| suggests_high(&v.name, cfg))
            .or_else(|| {
                voices.iter().find(|v| {
                    !whisper_locale.is_empty()
                        && normalize_locale(&v.lang).contains(&whisper_locale)
                })
            }),
    };
    chosen.or_else(|| voices.first()).cloned()
}

#[derive(Default)]
struct VoiceCache {
    loaded: bool,
    voices: Vec<Voice>,
    updates: Option<watch::Receiver<u64>>,
}

pub struct SpeechDriver {
    service: Option<Arc<dyn SpeechService>>,
    config: SpeechConfig,
    cache: Mutex<VoiceCache>,
    events: EventStream,
}

impl SpeechDriver {
    pub fn new(
        service: Option<Arc<dyn SpeechService>>,
        config: SpeechConfig,
        events: EventStream,
    ) -> Self {
        if service.is_none() {
            info!(
                target = "speech",
                "No speech service; narration falls back to timed display"
            );
        }
        Self {
            service,
            config,
            cache: Mutex::new(VoiceCache::default()),
            events,
        }
    }

    pub fn is_available(&self) -> bool {
        self.service.is_some()
    }

    /// Cached voice list, re-queried on first use and whenever the service
    /// reports a change.
    pub fn voices(&self) -> Vec<Voice> {
        let Some(service) = self.service.as_ref() else {
            return Vec::new();
        };
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if !cache.loaded {
            cache.updates = service.voice_updates();
        }
        let changed = cache
            .updates
            .as_ref()
            .map(|rx| rx.has_changed().unwrap_or(false))
            .unwrap_or(false);
        if !cache.loaded || changed {
            if let Some(rx) = cache.updates.as_mut() {
                rx.borrow_and_update();
            }
            cache.voices = service.voices();
            cache.loaded = true;
            debug!(target = "speech", count = cache.voices.len(), "Voice list refreshed");
        }
        cache.voices.clone()
    }

    /// Speak one line and wait for it to finish. Never fails: errors are
    /// logged, published as [`PlayerEvent::SpeechFailed`] and returned as
    /// `Failed` for callers that care. Cancellation is not an error.
    pub async fn speak(&self, text: &str, rate: f32, pitch: f32, tone: Tone) -> UtteranceOutcome {
        let Some(service) = self.service.as_ref() else {
            let hold = fallback_speech_duration(text, rate);
            debug!(target = "speech", hold_ms = hold.as_millis() as u64, "Timed fallback");
            tokio::time::sleep(hold).await;
            return UtteranceOutcome::Ended;
        };

        let voices = self.voices();
        let utterance = Utterance {
            text: text.to_string(),
            rate,
            pitch: tone.effective_pitch(pitch),
            volume: tone.volume(),
            voice: select_voice(&voices, tone, &self.config),
            lang: self.config.language.clone(),
        };
        debug!(
            target = "speech",
            tone = ?tone,
            voice = ?utterance.voice.as_ref().map(|v| v.name.as_str()),
            rate = utterance.rate,
            pitch = utterance.pitch,
            "Submitting utterance"
        );

        // One active utterance at a time: new speech pre-empts old
        if service.is_speaking() {
            service.cancel();
        }

        let outcome = match service.speak(utterance).await {
            Ok(completion) => completion.await,
            Err(e) => UtteranceOutcome::Failed(e.to_string()),
        };

        match &outcome {
            UtteranceOutcome::Failed(reason) => {
                warn!(target = "speech", reason = %reason, "Utterance failed; continuing");
                self.events.publish(PlayerEvent::SpeechFailed {
                    text: text.to_string(),
                    reason: reason.clone(),
                });
            }
            UtteranceOutcome::Cancelled => debug!(target = "speech", "Utterance cancelled"),
            UtteranceOutcome::Ended => {}
        }
        outcome
    }

    /// Cancel any in-flight utterance.
    pub fn cancel(&self) {
        if let Some(service) = self.service.as_ref() {
            service.cancel();
        }
    }
}
