//! Sound synthesizer.
//!
//! Builds short procedural audio events (knock, heartbeat, glitch) against a
//! shared audio graph. The graph is created lazily through an injected
//! [`AudioBackend`] the first time a sound is played, resumed if suspended,
//! and reused until [`SoundSynthesizer::close`].
//!
//! Scheduling is fire-and-forget: `play` returns once every node is wired
//! and scheduled, not when the sound has finished.
//!
//! Env overrides:
//! - NOCTURNE_SOUND_LEAD_MS (default 50)

use crate::event::{EventStream, PlayerEvent};
use crate::script::SoundKind;
use crate::{NocturneError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    LowPass,
}

/// Automatable node parameters. `Frequency` applies to oscillators and
/// filters, `Gain` to gain nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Frequency,
    Gain,
}

/// Audio synthesis graph. Times are absolute seconds on the graph clock.
#[async_trait]
pub trait AudioGraph: Send + Sync {
    fn state(&self) -> ContextState;
    async fn resume(&mut self) -> Result<()>;
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> u32;

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId>;
    fn create_noise_buffer(&mut self, samples: Vec<f32>) -> Result<NodeId>;
    fn create_filter(&mut self, kind: FilterKind, frequency: f32) -> Result<NodeId>;
    fn create_gain(&mut self, gain: f32) -> Result<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;
    fn connect_to_destination(&mut self, from: NodeId) -> Result<()>;

    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> Result<()>;
    fn linear_ramp_to(&mut self, node: NodeId, param: Param, value: f32, at: f64)
        -> Result<()>;
    fn exponential_ramp_to(
        &mut self,
        node: NodeId,
        param: Param,
        value: f32,
        at: f64,
    ) -> Result<()>;

    fn start_at(&mut self, node: NodeId, at: f64) -> Result<()>;
    fn stop_at(&mut self, node: NodeId, at: f64) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates the shared audio graph on first use.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn create(&self) -> Result<Box<dyn AudioGraph>>;
}

/// Near-silence used as the floor of every envelope (exponential ramps
/// cannot reach zero).
pub const SILENT_GAIN: f32 = 0.0001;

pub const KNOCK_START_HZ: f32 = 85.0;
pub const KNOCK_END_HZ: f32 = 45.0;
pub const KNOCK_SWEEP_SECS: f64 = 0.14;
pub const KNOCK_ATTACK_SECS: f64 = 0.015;
pub const KNOCK_DECAY_SECS: f64 = 0.28;
pub const KNOCK_LENGTH_SECS: f64 = 0.32;

pub const GLITCH_SECS: f64 = 0.6;
pub const GLITCH_HIGHPASS_HZ: f32 = 1200.0;
pub const GLITCH_PEAK_GAIN: f32 = 0.6;
pub const GLITCH_ATTACK_SECS: f64 = 0.05;

/// One scheduled piece of a sound, relative to the sound's start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoundEvent {
    Knock { offset: f64, intensity: f32 },
    Noise { offset: f64, duration: f64 },
}

impl SoundKind {
    /// The events that make up this sound.
    pub fn plan(self) -> Vec<SoundEvent> {
        let knock = |offset, intensity| SoundEvent::Knock { offset, intensity };
        match self {
            SoundKind::KnockSoft => vec![knock(0.0, 0.45), knock(0.28, 0.35)],
            SoundKind::KnockHard => vec![knock(0.0, 0.9), knock(0.32, 0.85)],
            // double beat from the knock generator
            SoundKind::Heartbeat => vec![knock(0.0, 1.0), knock(0.25, 0.7)],
            SoundKind::Glitch => vec![SoundEvent::Noise {
                offset: 0.0,
                duration: GLITCH_SECS,
            }],
        }
    }
}

#[derive(Clone, Debug)]
pub struct SoundConfig {
    /// Seconds added to the graph clock before scheduling.
    pub lead_time: f64,
}

impl Default for SoundConfig {
    fn default() -> Self {
        let lead_ms = std::env::var("NOCTURNE_SOUND_LEAD_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(50);
        Self {
            lead_time: lead_ms as f64 / 1000.0,
        }
    }
}

/// Process-wide slot for the lazily created audio graph.
pub struct AudioContext {
    backend: Option<Arc<dyn AudioBackend>>,
    graph: Mutex<Option<Box<dyn AudioGraph>>>,
}

impl AudioContext {
    pub fn new(backend: Option<Arc<dyn AudioBackend>>) -> Self {
        Self {
            backend,
            graph: Mutex::new(None),
        }
    }

    /// Whether a graph currently exists.
    pub async fn is_open(&self) -> bool {
        self.graph.lock().await.is_some()
    }

    /// Run `f` against a running graph, creating and resuming it first if
    /// needed.
    async fn with_running<T>(
        &self,
        f: impl FnOnce(&mut dyn AudioGraph) -> Result<T>,
    ) -> Result<T> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| NocturneError::AudioUnavailable("no audio backend".into()))?;

        let mut slot = self.graph.lock().await;
        if slot
            .as_ref()
            .map(|g| g.state() == ContextState::Closed)
            .unwrap_or(false)
        {
            *slot = None;
        }
        if slot.is_none() {
            let graph = backend.create().await?;
            info!(
                target = "audio",
                sample_rate = graph.sample_rate(),
                "Audio context created"
            );
            *slot = Some(graph);
        }
        let graph = slot
            .as_mut()
            .ok_or_else(|| NocturneError::AudioUnavailable("audio context missing".into()))?;
        if graph.state() == ContextState::Suspended {
            debug!(target = "audio", "Resuming suspended audio context");
            graph.resume().await?;
        }
        f(&mut **graph)
    }

    pub async fn close(&self) -> Result<()> {
        let mut slot = self.graph.lock().await;
        if let Some(mut graph) = slot.take() {
            graph.close().await?;
            info!(target = "audio", "Audio context closed");
        }
        Ok(())
    }
}

pub struct SoundSynthesizer {
    context: AudioContext,
    config: SoundConfig,
    events: EventStream,
}

impl SoundSynthesizer {
    pub fn new(
        backend: Option<Arc<dyn AudioBackend>>,
        config: SoundConfig,
        events: EventStream,
    ) -> Self {
        Self {
            context: AudioContext::new(backend),
            config,
            events,
        }
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    /// Schedule `kind` on the shared graph. Best-effort: if audio is
    /// unavailable this logs, publishes [`PlayerEvent::AudioUnavailable`]
    /// and returns.
    pub async fn play(&self, kind: SoundKind) {
        let lead = self.config.lead_time;
        let res = self
            .context
            .with_running(|graph| {
                let t0 = graph.current_time() + lead;
                for event in kind.plan() {
                    match event {
                        SoundEvent::Knock { offset, intensity } => {
                            schedule_knock(graph, t0 + offset, intensity)?
                        }
                        SoundEvent::Noise { offset, duration } => {
                            schedule_noise(graph, t0 + offset, duration)?
                        }
                    }
                }
                Ok(t0)
            })
            .await;

        match res {
            Ok(t0) => debug!(target = "sound", kind = ?kind, at = t0, "Scheduled"),
            Err(e) => {
                warn!(target = "sound", kind = ?kind, error = %e, "Sound skipped");
                self.events.publish(PlayerEvent::AudioUnavailable {
                    kind,
                    reason: e.to_string(),
                });
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.context.close().await
    }
}

/// Sine thump sweeping 85 → 45 Hz with a fast attack and ~0.28 s decay.
pub fn schedule_knock(graph: &mut dyn AudioGraph, at: f64, intensity: f32) -> Result<()> {
    let osc = graph.create_oscillator(Waveform::Sine, KNOCK_START_HZ)?;
    graph.set_value_at(osc, Param::Frequency, KNOCK_START_HZ, at)?;
    graph.exponential_ramp_to(osc, Param::Frequency, KNOCK_END_HZ, at + KNOCK_SWEEP_SECS)?;

    let gain = graph.create_gain(SILENT_GAIN)?;
    graph.set_value_at(gain, Param::Gain, SILENT_GAIN, at)?;
    graph.linear_ramp_to(gain, Param::Gain, intensity * 0.9, at + KNOCK_ATTACK_SECS)?;
    graph.exponential_ramp_to(gain, Param::Gain, SILENT_GAIN, at + KNOCK_DECAY_SECS)?;

    graph.connect(osc, gain)?;
    graph.connect_to_destination(gain)?;
    graph.start_at(osc, at)?;
    graph.stop_at(osc, at + KNOCK_LENGTH_SECS)?;
    Ok(())
}

/// High-passed white noise burst, enveloped to avoid clicks.
pub fn schedule_noise(graph: &mut dyn AudioGraph, at: f64, duration: f64) -> Result<()> {
    let len = (graph.sample_rate() as f64 * duration).ceil() as usize;
    let mut rng = rand::rng();
    let samples: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect();

    let src = graph.create_noise_buffer(samples)?;
    let filter = graph.create_filter(FilterKind::HighPass, GLITCH_HIGHPASS_HZ)?;
    let gain = graph.create_gain(SILENT_GAIN)?;
    graph.set_value_at(gain, Param::Gain, SILENT_GAIN, at)?;
    graph.linear_ramp_to(gain, Param::Gain, GLITCH_PEAK_GAIN, at + GLITCH_ATTACK_SECS)?;
    graph.exponential_ramp_to(gain, Param::Gain, SILENT_GAIN, at + duration)?;

    graph.connect(src, filter)?;
    graph.connect(filter, gain)?;
    graph.connect_to_destination(gain)?;
    graph.start_at(src, at)?;
    graph.stop_at(src, at + duration)?;
    Ok(())
}
