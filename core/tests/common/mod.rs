//! Test doubles for the speech service and the audio graph.

#![allow(dead_code)]

use async_trait::async_trait;
use nocturne_core::sound::{
    AudioBackend, AudioGraph, ContextState, FilterKind, NodeId, Param, Waveform,
};
use nocturne_core::speech::{Completion, SpeechService, Utterance, UtteranceOutcome, Voice};
use nocturne_core::{NocturneError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// How the fake speech service answers each utterance.
#[derive(Clone, Debug)]
pub enum SpeechBehavior {
    /// Report `Ended` after the given virtual time.
    EndAfter(Duration),
    /// Report `Failed` after the given virtual time.
    FailAfter(Duration),
    /// Refuse the submission outright.
    Reject,
}

/// Speech service double with deterministic (tokio virtual) timing.
pub struct FakeSpeech {
    behavior: SpeechBehavior,
    voices: Mutex<Vec<Voice>>,
    voices_tx: watch::Sender<u64>,
    pub spoken: Mutex<Vec<Utterance>>,
    active: Mutex<Option<oneshot::Sender<UtteranceOutcome>>>,
    speaking: Arc<AtomicBool>,
    pub cancels: AtomicUsize,
    pub voice_queries: AtomicUsize,
}

impl FakeSpeech {
    pub fn new(behavior: SpeechBehavior, voices: Vec<Voice>) -> Arc<Self> {
        let (voices_tx, _) = watch::channel(0);
        Arc::new(Self {
            behavior,
            voices: Mutex::new(voices),
            voices_tx,
            spoken: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            speaking: Arc::new(AtomicBool::new(false)),
            cancels: AtomicUsize::new(0),
            voice_queries: AtomicUsize::new(0),
        })
    }

    /// Replace the voice list and notify listeners, as a browser does when
    /// voices finish loading.
    pub fn publish_voices(&self, voices: Vec<Voice>) {
        *self.voices.lock().unwrap() = voices;
        self.voices_tx.send_modify(|g| *g += 1);
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechService for FakeSpeech {
    fn voices(&self) -> Vec<Voice> {
        self.voice_queries.fetch_add(1, Ordering::SeqCst);
        self.voices.lock().unwrap().clone()
    }

    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        Some(self.voices_tx.subscribe())
    }

    async fn speak(&self, utterance: Utterance) -> Result<Completion> {
        let (delay, outcome) = match &self.behavior {
            SpeechBehavior::Reject => {
                return Err(NocturneError::Speech("engine refused utterance".into()))
            }
            SpeechBehavior::EndAfter(d) => (*d, UtteranceOutcome::Ended),
            SpeechBehavior::FailAfter(d) => (*d, UtteranceOutcome::Failed("synthesis-failed".into())),
        };
        self.spoken.lock().unwrap().push(utterance);

        let (reporter, completion) = Completion::channel();
        let (done_tx, done_rx) = oneshot::channel::<UtteranceOutcome>();
        *self.active.lock().unwrap() = Some(done_tx);
        self.speaking.store(true, Ordering::SeqCst);

        let speaking = Arc::clone(&self.speaking);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = tokio::time::sleep(delay) => outcome,
                cancelled = done_rx => cancelled.unwrap_or(UtteranceOutcome::Cancelled),
            };
            speaking.store(false, Ordering::SeqCst);
            let _ = reporter.send(result);
        });
        Ok(completion)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.active.lock().unwrap().take() {
            let _ = tx.send(UtteranceOutcome::Cancelled);
        }
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// One call made against the recording graph.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphOp {
    Oscillator { id: NodeId, waveform: Waveform, frequency: f32 },
    NoiseBuffer { id: NodeId, len: usize },
    Filter { id: NodeId, kind: FilterKind, frequency: f32 },
    Gain { id: NodeId, gain: f32 },
    Connect { from: NodeId, to: NodeId },
    ConnectDestination { from: NodeId },
    SetValue { node: NodeId, param: Param, value: f32, at: f64 },
    LinearRamp { node: NodeId, param: Param, value: f32, at: f64 },
    ExponentialRamp { node: NodeId, param: Param, value: f32, at: f64 },
    Start { node: NodeId, at: f64 },
    Stop { node: NodeId, at: f64 },
}

#[derive(Default)]
pub struct GraphLog {
    pub ops: Vec<GraphOp>,
    pub created: usize,
    pub resumed: usize,
    pub closed: usize,
}

/// Audio graph double that records every call. Its clock is fixed.
pub struct RecordingGraph {
    log: Arc<Mutex<GraphLog>>,
    state: ContextState,
    now: f64,
    next_id: NodeId,
}

impl RecordingGraph {
    fn push(&mut self, op: GraphOp) {
        self.log.lock().unwrap().ops.push(op);
    }

    fn next(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }
}

#[async_trait]
impl AudioGraph for RecordingGraph {
    fn state(&self) -> ContextState {
        self.state
    }

    async fn resume(&mut self) -> Result<()> {
        self.log.lock().unwrap().resumed += 1;
        self.state = ContextState::Running;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.now
    }

    fn sample_rate(&self) -> u32 {
        8_000
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId> {
        let id = self.next();
        self.push(GraphOp::Oscillator { id, waveform, frequency });
        Ok(id)
    }

    fn create_noise_buffer(&mut self, samples: Vec<f32>) -> Result<NodeId> {
        let id = self.next();
        self.push(GraphOp::NoiseBuffer { id, len: samples.len() });
        Ok(id)
    }

    fn create_filter(&mut self, kind: FilterKind, frequency: f32) -> Result<NodeId> {
        let id = self.next();
        self.push(GraphOp::Filter { id, kind, frequency });
        Ok(id)
    }

    fn create_gain(&mut self, gain: f32) -> Result<NodeId> {
        let id = self.next();
        self.push(GraphOp::Gain { id, gain });
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.push(GraphOp::Connect { from, to });
        Ok(())
    }

    fn connect_to_destination(&mut self, from: NodeId) -> Result<()> {
        self.push(GraphOp::ConnectDestination { from });
        Ok(())
    }

    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> Result<()> {
        self.push(GraphOp::SetValue { node, param, value, at });
        Ok(())
    }

    fn linear_ramp_to(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> Result<()> {
        self.push(GraphOp::LinearRamp { node, param, value, at });
        Ok(())
    }

    fn exponential_ramp_to(
        &mut self,
        node: NodeId,
        param: Param,
        value: f32,
        at: f64,
    ) -> Result<()> {
        self.push(GraphOp::ExponentialRamp { node, param, value, at });
        Ok(())
    }

    fn start_at(&mut self, node: NodeId, at: f64) -> Result<()> {
        self.push(GraphOp::Start { node, at });
        Ok(())
    }

    fn stop_at(&mut self, node: NodeId, at: f64) -> Result<()> {
        self.push(GraphOp::Stop { node, at });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed += 1;
        self.state = ContextState::Closed;
        Ok(())
    }
}

/// Backend handing out [`RecordingGraph`]s that share one log. Graphs start
/// suspended at clock time `now`.
pub struct RecordingBackend {
    pub log: Arc<Mutex<GraphLog>>,
    now: f64,
    fail: bool,
}

impl RecordingBackend {
    pub fn new(now: f64) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(GraphLog::default())),
            now,
            fail: false,
        })
    }

    /// A backend whose context can never be created.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(GraphLog::default())),
            now: 0.0,
            fail: true,
        })
    }

    pub fn ops(&self) -> Vec<GraphOp> {
        self.log.lock().unwrap().ops.clone()
    }

    /// Start times of every oscillator, in scheduling order.
    pub fn oscillator_starts(&self) -> Vec<f64> {
        let ops = self.ops();
        let oscillators: Vec<NodeId> = ops
            .iter()
            .filter_map(|op| match op {
                GraphOp::Oscillator { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        ops.iter()
            .filter_map(|op| match op {
                GraphOp::Start { node, at } if oscillators.contains(node) => Some(*at),
                _ => None,
            })
            .collect()
    }

    /// Peak gain each linear attack ramps up to, in scheduling order.
    pub fn attack_peaks(&self) -> Vec<f32> {
        self.ops()
            .iter()
            .filter_map(|op| match op {
                GraphOp::LinearRamp { param: Param::Gain, value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AudioBackend for RecordingBackend {
    async fn create(&self) -> Result<Box<dyn AudioGraph>> {
        if self.fail {
            return Err(NocturneError::AudioUnavailable(
                "no audio output in this environment".into(),
            ));
        }
        self.log.lock().unwrap().created += 1;
        Ok(Box::new(RecordingGraph {
            log: Arc::clone(&self.log),
            state: ContextState::Suspended,
            now: self.now,
            next_id: 0,
        }))
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Player wired to the given doubles with fixed configs (no env lookups
/// that could leak into assertions).
pub fn player(
    speech: Option<Arc<FakeSpeech>>,
    audio: Option<Arc<RecordingBackend>>,
) -> nocturne_core::SequencePlayer {
    use nocturne_core::{
        EventStream, SequencePlayer, SoundConfig, SoundSynthesizer, SpeechConfig, SpeechDriver,
    };

    let events = EventStream::default();
    let speech_cfg = SpeechConfig {
        language: "en-US".into(),
        regional_fallback: "en".into(),
        whisper_locale: "en-GB".into(),
        ..SpeechConfig::default()
    };
    let speech = speech.map(|s| s as Arc<dyn SpeechService>);
    let audio = audio.map(|a| a as Arc<dyn AudioBackend>);
    SequencePlayer::new(
        SpeechDriver::new(speech, speech_cfg, events.clone()),
        SoundSynthesizer::new(audio, SoundConfig { lead_time: 0.05 }, events.clone()),
        events,
    )
}

/// Everything published so far, without waiting.
pub fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<nocturne_core::PlayerEvent>,
) -> Vec<nocturne_core::PlayerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
