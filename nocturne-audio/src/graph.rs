//! In-process audio graph.
//!
//! A small node graph (oscillators, buffer sources, biquad filters, gains)
//! rendered one mono sample at a time on a sample-counted clock. Parameter
//! automation follows set / linear ramp / exponential ramp semantics: a ramp
//! runs from the previous event's value and time to its own.
//!
//! The graph starts suspended. While suspended, `render` writes silence and
//! the clock does not move. Sources whose stop time has passed are pruned
//! after each render block, along with downstream nodes left without inputs.

use async_trait::async_trait;
use nocturne_core::sound::{AudioGraph, ContextState, FilterKind, NodeId, Param, Waveform};
use nocturne_core::{NocturneError, Result};
use std::f64::consts::PI;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ramp {
    Set,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct ParamEvent {
    ramp: Ramp,
    value: f32,
    time: f64,
}

/// Timeline of one automatable parameter.
#[derive(Debug, Clone)]
struct Automation {
    initial: f32,
    events: Vec<ParamEvent>,
}

impl Automation {
    fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    fn push(&mut self, ramp: Ramp, value: f32, time: f64) {
        // keep sorted; equal times keep insertion order
        let at = self.events.partition_point(|e| e.time <= time);
        self.events.insert(at, ParamEvent { ramp, value, time });
    }

    fn value_at(&self, t: f64) -> f32 {
        let (mut prev_t, mut prev_v) = (0.0, self.initial);
        for ev in &self.events {
            if ev.time <= t {
                prev_t = ev.time;
                prev_v = ev.value;
                continue;
            }
            let span = ev.time - prev_t;
            let frac = if span > 0.0 { (t - prev_t) / span } else { 1.0 };
            return match ev.ramp {
                Ramp::Set => prev_v,
                Ramp::Linear => prev_v + (ev.value - prev_v) * frac as f32,
                Ramp::Exponential if prev_v > 0.0 && ev.value > 0.0 => {
                    prev_v * (ev.value / prev_v).powf(frac as f32)
                }
                // undefined across zero or sign change; hold
                Ramp::Exponential => prev_v,
            };
        }
        prev_v
    }

    /// Drop events that can no longer affect values at or after `t`.
    fn compact(&mut self, t: f64) {
        let past = self.events.partition_point(|e| e.time <= t);
        if past > 1 {
            let last = self.events[past - 1];
            self.initial = last.value;
            self.events.drain(..past - 1);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
    tuned_hz: f32,
}

impl Biquad {
    fn tune(&mut self, kind: FilterKind, hz: f32, sample_rate: f64) {
        if hz == self.tuned_hz {
            return;
        }
        self.tuned_hz = hz;
        let f = (hz as f64).clamp(10.0, sample_rate * 0.49);
        let w0 = 2.0 * PI * f / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * BUTTERWORTH_Q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterKind::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[derive(Debug)]
enum NodeKind {
    Oscillator {
        waveform: Waveform,
        phase: f64,
        frequency: Automation,
    },
    Buffer {
        samples: Vec<f32>,
        position: usize,
    },
    Filter {
        kind: FilterKind,
        frequency: Automation,
        state: Biquad,
    },
    Gain {
        gain: Automation,
    },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    /// Whether anything was ever connected into this node.
    fed: bool,
    to_destination: bool,
    start: Option<f64>,
    stop: Option<f64>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            fed: false,
            to_destination: false,
            start: None,
            stop: None,
        }
    }

    fn is_source(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Oscillator { .. } | NodeKind::Buffer { .. }
        )
    }

    fn sounding(&self, t: f64) -> bool {
        self.start.is_some_and(|s| t >= s) && self.stop.map_or(true, |e| t < e)
    }

    fn finished(&self, t: f64) -> bool {
        self.stop.is_some_and(|e| t >= e)
    }

    fn automation_mut(&mut self, param: Param) -> Option<&mut Automation> {
        match (&mut self.kind, param) {
            (NodeKind::Oscillator { frequency, .. }, Param::Frequency)
            | (NodeKind::Filter { frequency, .. }, Param::Frequency) => Some(frequency),
            (NodeKind::Gain { gain }, Param::Gain) => Some(gain),
            _ => None,
        }
    }

    fn process(&mut self, input: f64, t: f64, sample_rate: f64) -> f64 {
        let sounding = self.sounding(t);
        match &mut self.kind {
            NodeKind::Oscillator {
                waveform,
                phase,
                frequency,
            } => {
                if !sounding {
                    return 0.0;
                }
                let p = *phase;
                let out = match waveform {
                    Waveform::Sine => (2.0 * PI * p).sin(),
                    Waveform::Square => {
                        if p < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Waveform::Sawtooth => 2.0 * p - 1.0,
                    Waveform::Triangle => 4.0 * (p - 0.5).abs() - 1.0,
                };
                *phase = (p + frequency.value_at(t) as f64 / sample_rate).fract();
                out
            }
            NodeKind::Buffer { samples, position } => {
                if !sounding {
                    return 0.0;
                }
                let out = samples.get(*position).copied().unwrap_or(0.0) as f64;
                *position += 1;
                out
            }
            NodeKind::Filter {
                kind,
                frequency,
                state,
            } => {
                state.tune(*kind, frequency.value_at(t), sample_rate);
                state.process(input)
            }
            NodeKind::Gain { gain } => input * gain.value_at(t) as f64,
        }
    }
}

struct GraphCore {
    sample_rate: u32,
    frame: u64,
    state: ContextState,
    nodes: Vec<Option<Node>>,
    cache: Vec<Option<f64>>,
}

impl GraphCore {
    fn now(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    fn add(&mut self, kind: NodeKind) -> Result<NodeId> {
        if self.state == ContextState::Closed {
            return Err(NocturneError::AudioGraph("context is closed".into()));
        }
        self.nodes.push(Some(Node::new(kind)));
        Ok(self.nodes.len() - 1)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| NocturneError::AudioGraph(format!("unknown node {}", id)))
    }

    fn automate(&mut self, id: NodeId, param: Param, ramp: Ramp, value: f32, at: f64) -> Result<()> {
        let node = self.node_mut(id)?;
        let automation = node.automation_mut(param).ok_or_else(|| {
            NocturneError::AudioGraph(format!("node {} has no {:?} parameter", id, param))
        })?;
        automation.push(ramp, value, at);
        Ok(())
    }

    fn eval(&mut self, id: NodeId, t: f64) -> f64 {
        if let Some(v) = self.cache[id] {
            return v;
        }
        // cycle guard
        self.cache[id] = Some(0.0);
        let sample_rate = self.sample_rate as f64;
        let n_inputs = self.nodes[id].as_ref().map_or(0, |n| n.inputs.len());
        let mut sum = 0.0;
        for k in 0..n_inputs {
            let input = match self.nodes[id].as_ref() {
                Some(n) => n.inputs[k],
                None => continue,
            };
            if input < self.nodes.len() {
                sum += self.eval(input, t);
            }
        }
        let v = self.nodes[id]
            .as_mut()
            .map_or(0.0, |n| n.process(sum, t, sample_rate));
        self.cache[id] = Some(v);
        v
    }

    fn render(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }
        let outputs: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.as_ref().filter(|n| n.to_destination).map(|_| id))
            .collect();
        self.cache.resize(self.nodes.len(), None);

        for sample in out.iter_mut() {
            let t = self.now();
            self.cache.iter_mut().for_each(|c| *c = None);
            let mix: f64 = outputs.iter().map(|&id| self.eval(id, t)).sum();
            *sample = mix.clamp(-1.0, 1.0) as f32;
            self.frame += 1;
        }
        self.prune();
    }

    fn prune(&mut self) {
        let t = self.now();
        let mut removed = 0usize;
        for slot in self.nodes.iter_mut() {
            if slot.as_ref().is_some_and(|n| n.is_source() && n.finished(t)) {
                *slot = None;
                removed += 1;
            }
        }
        // drain chains left without inputs, downstream first
        loop {
            let alive: Vec<bool> = self.nodes.iter().map(Option::is_some).collect();
            let mut changed = false;
            for slot in self.nodes.iter_mut() {
                let Some(node) = slot.as_mut() else { continue };
                node.inputs.retain(|&i| alive.get(i).copied().unwrap_or(false));
                if !node.is_source() && node.fed && node.inputs.is_empty() {
                    *slot = None;
                    removed += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for node in self.nodes.iter_mut().flatten() {
            match &mut node.kind {
                NodeKind::Oscillator { frequency, .. } | NodeKind::Filter { frequency, .. } => {
                    frequency.compact(t)
                }
                NodeKind::Gain { gain } => gain.compact(t),
                NodeKind::Buffer { .. } => {}
            }
        }
        while matches!(self.nodes.last(), Some(None)) {
            self.nodes.pop();
        }
        if removed > 0 {
            trace!(target = "audio", removed, live = self.live_nodes(), "Pruned finished nodes");
        }
    }

    fn live_nodes(&self) -> usize {
        self.nodes.iter().flatten().count()
    }
}

fn lock(core: &Mutex<GraphCore>) -> MutexGuard<'_, GraphCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pull side of a [`SoftwareGraph`], for whatever drives the clock (a device
/// callback or an offline loop).
#[derive(Clone)]
pub struct GraphRenderer {
    core: Arc<Mutex<GraphCore>>,
}

impl GraphRenderer {
    /// Fill `out` with the next mono samples.
    pub fn render(&self, out: &mut [f32]) {
        lock(&self.core).render(out);
    }
}

pub struct SoftwareGraph {
    core: Arc<Mutex<GraphCore>>,
    stop_signal: Option<Sender<()>>,
}

impl SoftwareGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            core: Arc::new(Mutex::new(GraphCore {
                sample_rate: sample_rate.max(1),
                frame: 0,
                state: ContextState::Suspended,
                nodes: Vec::new(),
                cache: Vec::new(),
            })),
            stop_signal: None,
        }
    }

    /// Signal sent once when the graph is closed, e.g. to stop an output
    /// thread.
    pub fn with_stop_signal(mut self, tx: Sender<()>) -> Self {
        self.stop_signal = Some(tx);
        self
    }

    pub fn renderer(&self) -> GraphRenderer {
        GraphRenderer {
            core: Arc::clone(&self.core),
        }
    }

    pub fn render(&self, out: &mut [f32]) {
        lock(&self.core).render(out);
    }

    /// Nodes not yet pruned.
    pub fn live_nodes(&self) -> usize {
        lock(&self.core).live_nodes()
    }
}

#[async_trait]
impl AudioGraph for SoftwareGraph {
    fn state(&self) -> ContextState {
        lock(&self.core).state
    }

    async fn resume(&mut self) -> Result<()> {
        let mut core = lock(&self.core);
        match core.state {
            ContextState::Closed => Err(NocturneError::AudioGraph("context is closed".into())),
            _ => {
                core.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        lock(&self.core).now()
    }

    fn sample_rate(&self) -> u32 {
        lock(&self.core).sample_rate
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId> {
        lock(&self.core).add(NodeKind::Oscillator {
            waveform,
            phase: 0.0,
            frequency: Automation::new(frequency),
        })
    }

    fn create_noise_buffer(&mut self, samples: Vec<f32>) -> Result<NodeId> {
        lock(&self.core).add(NodeKind::Buffer {
            samples,
            position: 0,
        })
    }

    fn create_filter(&mut self, kind: FilterKind, frequency: f32) -> Result<NodeId> {
        lock(&self.core).add(NodeKind::Filter {
            kind,
            frequency: Automation::new(frequency),
            state: Biquad::default(),
        })
    }

    fn create_gain(&mut self, gain: f32) -> Result<NodeId> {
        lock(&self.core).add(NodeKind::Gain {
            gain: Automation::new(gain),
        })
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let mut core = lock(&self.core);
        core.node_mut(from)?;
        let node = core.node_mut(to)?;
        if node.is_source() {
            return Err(NocturneError::AudioGraph(format!(
                "node {} is a source and takes no input",
                to
            )));
        }
        node.inputs.push(from);
        node.fed = true;
        Ok(())
    }

    fn connect_to_destination(&mut self, from: NodeId) -> Result<()> {
        lock(&self.core).node_mut(from)?.to_destination = true;
        Ok(())
    }

    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> Result<()> {
        lock(&self.core).automate(node, param, Ramp::Set, value, at)
    }

    fn linear_ramp_to(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> Result<()> {
        lock(&self.core).automate(node, param, Ramp::Linear, value, at)
    }

    fn exponential_ramp_to(
        &mut self,
        node: NodeId,
        param: Param,
        value: f32,
        at: f64,
    ) -> Result<()> {
        lock(&self.core).automate(node, param, Ramp::Exponential, value, at)
    }

    fn start_at(&mut self, node: NodeId, at: f64) -> Result<()> {
        let mut core = lock(&self.core);
        let source = core.node_mut(node)?;
        if !source.is_source() {
            return Err(NocturneError::AudioGraph(format!(
                "node {} is not a source",
                node
            )));
        }
        source.start = Some(at);
        Ok(())
    }

    fn stop_at(&mut self, node: NodeId, at: f64) -> Result<()> {
        let mut core = lock(&self.core);
        let source = core.node_mut(node)?;
        if !source.is_source() {
            return Err(NocturneError::AudioGraph(format!(
                "node {} is not a source",
                node
            )));
        }
        source.stop = Some(at);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        {
            let mut core = lock(&self.core);
            core.state = ContextState::Closed;
            core.nodes.clear();
        }
        if let Some(tx) = self.stop_signal.take() {
            let _ = tx.send(());
        }
        debug!(target = "audio", "Software graph closed");
        Ok(())
    }
}
