//! Script data model: the fixed, ordered list of steps a run walks through.

use crate::{NocturneError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Visual scene tag the renderer paints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    #[default]
    Idle,
    Hallway,
    Knock,
    Flashlight,
    Empty,
    Photo,
    Glitch,
}

/// Procedural sound effects the synthesizer knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SoundKind {
    KnockSoft,
    KnockHard,
    Heartbeat,
    Glitch,
}

/// One entry of a script. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Speech {
        text: String,
        rate: f32,
        pitch: f32,
        delay_after: Option<u64>,
        visual: Option<VisualState>,
    },
    Pause {
        duration: u64,
        visual: Option<VisualState>,
    },
    Sound {
        kind: SoundKind,
        delay_after: Option<u64>,
        visual: Option<VisualState>,
    },
    Text {
        text: String,
        duration: u64,
        visual: Option<VisualState>,
    },
    Final {
        text: String,
        visual: Option<VisualState>,
    },
}

impl Step {
    pub fn speech(text: impl Into<String>, rate: f32, pitch: f32) -> Self {
        Step::Speech {
            text: text.into(),
            rate,
            pitch,
            delay_after: None,
            visual: None,
        }
    }

    pub fn pause(duration: u64) -> Self {
        Step::Pause {
            duration,
            visual: None,
        }
    }

    pub fn sound(kind: SoundKind) -> Self {
        Step::Sound {
            kind,
            delay_after: None,
            visual: None,
        }
    }

    pub fn text(text: impl Into<String>, duration: u64) -> Self {
        Step::Text {
            text: text.into(),
            duration,
            visual: None,
        }
    }

    pub fn final_line(text: impl Into<String>) -> Self {
        Step::Final {
            text: text.into(),
            visual: None,
        }
    }

    /// Attach a scene change to this step.
    pub fn with_visual(mut self, scene: VisualState) -> Self {
        match &mut self {
            Step::Speech { visual, .. }
            | Step::Pause { visual, .. }
            | Step::Sound { visual, .. }
            | Step::Text { visual, .. }
            | Step::Final { visual, .. } => *visual = Some(scene),
        }
        self
    }

    /// Attach a trailing wait. Only speech and sound steps carry one; other
    /// kinds are returned unchanged.
    pub fn with_delay_after(mut self, ms: u64) -> Self {
        match &mut self {
            Step::Speech { delay_after, .. } | Step::Sound { delay_after, .. } => {
                *delay_after = Some(ms)
            }
            _ => {}
        }
        self
    }

    pub fn visual(&self) -> Option<VisualState> {
        match self {
            Step::Speech { visual, .. }
            | Step::Pause { visual, .. }
            | Step::Sound { visual, .. }
            | Step::Text { visual, .. }
            | Step::Final { visual, .. } => *visual,
        }
    }

    pub fn delay_after(&self) -> Option<Duration> {
        match self {
            Step::Speech { delay_after, .. } | Step::Sound { delay_after, .. } => {
                delay_after.map(Duration::from_millis)
            }
            _ => None,
        }
    }

    /// Short tag used in logs and events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Speech { .. } => "speech",
            Step::Pause { .. } => "pause",
            Step::Sound { .. } => "sound",
            Step::Text { .. } => "text",
            Step::Final { .. } => "final",
        }
    }
}

/// An ordered, validated, read-only sequence of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    initial_visual: VisualState,
    steps: Vec<Step>,
}

impl Script {
    /// Build a script, rejecting non-positive or non-finite speech rates and
    /// non-finite pitches.
    pub fn new(initial_visual: VisualState, steps: Vec<Step>) -> Result<Self> {
        for (i, step) in steps.iter().enumerate() {
            if let Step::Speech { rate, pitch, .. } = step {
                if !rate.is_finite() || *rate <= 0.0 {
                    return Err(NocturneError::InvalidScript(format!(
                        "step {}: rate must be > 0, got {}",
                        i, rate
                    )));
                }
                if !pitch.is_finite() {
                    return Err(NocturneError::InvalidScript(format!(
                        "step {}: pitch must be finite",
                        i
                    )));
                }
            }
        }
        Ok(Self {
            initial_visual,
            steps,
        })
    }

    pub fn initial_visual(&self) -> VisualState {
        self.initial_visual
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The bundled story: a knock at the door at three in the morning.
    pub fn knock_story() -> Self {
        let steps = vec![
            Step::speech("It is three in the morning.", 0.85, 0.8)
                .with_delay_after(600)
                .with_visual(VisualState::Hallway),
            Step::speech("You live alone. You have always lived alone.", 0.85, 0.8)
                .with_delay_after(900),
            Step::pause(1200),
            Step::sound(SoundKind::KnockSoft)
                .with_delay_after(1400)
                .with_visual(VisualState::Knock),
            Step::speech("Someone is knocking.", 0.8, 0.8).with_delay_after(700),
            Step::sound(SoundKind::KnockHard).with_delay_after(1200),
            Step::speech("let me in", 0.7, 1.6).with_delay_after(900),
            Step::sound(SoundKind::Heartbeat).with_delay_after(500),
            Step::sound(SoundKind::Heartbeat).with_delay_after(900),
            Step::speech("You reach for the flashlight.", 0.85, 0.8)
                .with_delay_after(500)
                .with_visual(VisualState::Flashlight),
            Step::text("The door is open.", 2200),
            Step::speech("The hallway is empty.", 0.8, 0.8)
                .with_delay_after(1000)
                .with_visual(VisualState::Empty),
            Step::speech("On the floor, a photograph.", 0.8, 0.8).with_delay_after(800),
            Step::speech("It is a picture of you. Sleeping.", 0.75, 0.8)
                .with_delay_after(1500)
                .with_visual(VisualState::Photo),
            Step::sound(SoundKind::Glitch)
                .with_delay_after(400)
                .with_visual(VisualState::Glitch),
            Step::speech("taken tonight", 0.65, 1.8).with_delay_after(1200),
            Step::final_line("Don't turn around."),
        ];

        Self {
            initial_visual: VisualState::Hallway,
            steps,
        }
    }
}
