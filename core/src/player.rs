//! Sequence player.
//!
//! Walks a [`Script`] strictly in order: each step's side effect (speech,
//! timer or sound scheduling) and its trailing delay complete before the next
//! step starts. Presentation state is updated in lockstep through the
//! [`StateHolder`].
//!
//! `reset()` turns any traversal in flight stale: it finishes the await it
//! is suspended in and then exits without touching state, speech or sound.

use crate::event::{EventStream, PlayerEvent};
use crate::script::{Script, Step, VisualState};
use crate::sound::SoundSynthesizer;
use crate::speech::{SpeechDriver, Tone};
use crate::state::{progress_for, PresentationState, RunStatus, StateHolder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How a call to [`SequencePlayer::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step played and the status reached `Done`.
    Completed,
    /// A traversal was already running; nothing happened.
    AlreadyRunning,
    /// `reset()` was called mid-run; the traversal stopped at `step_index`.
    Superseded { step_index: usize },
}

pub struct SequencePlayer {
    state: StateHolder,
    speech: SpeechDriver,
    sound: SoundSynthesizer,
    events: EventStream,
}

impl SequencePlayer {
    pub fn new(speech: SpeechDriver, sound: SoundSynthesizer, events: EventStream) -> Self {
        Self {
            state: StateHolder::new(),
            speech,
            sound,
            events,
        }
    }

    pub fn snapshot(&self) -> PresentationState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresentationState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    pub fn sound(&self) -> &SoundSynthesizer {
        &self.sound
    }

    /// Play `script` from the first step to the last.
    ///
    /// No-op if a traversal is already running. Never fails: speech and
    /// audio problems only reduce fidelity.
    pub async fn run(&self, script: Arc<Script>) -> RunOutcome {
        let Some(epoch) = self.state.try_begin(script.initial_visual(), script.len()) else {
            debug!(target = "player", "run() ignored; already running");
            return RunOutcome::AlreadyRunning;
        };

        info!(target = "player", epoch, steps = script.len(), "Run started");
        self.events.publish(PlayerEvent::RunStarted {
            total_steps: script.len(),
        });

        for (i, step) in script.steps().iter().enumerate() {
            let mut scene = None;
            let live = self.state.update(epoch, |s| {
                s.step_index = i + 1;
                if let Some(visual) = step.visual() {
                    s.visual = visual;
                    if visual == VisualState::Photo {
                        s.show_photo = true;
                    }
                    scene = Some((visual, s.show_photo));
                }
            });
            if !live {
                return self.superseded(epoch, i);
            }

            debug!(target = "player", index = i + 1, kind = step.kind_name(), "Step");
            self.events.publish(PlayerEvent::StepStarted {
                index: i + 1,
                kind: step.kind_name().to_string(),
                progress: progress_for(i + 1, script.len(), RunStatus::Running),
            });
            if let Some((visual, show_photo)) = scene {
                self.events.publish(PlayerEvent::SceneChanged { visual, show_photo });
            }

            if !self.dispatch(epoch, step).await {
                return self.superseded(epoch, i + 1);
            }
            if let Some(delay) = step.delay_after() {
                sleep(delay).await;
            }
        }

        if !self.state.finish(epoch) {
            return self.superseded(epoch, script.len());
        }
        info!(target = "player", epoch, "Run finished");
        self.events.publish(PlayerEvent::RunFinished);
        RunOutcome::Completed
    }

    /// Perform one step's side effect. Returns `false` if the traversal went
    /// stale before the step could start.
    async fn dispatch(&self, epoch: u64, step: &Step) -> bool {
        match step {
            Step::Speech {
                text, rate, pitch, ..
            } => {
                if !self.show_line(epoch, text) {
                    return false;
                }
                // end and error both advance
                let _ = self
                    .speech
                    .speak(text, *rate, *pitch, Tone::for_pitch(*pitch))
                    .await;
            }
            Step::Pause { duration, .. } => {
                sleep(Duration::from_millis(*duration)).await;
            }
            Step::Sound { kind, .. } => {
                if !self.state.is_current(epoch) {
                    return false;
                }
                self.sound.play(*kind).await;
            }
            Step::Text { text, duration, .. } => {
                if !self.show_line(epoch, text) {
                    return false;
                }
                sleep(Duration::from_millis(*duration)).await;
            }
            Step::Final { text, .. } => {
                if !self.show_line(epoch, text) {
                    return false;
                }
            }
        }
        true
    }

    fn show_line(&self, epoch: u64, text: &str) -> bool {
        self.state.update(epoch, |s| s.current_line = text.to_string())
    }

    fn superseded(&self, epoch: u64, step_index: usize) -> RunOutcome {
        debug!(target = "player", epoch, step_index, "Traversal superseded by reset");
        RunOutcome::Superseded { step_index }
    }

    /// Back to idle. Cancels speech immediately; timers and sounds already
    /// scheduled run out harmlessly.
    pub fn reset(&self) {
        // stale first, so a traversal woken by the cancel cannot advance
        self.state.reset();
        self.speech.cancel();
        info!(target = "player", "Reset");
        self.events.publish(PlayerEvent::Reset);
    }

    /// Reset and release the shared audio context.
    pub async fn teardown(&self) {
        self.reset();
        if let Err(e) = self.sound.close().await {
            warn!(target = "player", error = %e, "Audio context did not close cleanly");
        }
    }
}
