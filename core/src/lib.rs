// Nocturne Core Library
// Scripted horror-story experience runtime

pub mod event;
pub mod player;
pub mod script;
pub mod sound;
pub mod speech;
pub mod state;
pub mod telemetry;
pub mod timing;

// Export core types
pub use event::{EventStream, PlayerEvent};
pub use player::{RunOutcome, SequencePlayer};
pub use script::{Script, SoundKind, Step, VisualState};
pub use sound::{
    AudioBackend, AudioContext, AudioGraph, ContextState, FilterKind, NodeId, Param,
    SoundConfig, SoundSynthesizer, Waveform,
};
pub use speech::{
    Completion, SpeechConfig, SpeechDriver, SpeechService, Tone, Utterance, UtteranceOutcome,
    Voice,
};
pub use state::{PresentationState, RunStatus, StateHolder};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NocturneError {
    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Audio unavailable: {0}")]
    AudioUnavailable(String),

    #[error("Audio graph error: {0}")]
    AudioGraph(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
pub type Result<T> = std::result::Result<T, NocturneError>;
