// Concrete audio collaborators for the Nocturne player

pub mod graph;

pub use graph::{GraphRenderer, SoftwareGraph};

#[cfg(feature = "playback")]
pub mod output;

#[cfg(feature = "playback")]
pub use output::{CpalBackend, OutputConfig};

#[cfg(feature = "tts")]
pub mod tts;

#[cfg(feature = "tts")]
pub use tts::{EspeakConfig, EspeakSpeechService};
