use async_trait::async_trait;
use nocturne_audio::{GraphRenderer, SoftwareGraph};
use nocturne_core::sound::{AudioBackend, AudioGraph, SoundConfig, SoundSynthesizer};
use nocturne_core::{EventStream, Result, SoundKind};
use std::sync::{Arc, Mutex};

const RATE: u32 = 8_000;

/// Hands out software graphs and keeps the latest renderer so the test can
/// drive the clock offline.
#[derive(Default)]
struct OfflineBackend {
    renderer: Mutex<Option<GraphRenderer>>,
}

impl OfflineBackend {
    fn render_secs(&self, secs: f64) -> Vec<f32> {
        let renderer = self.renderer.lock().unwrap().clone().expect("graph created");
        let mut buf = vec![0.0f32; (secs * RATE as f64) as usize];
        renderer.render(&mut buf);
        buf
    }
}

#[async_trait]
impl AudioBackend for OfflineBackend {
    async fn create(&self) -> Result<Box<dyn AudioGraph>> {
        let graph = SoftwareGraph::new(RATE);
        *self.renderer.lock().unwrap() = Some(graph.renderer());
        Ok(Box::new(graph))
    }
}

fn energy(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s * s).sum()
}

#[tokio::test]
async fn hard_knock_renders_two_thumps() {
    let backend = Arc::new(OfflineBackend::default());
    let synth = SoundSynthesizer::new(
        Some(backend.clone() as Arc<dyn AudioBackend>),
        SoundConfig { lead_time: 0.05 },
        EventStream::default(),
    );

    synth.play(SoundKind::KnockHard).await;
    let out = backend.render_secs(1.0);
    let at = |secs: f64| (secs * RATE as f64) as usize;

    // nothing before the lead time
    assert_eq!(energy(&out[..at(0.05)]), 0.0);
    // first thump (0.05..0.37) and second (0.37..0.69)
    let first = energy(&out[at(0.05)..at(0.2)]);
    let second = energy(&out[at(0.37)..at(0.52)]);
    assert!(first > 1.0, "first thump energy {}", first);
    assert!(second > 1.0, "second thump energy {}", second);
    assert!(first > second);
    // silent once both have stopped
    assert_eq!(energy(&out[at(0.7)..]), 0.0);
}

#[tokio::test]
async fn glitch_renders_bounded_noise() {
    let backend = Arc::new(OfflineBackend::default());
    let synth = SoundSynthesizer::new(
        Some(backend.clone() as Arc<dyn AudioBackend>),
        SoundConfig { lead_time: 0.0 },
        EventStream::default(),
    );

    synth.play(SoundKind::Glitch).await;
    let out = backend.render_secs(0.8);

    assert!(out.iter().all(|s| s.abs() <= 1.0));
    assert!(energy(&out[400..4000]) > 1.0);
    assert_eq!(energy(&out[5000..]), 0.0);
}
