//! Device output for the software graph using cpal.
//!
//! Linux build note: you need ALSA development headers for `cpal`.
//! On Debian/Ubuntu:
//!   sudo apt-get update && sudo apt-get install -y libasound2-dev pkg-config
//!
//! Env overrides:
//! - NOCTURNE_OUTPUT_DEVICE (substring of the output device name)
use crate::graph::{GraphRenderer, SoftwareGraph};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use nocturne_core::sound::{AudioBackend, AudioGraph};
use nocturne_core::{NocturneError, Result};
use serde::Deserialize;
use std::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Optional output device name substring to match
    pub device_name: Option<String>,
}

impl OutputConfig {
    pub fn from_env() -> Self {
        Self {
            device_name: std::env::var("NOCTURNE_OUTPUT_DEVICE")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Creates a [`SoftwareGraph`] whose samples are played on an output device.
pub struct CpalBackend {
    config: OutputConfig,
}

impl CpalBackend {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }
}

fn unavailable(what: &str, e: impl std::fmt::Display) -> NocturneError {
    NocturneError::AudioUnavailable(format!("{}: {}", what, e))
}

fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Option<cpal::Device> {
    if let Some(needle) = needle {
        let needle = needle.to_lowercase();
        match host.output_devices() {
            Ok(mut devices) => {
                let found = devices.find(|dev| {
                    dev.name()
                        .map(|name| name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                });
                if found.is_some() {
                    return found;
                }
                warn!(target = "audio", device = %needle, "Output device not found; using default");
            }
            Err(e) => warn!(target = "audio", error = %e, "Failed to list output devices"),
        }
    }
    host.default_output_device()
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: GraphRenderer,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            mono.resize(frames, 0.0);
            renderer.render(&mut mono);
            // mono: copy each sample to every channel
            for (frame, s) in data.chunks_mut(channels).zip(mono.iter()) {
                let v = T::from_sample(*s);
                frame.iter_mut().for_each(|out| *out = v);
            }
        },
        |err| warn!(target = "audio", error = %err, "Output stream error"),
        None,
    )
}

/// Open the device and start streaming. Runs on the thread that will own the
/// (non-Send) stream.
fn open_output(config: &OutputConfig) -> Result<(SoftwareGraph, cpal::Stream)> {
    let host = cpal::default_host();
    let device = pick_device(&host, config.device_name.as_deref())
        .ok_or_else(|| NocturneError::AudioUnavailable("no output device".into()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());
    let supported = device
        .default_output_config()
        .map_err(|e| unavailable("no default output config", e))?;
    let stream_config: cpal::StreamConfig = supported.config();
    let graph = SoftwareGraph::new(stream_config.sample_rate.0);
    let renderer = graph.renderer();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, renderer),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, renderer),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, renderer),
        other => {
            return Err(NocturneError::AudioUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| unavailable("failed to build output stream", e))?;
    stream
        .play()
        .map_err(|e| unavailable("failed to start output stream", e))?;

    info!(
        target = "audio",
        device = %device_name,
        sample_rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        "Output stream started"
    );
    Ok((graph, stream))
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn create(&self) -> Result<Box<dyn AudioGraph>> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<SoftwareGraph>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let config = self.config.clone();

        // The thread owns the cpal stream; it lives until the graph is closed
        // or dropped.
        std::thread::Builder::new()
            .name("nocturne-output".into())
            .spawn(move || match open_output(&config) {
                Ok((graph, stream)) => {
                    if ready_tx.send(Ok(graph.with_stop_signal(stop_tx))).is_err() {
                        return;
                    }
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!(target = "audio", "Output stream stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let graph = ready_rx
            .await
            .map_err(|_| NocturneError::AudioUnavailable("output thread exited".into()))??;
        Ok(Box::new(graph))
    }
}
