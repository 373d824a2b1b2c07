//! espeak-ng speech service
//!
//! Implements [`SpeechService`] on top of the local `espeak-ng` (or legacy
//! `espeak`) binary, speaking straight to the default audio device:
//! - one child process per utterance, text fed on stdin
//! - at most one active utterance; `cancel` kills it
//! - voice list read once, asynchronously, from `--voices`
//!
//! Env overrides:
//! - ESPEAK_BIN
//! - TTS_TIMEOUT_MS

use async_trait::async_trait;
use nocturne_core::speech::{Completion, SpeechService, Utterance, UtteranceOutcome, Voice};
use nocturne_core::{NocturneError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct EspeakConfig {
    pub espeak_bin: Option<PathBuf>,
    /// Upper bound for a single utterance before it is killed.
    pub timeout_ms: u64,
}

impl Default for EspeakConfig {
    fn default() -> Self {
        let timeout_ms = std::env::var("TTS_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30_000);
        let espeak_bin =
            get_from_env_or_path("ESPEAK_BIN", "espeak-ng").or_else(|| get_from_path("espeak"));
        Self {
            espeak_bin,
            timeout_ms,
        }
    }
}

fn get_from_env_or_path(env_key: &str, default_bin: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    get_from_path(default_bin)
}

fn get_from_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.exists())
}

/// Parse `espeak-ng --voices` output.
///
/// Columns: `Pty Language Age/Gender VoiceName File [Other Languages]`. The
/// gender is folded into the name ("English_(America) male") so name-based
/// voice hints can tell voices apart.
pub fn parse_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            let gender = match cols[2].rsplit('/').next() {
                Some("M") => " male",
                Some("F") => " female",
                _ => "",
            };
            Some(Voice::new(format!("{}{}", cols[3], gender), cols[1]))
        })
        .collect()
}

/// Command-line arguments for one utterance (text goes on stdin).
pub fn speech_args(utterance: &Utterance) -> Vec<String> {
    let wpm = (175.0 * utterance.rate).round().clamp(80.0, 450.0) as i32;
    let pitch = (50.0 * utterance.pitch).round().clamp(0.0, 99.0) as i32;
    let amp = (100.0 * utterance.volume).round().clamp(0.0, 200.0) as i32;
    let voice = utterance
        .voice
        .as_ref()
        .map(voice_spec)
        .unwrap_or_else(|| utterance.lang.to_lowercase());

    let mut args = vec![
        "-s".to_string(),
        wpm.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amp.to_string(),
    ];
    if !voice.is_empty() {
        args.push("-v".to_string());
        args.push(voice);
    }
    args.push("--stdin".to_string());
    args
}

/// `-v` value for a listed voice: the language code, plus a male or female
/// variant when the listing gave a gender.
fn voice_spec(voice: &Voice) -> String {
    if voice.name.ends_with(" female") {
        format!("{}+f3", voice.lang)
    } else if voice.name.ends_with(" male") {
        format!("{}+m3", voice.lang)
    } else {
        voice.lang.clone()
    }
}

struct Active {
    id: u64,
    cancel: oneshot::Sender<()>,
}

pub struct EspeakSpeechService {
    bin: PathBuf,
    cfg: EspeakConfig,
    voices: Arc<Mutex<Vec<Voice>>>,
    voices_tx: Arc<watch::Sender<u64>>,
    active: Arc<Mutex<Option<Active>>>,
    next_id: AtomicU64,
}

impl EspeakSpeechService {
    /// Fails with [`NocturneError::Speech`] when no espeak binary was found.
    /// Must be called inside a tokio runtime; voice enumeration starts in the
    /// background.
    pub fn new(cfg: EspeakConfig) -> Result<Self> {
        let bin = cfg
            .espeak_bin
            .clone()
            .ok_or_else(|| NocturneError::Speech("espeak-ng not found".into()))?;
        info!(target = "tts", bin = ?bin, "Detected espeak-ng binary");

        let (tx, _rx) = watch::channel(0u64);
        let service = Self {
            bin,
            cfg,
            voices: Arc::new(Mutex::new(Vec::new())),
            voices_tx: Arc::new(tx),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        };
        service.spawn_voice_listing();
        Ok(service)
    }

    fn spawn_voice_listing(&self) {
        let bin = self.bin.clone();
        let voices = Arc::clone(&self.voices);
        let tx = Arc::clone(&self.voices_tx);
        tokio::spawn(async move {
            let output = match Command::new(&bin).arg("--voices").output().await {
                Ok(output) if output.status.success() => output,
                Ok(output) => {
                    warn!(target = "tts", status = %output.status, "Voice listing failed");
                    return;
                }
                Err(e) => {
                    warn!(target = "tts", error = %e, "Voice listing failed");
                    return;
                }
            };
            let listed = parse_voices(&String::from_utf8_lossy(&output.stdout));
            debug!(target = "tts", count = listed.len(), "Voices listed");
            *voices.lock().unwrap_or_else(PoisonError::into_inner) = listed;
            tx.send_modify(|generation| *generation += 1);
        });
    }

    fn take_active(&self) -> Option<Active> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl SpeechService for EspeakSpeechService {
    fn voices(&self) -> Vec<Voice> {
        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        Some(self.voices_tx.subscribe())
    }

    async fn speak(&self, utterance: Utterance) -> Result<Completion> {
        if let Some(previous) = self.take_active() {
            let _ = previous.cancel.send(());
        }
        if utterance.text.trim().is_empty() {
            return Ok(Completion::ready(UtteranceOutcome::Ended));
        }

        let args = speech_args(&utterance);
        let mut cmd = Command::new(&self.bin);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        debug!(target = "tts", command = ?cmd, "Running espeak-ng");

        let mut child = cmd.spawn()?;
        let mut stdin = child.stdin.take();

        // registered before any await so cancel() always finds it
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(Active {
            id,
            cancel: cancel_tx,
        });
        info!(target = "tts", id, chars = utterance.text.len(), "tts.start");

        let (reporter, completion) = Completion::channel();
        let active = Arc::clone(&self.active);
        let limit = Duration::from_millis(self.cfg.timeout_ms);
        let text = utterance.text;
        tokio::spawn(async move {
            let spoken = async {
                if let Some(mut pipe) = stdin.take() {
                    pipe.write_all(text.as_bytes()).await?;
                    // closing stdin ends the input
                }
                child.wait().await
            };
            let mut exited = false;
            let outcome = tokio::select! {
                waited = timeout(limit, spoken) => match waited {
                    Ok(Ok(status)) if status.success() => {
                        exited = true;
                        UtteranceOutcome::Ended
                    }
                    Ok(Ok(status)) => {
                        exited = true;
                        UtteranceOutcome::Failed(format!("espeak-ng exited with {}", status))
                    }
                    Ok(Err(e)) => UtteranceOutcome::Failed(e.to_string()),
                    Err(_) => UtteranceOutcome::Failed("timed out".into()),
                },
                _ = cancel_rx => UtteranceOutcome::Cancelled,
            };
            if !exited {
                let _ = child.kill().await;
            }

            {
                let mut slot = active.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().is_some_and(|a| a.id == id) {
                    *slot = None;
                }
            }
            match &outcome {
                UtteranceOutcome::Ended => info!(target = "tts", id, "tts.done"),
                UtteranceOutcome::Cancelled => debug!(target = "tts", id, "tts.cancelled"),
                UtteranceOutcome::Failed(reason) => {
                    debug!(target = "tts", id, reason = %reason, "tts.error")
                }
            }
            let _ = reporter.send(outcome);
        });

        Ok(completion)
    }

    fn cancel(&self) {
        if let Some(active) = self.take_active() {
            debug!(target = "tts", id = active.id, "Cancelling utterance");
            let _ = active.cancel.send(());
        }
    }

    fn is_speaking(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
