mod config;
use config::ExperienceConfig;
use nocturne_audio::{CpalBackend, EspeakSpeechService};
use nocturne_core::{
    AudioBackend, EventStream, PlayerEvent, PresentationState, RunOutcome, RunStatus, Script,
    SequencePlayer, SoundSynthesizer, SpeechDriver, SpeechService,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

fn describe(state: &PresentationState) -> String {
    let photo = if state.show_photo { " [photo]" } else { "" };
    format!(
        "{:>3}% {:?}{} | {}",
        state.progress, state.visual, photo, state.current_line
    )
}

fn start(player: &Arc<SequencePlayer>, script: &Arc<Script>) {
    let player = Arc::clone(player);
    let script = Arc::clone(script);
    tokio::spawn(async move {
        match player.run(script).await {
            RunOutcome::Completed => {
                info!(target = "night_story", "The story is over. Press Enter to replay.")
            }
            RunOutcome::AlreadyRunning => {}
            RunOutcome::Superseded { step_index } => {
                info!(target = "night_story", step_index, "Story interrupted")
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    nocturne_core::telemetry::init_tracing(
        "info,nocturne_core=info,nocturne_audio=info,night_story=info",
    );

    info!(
        target = "night_story",
        "Starting night_story: Enter to begin, 'r' to reset, 'q' to quit"
    );

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = ExperienceConfig::load();

    let speech: Option<Arc<dyn SpeechService>> = if cfg.display.speech_enabled {
        match EspeakSpeechService::new(cfg.espeak.clone()) {
            Ok(s) => Some(Arc::new(s) as Arc<dyn SpeechService>),
            Err(e) => {
                warn!(
                    target = "night_story",
                    error = %e,
                    "Speech disabled; lines will be shown for a fixed time"
                );
                None
            }
        }
    } else {
        None
    };
    let audio: Option<Arc<dyn AudioBackend>> = if cfg.display.sound_enabled {
        Some(Arc::new(CpalBackend::new(cfg.output.clone())) as Arc<dyn AudioBackend>)
    } else {
        None
    };

    let events = EventStream::default();
    let player = Arc::new(SequencePlayer::new(
        SpeechDriver::new(speech, cfg.speech.clone(), events.clone()),
        SoundSynthesizer::new(audio, cfg.sound.clone(), events.clone()),
        events,
    ));
    let script = Arc::new(Script::knock_story());

    // Render presentation state on every change
    let mut state_rx = player.subscribe();
    let json_lines = cfg.display.json_lines;
    let render_task = tokio::spawn(async move {
        let mut last_line = String::new();
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            if json_lines {
                match serde_json::to_string(&state) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(target = "night_story", error = %e, "Failed to encode state"),
                }
            } else if state.current_line != last_line || state.status == RunStatus::Done {
                println!("{}", describe(&state));
                last_line = state.current_line.clone();
            }
        }
    });

    // Surface degraded-mode signals
    let mut event_rx = player.events().subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match &event {
                PlayerEvent::SpeechFailed { .. } | PlayerEvent::AudioUnavailable { .. } => {
                    warn!(target = "night_story", event = ?event, "Degraded playback")
                }
                _ if json_lines => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{}", line);
                    }
                }
                _ => {}
            }
        }
    });

    // Enter starts or replays, 'r' resets, 'q' quits
    let input = {
        let player = Arc::clone(&player);
        let script = Arc::clone(&script);
        async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.trim() {
                    "q" | "quit" => break,
                    "r" | "reset" => player.reset(),
                    _ if player.snapshot().status == RunStatus::Running => {}
                    _ => start(&player, &script),
                }
            }
        }
    };

    // Ctrl+C handler to shutdown gracefully
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(target = "night_story", error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = shutdown => {
            info!(target = "night_story", "Shutting down...");
        }
        _ = input => {
            info!(target = "night_story", "Input closed; shutting down...");
        }
    }

    player.teardown().await;
    render_task.abort();
    event_task.abort();
    Ok(())
}
