mod common;

use common::{FakeSpeech, SpeechBehavior};
use nocturne_core::speech::{SpeechConfig, SpeechDriver, SpeechService, Tone, UtteranceOutcome, Voice};
use nocturne_core::{EventStream, PlayerEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn driver(fake: &Arc<FakeSpeech>) -> SpeechDriver {
    let service: Arc<dyn SpeechService> = fake.clone();
    SpeechDriver::new(
        Some(service),
        SpeechConfig {
            language: "en-US".into(),
            regional_fallback: "en".into(),
            whisper_locale: "en-GB".into(),
            ..SpeechConfig::default()
        },
        EventStream::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn voice_list_is_cached_until_the_service_reports_a_change() {
    let fake = FakeSpeech::new(SpeechBehavior::EndAfter(Duration::from_millis(10)), vec![]);
    let driver = driver(&fake);

    assert!(driver.voices().is_empty());
    assert!(driver.voices().is_empty());
    assert_eq!(fake.voice_queries.load(Ordering::SeqCst), 1);

    fake.publish_voices(vec![Voice::new("Daniel", "en-GB"), Voice::new("Alex", "en-US")]);
    let voices = driver.voices();
    assert_eq!(voices.len(), 2);
    assert_eq!(fake.voice_queries.load(Ordering::SeqCst), 2);

    // late-loaded voices are used by the next utterance
    driver.speak("hello", 1.0, 0.8, Tone::Narrator).await;
    assert_eq!(fake.spoken()[0].voice.as_ref().unwrap().name, "Alex");
}

#[tokio::test(start_paused = true)]
async fn utterance_carries_configured_locale_and_tone() {
    let fake = FakeSpeech::new(
        SpeechBehavior::EndAfter(Duration::from_millis(10)),
        vec![Voice::new("Fred", "en-US"), Voice::new("Moira", "en-IE")],
    );
    let driver = driver(&fake);

    let outcome = driver.speak("taken tonight", 0.65, 1.8, Tone::Whisper).await;
    assert_eq!(outcome, UtteranceOutcome::Ended);

    let u = &fake.spoken()[0];
    assert_eq!(u.text, "taken tonight");
    assert_eq!(u.lang, "en-US");
    assert_eq!(u.rate, 0.65);
    assert_eq!(u.pitch, 2.0);
    assert_eq!(u.volume, 0.65);
    assert_eq!(u.voice.as_ref().unwrap().name, "Moira");
}

#[tokio::test(start_paused = true)]
async fn empty_voice_list_lets_the_engine_choose() {
    let fake = FakeSpeech::new(SpeechBehavior::EndAfter(Duration::from_millis(10)), vec![]);
    let driver = driver(&fake);

    driver.speak("anyone", 1.0, 1.0, Tone::Narrator).await;
    assert_eq!(fake.spoken()[0].voice, None);
}

#[tokio::test(start_paused = true)]
async fn new_speech_preempts_the_active_utterance() {
    let fake = FakeSpeech::new(SpeechBehavior::EndAfter(Duration::from_secs(5)), vec![]);
    let driver = Arc::new(driver(&fake));

    let first = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.speak("first", 1.0, 1.0, Tone::Narrator).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fake.is_speaking());

    let second = driver.speak("second", 1.0, 1.0, Tone::Narrator);
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap(), UtteranceOutcome::Cancelled);
    assert_eq!(second, UtteranceOutcome::Ended);
    assert_eq!(fake.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_speech_is_not_reported_as_a_failure() {
    let fake = FakeSpeech::new(SpeechBehavior::EndAfter(Duration::from_secs(5)), vec![]);
    let events = EventStream::default();
    let mut rx = events.subscribe();
    let service: Arc<dyn SpeechService> = fake.clone();
    let driver = Arc::new(SpeechDriver::new(Some(service), SpeechConfig::default(), events));

    let line = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.speak("long line", 1.0, 1.0, Tone::Narrator).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    driver.cancel();

    assert_eq!(line.await.unwrap(), UtteranceOutcome::Cancelled);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failures_are_published_not_raised() {
    let fake = FakeSpeech::new(SpeechBehavior::FailAfter(Duration::from_millis(20)), vec![]);
    let events = EventStream::default();
    let mut rx = events.subscribe();
    let service: Arc<dyn SpeechService> = fake.clone();
    let driver = SpeechDriver::new(Some(service), SpeechConfig::default(), events);

    let outcome = driver.speak("glitch", 1.0, 1.0, Tone::Narrator).await;
    assert!(matches!(outcome, UtteranceOutcome::Failed(_)));
    match rx.try_recv().unwrap() {
        PlayerEvent::SpeechFailed { text, reason } => {
            assert_eq!(text, "glitch");
            assert_eq!(reason, "synthesis-failed");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn without_a_service_speak_waits_the_fallback_time() {
    let driver = SpeechDriver::new(None, SpeechConfig::default(), EventStream::default());
    assert!(!driver.is_available());
    assert!(driver.voices().is_empty());

    let started = tokio::time::Instant::now();
    let outcome = driver.speak("a b c d e f g", 1.0, 1.0, Tone::Narrator).await;
    assert_eq!(outcome, UtteranceOutcome::Ended);
    // 7 words * 380 ms
    assert!(started.elapsed() >= Duration::from_millis(2660));
    assert!(started.elapsed() < Duration::from_millis(2700));
}
