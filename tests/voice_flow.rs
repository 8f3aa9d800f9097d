//! End-to-end flows through the voice service with scripted engines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use medivoice::announcement::Section;
use medivoice::engine::scripted::{
    AsrCall, AsrProbe, ScriptedAsrEngine, ScriptedSpeechEngine, SpeechCall, SpeechProbe,
};
use medivoice::engine::{
    event_channel, EngineEvent, EventSender, RecognitionEvent, RecognitionEventKind, Segment,
    SynthesisEvent, SynthesisEventKind, UnavailableAsrEngine, UnavailableSpeechEngine,
};
use medivoice::error::{EngineKind, SynthesisErrorCode};
use medivoice::input::{RecognitionState, SpeechInputSession, StartOutcome};
use medivoice::output::{NarrationSettings, PlaybackState, SpeakOutcome, SpeechOutputController};
use medivoice::utterance::Ticket;
use medivoice::voice::VoiceDescriptor;
use medivoice::{SpeakOptions, VoiceError, VoiceHandle, VoiceNotice, VoiceService};

struct Harness {
    handle: VoiceHandle,
    speech: SpeechProbe,
    asr: AsrProbe,
    events: EventSender,
    task: JoinHandle<()>,
}

fn harness() -> Harness {
    let (events, events_rx) = event_channel();
    let (speech_engine, speech) = ScriptedSpeechEngine::new();
    speech.set_voices(vec![
        VoiceDescriptor::new("Zira", "en-US"),
        VoiceDescriptor::new("Lekha", "hi-IN"),
    ]);
    let (asr_engine, asr) = ScriptedAsrEngine::new();

    let (service, handle) = VoiceService::new(
        SpeechOutputController::new(Box::new(speech_engine), NarrationSettings::default()),
        SpeechInputSession::new(Box::new(asr_engine)),
        events_rx,
    );
    let task = tokio::spawn(service.run());

    Harness {
        handle,
        speech,
        asr,
        events,
        task,
    }
}

impl Harness {
    fn synthesis(&self, ticket: Ticket, kind: SynthesisEventKind) {
        self.events
            .send(EngineEvent::Synthesis(SynthesisEvent { ticket, kind }))
            .unwrap();
    }

    fn recognition(&self, ticket: Ticket, kind: RecognitionEventKind) {
        self.events
            .send(EngineEvent::Recognition(RecognitionEvent { ticket, kind }))
            .unwrap();
    }

    /// Round-trip a command so every event sent before it is applied.
    async fn settle(&self) {
        self.handle.voices().await.unwrap();
    }

    async fn speak(&self, id: &str, text: &str, options: SpeakOptions) -> Ticket {
        match self.handle.request_speak(id, text, "english", options).await {
            Ok(SpeakOutcome::Started { ticket, .. }) => ticket,
            other => panic!("expected Started, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_announcement_precedes_main_after_delay() {
    let h = harness();
    let options = SpeakOptions::default().with_section(Section::Dosage);
    let ticket = h.speak("dose", "Take one tablet daily", options).await;

    assert_eq!(h.speech.spoken().len(), 1);
    assert_eq!(h.speech.spoken()[0].segment, Segment::Announcement);

    tokio::time::sleep(Duration::from_millis(350)).await;
    h.settle().await;

    let spoken = h.speech.spoken();
    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken[1].segment, Segment::Main);
    assert_eq!(spoken[1].text, "Take one tablet daily");

    h.synthesis(ticket, SynthesisEventKind::End);
    h.settle().await;
    assert_eq!(h.handle.status().playback, PlaybackState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_main_never_fires() {
    let h = harness();
    let options = SpeakOptions::default().with_section(Section::SideEffects);
    h.speak("effects", "May cause drowsiness", options).await;
    h.speak("chat-2", "Please drink water", SpeakOptions::default()).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.settle().await;

    let texts: Vec<String> = h.speech.spoken().into_iter().map(|u| u.text).collect();
    assert_eq!(
        texts,
        vec![
            "Now reading side effects information".to_string(),
            "Please drink water".to_string(),
        ]
    );
    assert_eq!(h.speech.count(&SpeechCall::Cancel), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_end_after_preemption() {
    let h = harness();
    let first = h.speak("1", "First reply", SpeakOptions::default()).await;
    h.speak("2", "Second reply", SpeakOptions::default()).await;

    // The engine confirms the cancelled utterance late.
    h.synthesis(first, SynthesisEventKind::Error(SynthesisErrorCode::Interrupted));
    h.synthesis(first, SynthesisEventKind::End);
    h.settle().await;

    let status = h.handle.status();
    assert_eq!(status.playback, PlaybackState::Speaking);
    assert_eq!(status.active.map(|a| a.utterance_id), Some("2".into()));
    assert_eq!(status.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_error_is_reported() {
    let h = harness();
    let mut notices = h.handle.subscribe();
    let ticket = h.speak("1", "Reply", SpeakOptions::default()).await;

    h.synthesis(ticket, SynthesisEventKind::Error(SynthesisErrorCode::AudioBusy));
    h.settle().await;

    let status = h.handle.status();
    assert_eq!(status.playback, PlaybackState::Idle);
    assert_eq!(status.last_error.as_deref(), Some("speech synthesis error: audio-busy"));

    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    assert!(seen.contains(&VoiceNotice::Playback(PlaybackState::Speaking)));
    assert!(seen.contains(&VoiceNotice::Error(VoiceError::SynthesisError(
        SynthesisErrorCode::AudioBusy
    ))));
    assert_eq!(seen.last(), Some(&VoiceNotice::Playback(PlaybackState::Idle)));
}

#[tokio::test(start_paused = true)]
async fn test_listening_delivers_one_transcript() {
    let h = harness();
    let transcripts: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&transcripts);

    let outcome = h
        .handle
        .start_listening("hindi", move |text| sink.lock().unwrap().push(text), |_| {})
        .await
        .unwrap();
    let StartOutcome::Started(ticket) = outcome else {
        panic!("expected Started, got {outcome:?}");
    };

    let again = h
        .handle
        .start_listening("hindi", |_| panic!("ignored start must not deliver"), |_| {})
        .await
        .unwrap();
    assert_eq!(again, StartOutcome::AlreadyListening(ticket));
    assert_eq!(h.asr.starts(), 1);
    assert_eq!(h.handle.status().recognition.locale_code.as_deref(), Some("hi-IN"));

    h.recognition(ticket, RecognitionEventKind::Start);
    h.recognition(
        ticket,
        RecognitionEventKind::Result {
            transcript: "मुझे सिरदर्द है".into(),
            is_final: true,
        },
    );
    h.recognition(ticket, RecognitionEventKind::End);
    h.settle().await;

    assert_eq!(*transcripts.lock().unwrap(), vec!["मुझे सिरदर्द है".to_string()]);
    let status = h.handle.status();
    assert_eq!(status.recognition.state, RecognitionState::Idle);
    assert_eq!(status.last_transcript.as_deref(), Some("मुझे सिरदर्द है"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_what_was_said() {
    let h = harness();
    let transcripts: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&transcripts);

    h.handle
        .start_listening("english", move |text| sink.lock().unwrap().push(text), |_| {})
        .await
        .unwrap();
    let ticket = h.asr.last_ticket().unwrap();

    assert!(h.handle.stop_listening().await.unwrap());
    assert_eq!(h.asr.count(&AsrCall::Stop), 1);
    assert_eq!(h.handle.status().recognition.state, RecognitionState::Listening);

    h.recognition(
        ticket,
        RecognitionEventKind::Result {
            transcript: "I have a headache".into(),
            is_final: true,
        },
    );
    h.recognition(ticket, RecognitionEventKind::End);
    h.settle().await;

    assert_eq!(*transcripts.lock().unwrap(), vec!["I have a headache".to_string()]);
    let status = h.handle.status();
    assert_eq!(status.recognition.state, RecognitionState::Idle);
    assert_eq!(status.last_transcript.as_deref(), Some("I have a headache"));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_engines_degrade() {
    let (_events, events_rx) = event_channel();
    let (service, handle) = VoiceService::new(
        SpeechOutputController::new(
            Box::new(UnavailableSpeechEngine),
            NarrationSettings::default(),
        ),
        SpeechInputSession::new(Box::new(UnavailableAsrEngine)),
        events_rx,
    );
    tokio::spawn(service.run());

    let err = handle
        .request_speak("1", "Reply", "english", SpeakOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, VoiceError::EngineUnavailable(EngineKind::Synthesis));

    let err = handle
        .start_listening("english", |_| {}, |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, VoiceError::EngineUnavailable(EngineKind::Recognition));

    assert!(!handle.cancel_all_speech().await.unwrap());
    assert!(!handle.stop_listening().await.unwrap());

    let status = handle.status();
    assert!(!status.speech_available);
    assert!(!status.recognition_available);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_returns_to_idle() {
    let (events, events_rx) = event_channel();
    let (service, handle) = VoiceService::new(
        SpeechOutputController::new(
            Box::new(ScriptedSpeechEngine::dry_run(events.clone())),
            NarrationSettings::default(),
        ),
        SpeechInputSession::new(Box::new(UnavailableAsrEngine)),
        events_rx,
    );
    tokio::spawn(service.run());

    let mut status = handle.watch_status();
    let outcome = handle
        .request_speak("med", "Take one tablet daily", "hindi", SpeakOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, SpeakOutcome::Started { pre_roll: None, .. }));

    status
        .wait_for(|s| s.playback == PlaybackState::Idle)
        .await
        .unwrap();
    assert_eq!(handle.status().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_narration() {
    let h = harness();
    h.speak("1", "Reply", SpeakOptions::default()).await;

    h.handle.shutdown().await;
    h.task.await.unwrap();

    assert_eq!(h.speech.count(&SpeechCall::Cancel), 1);
    let err = h
        .handle
        .request_speak("2", "Reply", "english", SpeakOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, VoiceError::ServiceStopped);
}
