//! Engine ports: the host's speech synthesis and recognition capabilities.
//!
//! The controller never talks to a platform API directly. It drives a
//! [`SpeechEnginePort`] and an [`AsrEnginePort`]; adapters report back by
//! sending [`EngineEvent`]s on the channel they were built with. Every
//! event carries the [`Ticket`] of the operation it belongs to.
//!
//! Adapters:
//! - `espeak`: espeak-ng subprocess per utterance, sequential queue
//! - `whisper`: cpal capture + whisper.cpp transcription (feature `whisper`)
//! - `scripted`: records calls; used for dry runs and tests
//! - [`UnavailableSpeechEngine`] / [`UnavailableAsrEngine`]: hosts without the capability

pub mod espeak;
pub mod scripted;
#[cfg(feature = "whisper")]
pub mod whisper;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{Config, RecognitionConfig};
use crate::error::{RecognitionErrorCode, SynthesisErrorCode, VoiceResult};
use crate::utterance::{Ticket, Utterance};
use crate::voice::VoiceDescriptor;

/// Which part of a narration request an engine utterance carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Announcement,
    Main,
}

/// What a synthesis engine is asked to play.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineUtterance {
    pub ticket: Ticket,
    pub segment: Segment,
    pub text: String,
    pub locale_code: String,
    /// `None` lets the engine pick its default voice for `locale_code`.
    pub voice: Option<VoiceDescriptor>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl EngineUtterance {
    pub fn new(
        ticket: Ticket,
        segment: Segment,
        text: String,
        utterance: &Utterance,
        voice: Option<VoiceDescriptor>,
    ) -> Self {
        Self {
            ticket,
            segment,
            text,
            locale_code: utterance.locale_code.clone(),
            voice,
            rate: utterance.rate,
            pitch: utterance.pitch,
            volume: utterance.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEventKind {
    Start,
    End,
    Error(SynthesisErrorCode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisEvent {
    pub ticket: Ticket,
    pub kind: SynthesisEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEventKind {
    Start,
    Result { transcript: String, is_final: bool },
    Error(RecognitionErrorCode),
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    pub ticket: Ticket,
    pub kind: RecognitionEventKind,
}

/// Everything an adapter can report.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Synthesis(SynthesisEvent),
    /// The synthesis voice catalog changed; re-query it.
    VoicesChanged,
    Recognition(RecognitionEvent),
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit_synthesis(events: &EventSender, ticket: Ticket, kind: SynthesisEventKind) {
    let _ = events.send(EngineEvent::Synthesis(SynthesisEvent { ticket, kind }));
}

pub(crate) fn emit_recognition(events: &EventSender, ticket: Ticket, kind: RecognitionEventKind) {
    let _ = events.send(EngineEvent::Recognition(RecognitionEvent { ticket, kind }));
}

/// Text-to-speech capability of the host.
///
/// All calls return immediately; progress arrives later as
/// [`EngineEvent::Synthesis`].
pub trait SpeechEnginePort: Send {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Queue an utterance. Utterances play in submission order.
    fn speak(&mut self, utterance: EngineUtterance) -> VoiceResult<()>;

    /// Stop the playing utterance and drop everything queued.
    fn cancel(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Voices the engine currently knows about. May be empty until the
    /// engine finishes loading.
    fn voices(&mut self) -> Vec<VoiceDescriptor>;
}

/// Speech-to-text capability of the host.
pub trait AsrEnginePort: Send {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Begin a single-utterance capture tagged `ticket`.
    fn start(&mut self, ticket: Ticket, locale_code: &str) -> VoiceResult<()>;

    /// Stop capturing. The engine still reports a final result for the
    /// audio it already has, then End.
    fn stop(&mut self);

    /// Stop capturing and throw the audio away.
    fn abort(&mut self) {
        self.stop();
    }
}

/// Stand-in for hosts without speech output.
#[derive(Debug, Default)]
pub struct UnavailableSpeechEngine;

impl SpeechEnginePort for UnavailableSpeechEngine {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn speak(&mut self, _utterance: EngineUtterance) -> VoiceResult<()> {
        Ok(())
    }

    fn cancel(&mut self) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn voices(&mut self) -> Vec<VoiceDescriptor> {
        Vec::new()
    }
}

/// Stand-in for hosts without speech input.
#[derive(Debug, Default)]
pub struct UnavailableAsrEngine;

impl AsrEnginePort for UnavailableAsrEngine {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn start(&mut self, _ticket: Ticket, _locale_code: &str) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Build the synthesis adapter named by `speech.backend`.
pub fn speech_engine(config: &Config, events: EventSender) -> Box<dyn SpeechEnginePort> {
    if !config.speech.enabled {
        info!("Speech output disabled by configuration");
        return Box::new(UnavailableSpeechEngine);
    }

    match config.speech.backend.as_str() {
        "espeak" => Box::new(espeak::EspeakEngine::new(&config.espeak, events)),
        "dry-run" => Box::new(scripted::ScriptedSpeechEngine::dry_run(events)),
        "none" => Box::new(UnavailableSpeechEngine),
        other => {
            warn!("Unknown speech backend '{other}', voice output disabled");
            Box::new(UnavailableSpeechEngine)
        }
    }
}

/// Build the recognition adapter named by `recognition.backend`.
///
/// Loading a Whisper model blocks for a few seconds; call from
/// `spawn_blocking` when a runtime is busy.
pub fn recognition_engine(
    config: &RecognitionConfig,
    events: EventSender,
) -> Box<dyn AsrEnginePort> {
    if !config.enabled {
        info!("Speech input disabled by configuration");
        return Box::new(UnavailableAsrEngine);
    }

    match config.backend.as_str() {
        #[cfg(feature = "whisper")]
        "whisper" => match whisper::WhisperRecognizer::load(config, events) {
            Ok(engine) => Box::new(engine),
            Err(e) => {
                warn!("Failed to load Whisper recognizer: {e}");
                info!("Speech input disabled, continuing text-only");
                Box::new(UnavailableAsrEngine)
            }
        },
        #[cfg(not(feature = "whisper"))]
        "whisper" => {
            let _ = events;
            warn!("Built without the `whisper` feature, speech input disabled");
            Box::new(UnavailableAsrEngine)
        }
        "none" => Box::new(UnavailableAsrEngine),
        other => {
            warn!("Unknown recognition backend '{other}', speech input disabled");
            Box::new(UnavailableAsrEngine)
        }
    }
}
