//! Scripted engines: record every port call and report nothing on their
//! own unless asked to.
//!
//! `ScriptedSpeechEngine::dry_run` logs narration and completes it
//! instantly, for running the daemon on machines without audio.

use std::sync::{Arc, Mutex};

use tracing::info;

use super::{
    emit_synthesis, AsrEnginePort, EngineUtterance, EventSender, SpeechEnginePort,
    SynthesisEventKind,
};
use crate::error::{VoiceError, VoiceResult};
use crate::utterance::Ticket;
use crate::voice::VoiceDescriptor;

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechCall {
    Speak(EngineUtterance),
    Cancel,
    Pause,
    Resume,
}

struct SpeechScript {
    calls: Vec<SpeechCall>,
    voices: Vec<VoiceDescriptor>,
    reject_next_speak: Option<String>,
    available: bool,
}

/// Test-side view of a [`ScriptedSpeechEngine`].
#[derive(Clone)]
pub struct SpeechProbe(Arc<Mutex<SpeechScript>>);

impl SpeechProbe {
    pub fn calls(&self) -> Vec<SpeechCall> {
        self.0.lock().unwrap().calls.clone()
    }

    /// Utterances handed to `speak`, in order.
    pub fn spoken(&self) -> Vec<EngineUtterance> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SpeechCall::Speak(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &SpeechCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn set_voices(&self, voices: Vec<VoiceDescriptor>) {
        self.0.lock().unwrap().voices = voices;
    }

    pub fn set_available(&self, available: bool) {
        self.0.lock().unwrap().available = available;
    }

    /// Make the next `speak` fail with `StartFailure(reason)`.
    pub fn reject_next_speak(&self, reason: &str) {
        self.0.lock().unwrap().reject_next_speak = Some(reason.to_string());
    }
}

pub struct ScriptedSpeechEngine {
    script: Arc<Mutex<SpeechScript>>,
    /// Set for dry runs: every utterance starts and ends immediately.
    auto_complete: Option<EventSender>,
}

impl ScriptedSpeechEngine {
    pub fn new() -> (Self, SpeechProbe) {
        let script = Arc::new(Mutex::new(SpeechScript {
            calls: Vec::new(),
            voices: Vec::new(),
            reject_next_speak: None,
            available: true,
        }));
        let engine = Self {
            script: Arc::clone(&script),
            auto_complete: None,
        };
        (engine, SpeechProbe(script))
    }

    pub fn dry_run(events: EventSender) -> Self {
        let (mut engine, probe) = Self::new();
        probe.set_voices(vec![VoiceDescriptor::new("dry-run", "en-US")]);
        engine.auto_complete = Some(events);
        engine
    }
}

impl SpeechEnginePort for ScriptedSpeechEngine {
    fn name(&self) -> &str {
        if self.auto_complete.is_some() {
            "dry-run"
        } else {
            "scripted"
        }
    }

    fn is_available(&self) -> bool {
        self.script.lock().unwrap().available
    }

    fn speak(&mut self, utterance: EngineUtterance) -> VoiceResult<()> {
        let mut script = self.script.lock().unwrap();
        if let Some(reason) = script.reject_next_speak.take() {
            return Err(VoiceError::StartFailure(reason));
        }
        if let Some(events) = &self.auto_complete {
            info!(
                "[dry-run] {:?} {}: \"{}\"",
                utterance.segment, utterance.locale_code, utterance.text
            );
            emit_synthesis(events, utterance.ticket, SynthesisEventKind::Start);
            emit_synthesis(events, utterance.ticket, SynthesisEventKind::End);
        }
        script.calls.push(SpeechCall::Speak(utterance));
        Ok(())
    }

    fn cancel(&mut self) {
        self.script.lock().unwrap().calls.push(SpeechCall::Cancel);
    }

    fn pause(&mut self) {
        self.script.lock().unwrap().calls.push(SpeechCall::Pause);
    }

    fn resume(&mut self) {
        self.script.lock().unwrap().calls.push(SpeechCall::Resume);
    }

    fn voices(&mut self) -> Vec<VoiceDescriptor> {
        self.script.lock().unwrap().voices.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsrCall {
    Start { ticket: Ticket, locale_code: String },
    Stop,
    Abort,
}

struct AsrScript {
    calls: Vec<AsrCall>,
    reject_next_start: Option<String>,
    available: bool,
}

/// Test-side view of a [`ScriptedAsrEngine`].
#[derive(Clone)]
pub struct AsrProbe(Arc<Mutex<AsrScript>>);

impl AsrProbe {
    pub fn calls(&self) -> Vec<AsrCall> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AsrCall::Start { .. }))
            .count()
    }

    /// Ticket of the most recent `start`.
    pub fn last_ticket(&self) -> Option<Ticket> {
        self.calls().iter().rev().find_map(|c| match c {
            AsrCall::Start { ticket, .. } => Some(*ticket),
            _ => None,
        })
    }

    pub fn count(&self, call: &AsrCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn set_available(&self, available: bool) {
        self.0.lock().unwrap().available = available;
    }

    pub fn reject_next_start(&self, reason: &str) {
        self.0.lock().unwrap().reject_next_start = Some(reason.to_string());
    }
}

pub struct ScriptedAsrEngine {
    script: Arc<Mutex<AsrScript>>,
}

impl ScriptedAsrEngine {
    pub fn new() -> (Self, AsrProbe) {
        let script = Arc::new(Mutex::new(AsrScript {
            calls: Vec::new(),
            reject_next_start: None,
            available: true,
        }));
        (
            Self {
                script: Arc::clone(&script),
            },
            AsrProbe(script),
        )
    }
}

impl AsrEnginePort for ScriptedAsrEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.script.lock().unwrap().available
    }

    fn start(&mut self, ticket: Ticket, locale_code: &str) -> VoiceResult<()> {
        let mut script = self.script.lock().unwrap();
        if let Some(reason) = script.reject_next_start.take() {
            return Err(VoiceError::StartFailure(reason));
        }
        script.calls.push(AsrCall::Start {
            ticket,
            locale_code: locale_code.to_string(),
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.script.lock().unwrap().calls.push(AsrCall::Stop);
    }

    fn abort(&mut self) {
        self.script.lock().unwrap().calls.push(AsrCall::Abort);
    }
}

