//! Speech input session: one recognition attempt at a time.
//!
//! IDLE → LISTENING → (IDLE | ERROR → IDLE)
//!
//! Capture is single-utterance: the first final transcript ends the
//! session. A `start` while already listening is ignored and reports the
//! running session instead of starting the engine a second time.
//!
//! `stop` ends capture but keeps the session until the engine reports what
//! it heard so far. `abort` drops the session and its callbacks at once.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{AsrEnginePort, RecognitionEvent, RecognitionEventKind};
use crate::error::{EngineKind, VoiceError, VoiceResult};
use crate::utterance::{Ticket, TicketCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionState {
    Idle,
    Listening,
    Error,
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

pub type TranscriptCallback = Box<dyn FnMut(String) + Send>;
pub type ErrorCallback = Box<dyn FnMut(VoiceError) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Ticket),
    /// Duplicate start: the running session is left as it was.
    AlreadyListening(Ticket),
}

/// What a recognition event delivered, beyond invoking the callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Transcript(String),
    Failed(VoiceError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionSession {
    pub state: RecognitionState,
    pub locale_code: Option<String>,
}

struct Attempt {
    ticket: Ticket,
    locale_code: String,
    on_transcript: TranscriptCallback,
    on_error: ErrorCallback,
    /// `stop` was called; waiting for the engine's final result or end.
    stopping: bool,
}

pub struct SpeechInputSession {
    engine: Box<dyn AsrEnginePort>,
    tickets: TicketCounter,
    state: RecognitionState,
    attempt: Option<Attempt>,
}

impl SpeechInputSession {
    pub fn new(engine: Box<dyn AsrEnginePort>) -> Self {
        Self {
            engine,
            tickets: TicketCounter::default(),
            state: RecognitionState::Idle,
            attempt: None,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn session(&self) -> RecognitionSession {
        RecognitionSession {
            state: self.state,
            locale_code: self.attempt.as_ref().map(|a| a.locale_code.clone()),
        }
    }

    pub fn start(
        &mut self,
        locale_code: &str,
        on_transcript: TranscriptCallback,
        on_error: ErrorCallback,
    ) -> VoiceResult<StartOutcome> {
        if !self.engine.is_available() {
            return Err(VoiceError::EngineUnavailable(EngineKind::Recognition));
        }

        if let Some(attempt) = &self.attempt {
            info!(
                "Already listening ({}, {}), ignoring start",
                attempt.locale_code, attempt.ticket
            );
            return Ok(StartOutcome::AlreadyListening(attempt.ticket));
        }

        let ticket = self.tickets.issue();
        if let Err(e) = self.engine.start(ticket, locale_code) {
            warn!("Recognition start rejected: {e}");
            return Err(e);
        }

        self.attempt = Some(Attempt {
            ticket,
            locale_code: locale_code.to_string(),
            on_transcript,
            on_error,
            stopping: false,
        });
        self.state = RecognitionState::Listening;
        info!("State: IDLE → LISTENING ({locale_code})");
        Ok(StartOutcome::Started(ticket))
    }

    /// Stop capturing. The session stays open until the engine delivers the
    /// transcript of what was already said (or ends without one).
    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let Some(attempt) = self.attempt.as_mut() else {
            return false;
        };
        if !attempt.stopping {
            attempt.stopping = true;
            self.engine.stop();
            info!("Stopping capture {}, waiting for final result", attempt.ticket);
        }
        true
    }

    /// Stop and discard the session: no callback fires for it afterwards.
    /// Returns false when there was nothing to abort.
    pub fn abort(&mut self) -> bool {
        let Some(attempt) = self.attempt.take() else {
            return false;
        };
        self.engine.abort();
        self.state = RecognitionState::Idle;
        info!("State: LISTENING → IDLE (aborted {})", attempt.ticket);
        true
    }

    /// Apply an engine callback, invoking the caller's callbacks.
    pub fn handle_event(&mut self, event: RecognitionEvent) -> Option<RecognitionOutcome> {
        let mut attempt = match self.attempt.take() {
            Some(attempt) if attempt.ticket == event.ticket => attempt,
            other => {
                self.attempt = other;
                debug!("Stale recognition event {:?} for {}, ignoring", event.kind, event.ticket);
                return None;
            }
        };

        match event.kind {
            RecognitionEventKind::Start => {
                debug!("Recognizer started ({})", event.ticket);
                self.attempt = Some(attempt);
                None
            }
            RecognitionEventKind::Result {
                is_final: false, ..
            } => {
                self.attempt = Some(attempt);
                None
            }
            RecognitionEventKind::Result { transcript, .. } => {
                self.state = RecognitionState::Idle;
                info!("State: LISTENING → IDLE (transcript: {} chars)", transcript.len());
                (attempt.on_transcript)(transcript.clone());
                Some(RecognitionOutcome::Transcript(transcript))
            }
            RecognitionEventKind::Error(code) => {
                self.state = RecognitionState::Error;
                warn!("Speech recognition failed: {code}");
                let error = VoiceError::RecognitionError(code);
                (attempt.on_error)(error.clone());
                self.state = RecognitionState::Idle;
                debug!("State: ERROR → IDLE");
                Some(RecognitionOutcome::Failed(error))
            }
            RecognitionEventKind::End if attempt.stopping => {
                self.state = RecognitionState::Idle;
                info!("State: LISTENING → IDLE (stopped {})", attempt.ticket);
                None
            }
            RecognitionEventKind::End => {
                self.state = RecognitionState::Idle;
                info!("State: LISTENING → IDLE (no speech recognised)");
                None
            }
        }
    }
}
