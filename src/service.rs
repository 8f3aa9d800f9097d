//! Voice service: owns the narration channel and the recognition session.
//!
//! One task runs [`VoiceService::run`], which serializes caller commands,
//! engine callbacks, and the announcement pre-roll timer through a single
//! `select!` loop. Callers talk to it through a cloneable [`VoiceHandle`].

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{self, EngineEvent, EventReceiver};
use crate::error::{VoiceError, VoiceResult};
use crate::input::{
    ErrorCallback, RecognitionOutcome, RecognitionSession, RecognitionState, SpeechInputSession,
    StartOutcome, TranscriptCallback,
};
use crate::language;
use crate::output::{
    ActivePlayback, NarrationSettings, PlaybackState, SpeakOutcome, SpeechOutputController,
};
use crate::utterance::{SpeakOptions, Ticket, UtteranceId};
use crate::voice::VoiceDescriptor;

const COMMAND_QUEUE: usize = 32;
const NOTICE_QUEUE: usize = 64;

enum Command {
    Speak {
        id: UtteranceId,
        text: String,
        language: String,
        options: SpeakOptions,
        reply: oneshot::Sender<VoiceResult<SpeakOutcome>>,
    },
    CancelAll {
        reply: oneshot::Sender<bool>,
    },
    Listen {
        language: String,
        on_transcript: TranscriptCallback,
        on_error: ErrorCallback,
        reply: oneshot::Sender<VoiceResult<StartOutcome>>,
    },
    StopListening {
        reply: oneshot::Sender<bool>,
    },
    Voices {
        reply: oneshot::Sender<Vec<VoiceDescriptor>>,
    },
    Shutdown,
}

/// Point-in-time view of both voice channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceStatus {
    pub playback: PlaybackState,
    pub active: Option<ActivePlayback>,
    pub recognition: RecognitionSession,
    pub speech_engine: String,
    pub speech_available: bool,
    pub recognition_engine: String,
    pub recognition_available: bool,
    pub last_transcript: Option<String>,
    pub last_error: Option<String>,
}

/// Broadcast to every [`VoiceHandle::subscribe`] receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceNotice {
    Playback(PlaybackState),
    Listening(RecognitionState),
    Transcript(String),
    Error(VoiceError),
}

pub struct VoiceService {
    output: SpeechOutputController,
    input: SpeechInputSession,
    commands: mpsc::Receiver<Command>,
    events: EventReceiver,
    status: watch::Sender<VoiceStatus>,
    notices: broadcast::Sender<VoiceNotice>,
    pre_roll: Option<(Ticket, Instant)>,
    last_transcript: Option<String>,
    last_error: Option<String>,
}

impl VoiceService {
    /// Wire a service to its engines. `events` must be the receiving end
    /// of the channel the engines were built with.
    pub fn new(
        output: SpeechOutputController,
        input: SpeechInputSession,
        events: EventReceiver,
    ) -> (Self, VoiceHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (notices, _) = broadcast::channel(NOTICE_QUEUE);

        let (status, status_rx) = watch::channel(idle_status());

        let service = Self {
            output,
            input,
            commands,
            events,
            status,
            notices: notices.clone(),
            pre_roll: None,
            last_transcript: None,
            last_error: None,
        };
        service.status.send_replace(service.snapshot());

        let handle = VoiceHandle {
            commands: command_tx,
            status: status_rx,
            notices,
        };
        (service, handle)
    }

    /// Build engines from configuration. Loading a recognition model
    /// blocks, so it runs on the blocking pool.
    pub async fn from_config(config: &Config) -> (Self, VoiceHandle) {
        let (events_tx, events_rx) = engine::event_channel();

        let speech = engine::speech_engine(config, events_tx.clone());
        let recognition_config = config.recognition.clone();
        let recognition = match tokio::task::spawn_blocking(move || {
            engine::recognition_engine(&recognition_config, events_tx)
        })
        .await
        {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Recognition engine setup panicked: {e}");
                Box::new(engine::UnavailableAsrEngine)
            }
        };

        let output = SpeechOutputController::new(speech, NarrationSettings::from(&config.speech));
        let input = SpeechInputSession::new(recognition);
        Self::new(output, input, events_rx)
    }

    pub async fn run(mut self) {
        info!(
            "Voice service ready (speech: {}{}, recognition: {}{})",
            self.output.engine_name(),
            if self.output.is_available() { "" } else { " [unavailable]" },
            self.input.engine_name(),
            if self.input.is_available() { "" } else { " [unavailable]" },
        );

        loop {
            let deadline = self.pre_roll.map(|(_, at)| at);

            // Engine callbacks first: a command must see every event that
            // arrived before it.
            tokio::select! {
                biased;

                Some(event) = self.events.recv() => self.on_engine_event(event),
                _ = sleep_until(deadline) => self.on_pre_roll_elapsed(),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }

            self.publish_status();
        }

        self.output.cancel_all();
        self.input.abort();
        self.publish_status();
        info!("Voice service stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Speak {
                id,
                text,
                language,
                options,
                reply,
            } => {
                let profile = language::profile_for(&language);
                debug!("Speak {id} in {} ({})", profile.display_name, profile.locale_code);
                let result = self.output.request_speak(id, &text, profile.locale_code, &options);
                match &result {
                    Ok(SpeakOutcome::Started {
                        ticket,
                        pre_roll: Some(delay),
                    }) => self.pre_roll = Some((*ticket, Instant::now() + *delay)),
                    Ok(_) => {}
                    Err(e) => self.record_error(e.clone()),
                }
                self.reply(reply, result);
            }
            Command::CancelAll { reply } => {
                let cancelled = self.output.cancel_all();
                self.pre_roll = None;
                self.reply(reply, cancelled);
            }
            Command::Listen {
                language,
                on_transcript,
                on_error,
                reply,
            } => {
                let locale_code = language::locale_for(&language);
                let result = self.input.start(locale_code, on_transcript, on_error);
                if let Err(e) = &result {
                    self.record_error(e.clone());
                }
                self.reply(reply, result);
            }
            Command::StopListening { reply } => {
                let stopped = self.input.stop();
                self.reply(reply, stopped);
            }
            Command::Voices { reply } => {
                let voices = self.output.voices();
                self.reply(reply, voices);
            }
            Command::Shutdown => {}
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Synthesis(event) => {
                if let Some(e) = self.output.handle_event(event) {
                    self.record_error(e);
                }
            }
            EngineEvent::VoicesChanged => self.output.on_voices_changed(),
            EngineEvent::Recognition(event) => match self.input.handle_event(event) {
                Some(RecognitionOutcome::Transcript(text)) => {
                    self.last_transcript = Some(text.clone());
                    let _ = self.notices.send(VoiceNotice::Transcript(text));
                }
                Some(RecognitionOutcome::Failed(e)) => self.record_error(e),
                None => {}
            },
        }
    }

    fn on_pre_roll_elapsed(&mut self) {
        let Some((ticket, _)) = self.pre_roll.take() else {
            return;
        };
        if let Err(e) = self.output.on_pre_roll_elapsed(ticket) {
            self.record_error(e);
        }
    }

    fn record_error(&mut self, error: VoiceError) {
        warn!("Voice error: {error}");
        self.last_error = Some(error.to_string());
        let _ = self.notices.send(VoiceNotice::Error(error));
    }

    fn reply<T>(&mut self, reply: oneshot::Sender<T>, value: T) {
        // Publish first so a caller that awaits the reply and then reads
        // the status sees the effect of its own command.
        self.publish_status();
        let _ = reply.send(value);
    }

    fn snapshot(&self) -> VoiceStatus {
        VoiceStatus {
            playback: self.output.state(),
            active: self.output.active(),
            recognition: self.input.session(),
            speech_engine: self.output.engine_name().to_string(),
            speech_available: self.output.is_available(),
            recognition_engine: self.input.engine_name().to_string(),
            recognition_available: self.input.is_available(),
            last_transcript: self.last_transcript.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish_status(&mut self) {
        let status = self.snapshot();
        let (playback, listening) = {
            let previous = self.status.borrow();
            (previous.playback, previous.recognition.state)
        };
        if playback != status.playback {
            let _ = self.notices.send(VoiceNotice::Playback(status.playback));
        }
        if listening != status.recognition.state {
            let _ = self.notices.send(VoiceNotice::Listening(status.recognition.state));
        }
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

fn idle_status() -> VoiceStatus {
    VoiceStatus {
        playback: PlaybackState::Idle,
        active: None,
        recognition: RecognitionSession {
            state: RecognitionState::Idle,
            locale_code: None,
        },
        speech_engine: String::new(),
        speech_available: false,
        recognition_engine: String::new(),
        recognition_available: false,
        last_transcript: None,
        last_error: None,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front door to a running [`VoiceService`].
#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<VoiceStatus>,
    notices: broadcast::Sender<VoiceNotice>,
}

impl VoiceHandle {
    /// Narrate `text` in the named language. Repeating the active `id`
    /// toggles pause/resume.
    pub async fn request_speak(
        &self,
        id: impl Into<UtteranceId>,
        text: impl Into<String>,
        language: &str,
        options: SpeakOptions,
    ) -> VoiceResult<SpeakOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Speak {
            id: id.into(),
            text: text.into(),
            language: language.to_string(),
            options,
            reply,
        })
        .await?;
        rx.await.map_err(|_| VoiceError::ServiceStopped)?
    }

    pub async fn cancel_all_speech(&self) -> VoiceResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelAll { reply }).await?;
        rx.await.map_err(|_| VoiceError::ServiceStopped)
    }

    /// Begin one recognition attempt. `on_transcript` receives the final
    /// transcript; `on_error` receives engine failures.
    pub async fn start_listening(
        &self,
        language: &str,
        on_transcript: impl FnMut(String) + Send + 'static,
        on_error: impl FnMut(VoiceError) + Send + 'static,
    ) -> VoiceResult<StartOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Listen {
            language: language.to_string(),
            on_transcript: Box::new(on_transcript),
            on_error: Box::new(on_error),
            reply,
        })
        .await?;
        rx.await.map_err(|_| VoiceError::ServiceStopped)?
    }

    pub async fn stop_listening(&self) -> VoiceResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopListening { reply }).await?;
        rx.await.map_err(|_| VoiceError::ServiceStopped)
    }

    pub async fn voices(&self) -> VoiceResult<Vec<VoiceDescriptor>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Voices { reply }).await?;
        rx.await.map_err(|_| VoiceError::ServiceStopped)
    }

    pub fn status(&self) -> VoiceStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<VoiceStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceNotice> {
        self.notices.subscribe()
    }

    /// Stop the service; active narration and listening are cancelled.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::ServiceStopped)
    }
}
