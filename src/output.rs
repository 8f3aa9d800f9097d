//! Speech output controller: the single narration channel.
//!
//! IDLE → SPEAKING ⇄ PAUSED → IDLE
//!
//! Requests are keyed by [`UtteranceId`]. Repeating the active id toggles
//! pause/resume; any other id cancels whatever is active and takes over.
//! Engine events are matched against the tickets of the current request,
//! so callbacks from superseded work never touch the current playback.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::announcement::{self, AnnouncementSequencer};
use crate::config::SpeechConfig;
use crate::engine::{EngineUtterance, Segment, SpeechEnginePort, SynthesisEvent, SynthesisEventKind};
use crate::error::{EngineKind, VoiceError, VoiceResult};
use crate::utterance::{Prosody, SpeakOptions, Ticket, TicketCounter, Utterance, UtteranceId};
use crate::voice::{VoiceCatalog, VoiceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Speaking,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Speaking => write!(f, "SPEAKING"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Snapshot of the narration channel while it is not idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivePlayback {
    pub utterance_id: UtteranceId,
    pub state: PlaybackState,
}

/// What a `request_speak` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// New narration. With `pre_roll`, the announcement is playing and the
    /// caller must call [`SpeechOutputController::on_pre_roll_elapsed`]
    /// with `ticket` once the delay is over.
    Started {
        ticket: Ticket,
        pre_roll: Option<Duration>,
    },
    Paused,
    Resumed,
    /// Nothing to say (empty text).
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarrationSettings {
    pub prosody: Prosody,
    pub announcement_delay: Duration,
    /// 0 disables the limit.
    pub max_text_chars: usize,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            prosody: Prosody::default(),
            announcement_delay: announcement::DEFAULT_DELAY,
            max_text_chars: 500,
        }
    }
}

impl From<&SpeechConfig> for NarrationSettings {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            prosody: config.prosody(),
            announcement_delay: config.announcement_delay(),
            max_text_chars: config.max_text_chars,
        }
    }
}

struct Playback {
    utterance_id: UtteranceId,
    state: PlaybackState,
    main_ticket: Ticket,
    announcement_ticket: Option<Ticket>,
    started: bool,
}

pub struct SpeechOutputController {
    engine: Box<dyn SpeechEnginePort>,
    settings: NarrationSettings,
    catalog: VoiceCatalog,
    sequencer: AnnouncementSequencer,
    tickets: TicketCounter,
    current: Option<Playback>,
}

impl SpeechOutputController {
    pub fn new(engine: Box<dyn SpeechEnginePort>, settings: NarrationSettings) -> Self {
        Self {
            engine,
            sequencer: AnnouncementSequencer::new(settings.announcement_delay),
            settings,
            catalog: VoiceCatalog::default(),
            tickets: TicketCounter::default(),
            current: None,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    pub fn state(&self) -> PlaybackState {
        self.current
            .as_ref()
            .map_or(PlaybackState::Idle, |p| p.state)
    }

    pub fn active(&self) -> Option<ActivePlayback> {
        self.current.as_ref().map(|p| ActivePlayback {
            utterance_id: p.utterance_id.clone(),
            state: p.state,
        })
    }

    /// Narrate `text` as `id`, or toggle pause/resume if `id` is active.
    pub fn request_speak(
        &mut self,
        id: UtteranceId,
        text: &str,
        locale_code: &str,
        options: &SpeakOptions,
    ) -> VoiceResult<SpeakOutcome> {
        if !self.engine.is_available() {
            return Err(VoiceError::EngineUnavailable(EngineKind::Synthesis));
        }

        let toggle = self
            .current
            .as_ref()
            .filter(|p| p.utterance_id == id)
            .map(|p| (p.state, p.main_ticket));

        match toggle {
            Some((PlaybackState::Speaking, _)) => {
                self.engine.pause();
                self.set_state(PlaybackState::Paused);
                return Ok(SpeakOutcome::Paused);
            }
            Some((PlaybackState::Paused, main_ticket)) => {
                self.engine.resume();
                self.set_state(PlaybackState::Speaking);
                if let Some(main) = self.sequencer.release_held(main_ticket) {
                    debug!("Releasing main utterance held during pause");
                    self.dispatch(main)?;
                }
                return Ok(SpeakOutcome::Resumed);
            }
            Some((PlaybackState::Idle, _)) | None => {}
        }

        let utterance = Utterance::build(
            id,
            text,
            locale_code,
            options,
            self.settings.prosody,
            self.settings.max_text_chars,
        );
        if utterance.text.is_empty() {
            debug!("Empty narration for {}, ignoring", utterance.id);
            return Ok(SpeakOutcome::Ignored);
        }

        self.cancel_all();

        if self.catalog.needs_refresh() {
            self.catalog.replace(self.engine.voices());
        }
        let voice = self.catalog.resolve(&utterance.locale_code).cloned();
        match &voice {
            Some(v) => debug!(
                "Voice for {}: {} ({})",
                utterance.locale_code, v.name, v.locale_code
            ),
            None => debug!("No voice for {}, using engine default", utterance.locale_code),
        }

        let announcement = utterance.announcement_text.clone().map(|text| {
            let ticket = self.tickets.issue();
            EngineUtterance::new(ticket, Segment::Announcement, text, &utterance, voice.clone())
        });
        let main_ticket = self.tickets.issue();
        let main = EngineUtterance::new(
            main_ticket,
            Segment::Main,
            utterance.text.clone(),
            &utterance,
            voice,
        );

        let announcement_ticket = announcement.as_ref().map(|a| a.ticket);
        let first = announcement.unwrap_or_else(|| main.clone());
        self.engine.speak(first)?;

        info!("State: IDLE → SPEAKING ({}, {})", utterance.id, utterance.locale_code);
        self.current = Some(Playback {
            utterance_id: utterance.id,
            state: PlaybackState::Speaking,
            main_ticket,
            announcement_ticket,
            started: false,
        });

        let pre_roll = announcement_ticket.map(|_| self.sequencer.arm(main_ticket, main));
        Ok(SpeakOutcome::Started {
            ticket: main_ticket,
            pre_roll,
        })
    }

    /// Stop whatever is active. Returns false (and touches nothing) when idle.
    pub fn cancel_all(&mut self) -> bool {
        self.sequencer.disarm();
        match self.current.take() {
            Some(playback) => {
                self.engine.cancel();
                info!("State: {} → IDLE (cancelled {})", playback.state, playback.utterance_id);
                true
            }
            None => false,
        }
    }

    /// The pre-roll delay for request `ticket` ran out.
    pub fn on_pre_roll_elapsed(&mut self, ticket: Ticket) -> VoiceResult<()> {
        let state = match &self.current {
            Some(p) if p.main_ticket == ticket => p.state,
            _ => {
                debug!("Pre-roll {ticket} superseded, dropping main utterance");
                return Ok(());
            }
        };

        if state == PlaybackState::Paused {
            self.sequencer.hold(ticket);
            debug!("Pre-roll {ticket} elapsed while paused, holding main utterance");
            return Ok(());
        }

        match self.sequencer.release(ticket) {
            Some(main) => self.dispatch(main),
            None => Ok(()),
        }
    }

    /// Apply an engine callback. Returns an error to surface to the user.
    pub fn handle_event(&mut self, event: SynthesisEvent) -> Option<VoiceError> {
        let Some(playback) = self.current.as_mut() else {
            debug!("Synthesis event {:?} for {} while idle, ignoring", event.kind, event.ticket);
            return None;
        };

        let is_main = event.ticket == playback.main_ticket;
        if !is_main && playback.announcement_ticket != Some(event.ticket) {
            debug!("Stale synthesis event {:?} for {}, ignoring", event.kind, event.ticket);
            return None;
        }

        match event.kind {
            SynthesisEventKind::Start => {
                if !playback.started {
                    debug!("Engine started {} ({})", playback.utterance_id, event.ticket);
                }
                playback.started = true;
                None
            }
            SynthesisEventKind::End => {
                self.finish_segment(is_main);
                None
            }
            SynthesisEventKind::Error(code) if code.is_self_inflicted() => {
                debug!("Engine reported {code} for {}, treating as end", event.ticket);
                self.finish_segment(is_main);
                None
            }
            SynthesisEventKind::Error(code) if is_main => {
                warn!("Speech synthesis failed for {}: {code}", playback.utterance_id);
                self.current = None;
                self.sequencer.disarm();
                info!("State: → IDLE (error)");
                Some(VoiceError::SynthesisError(code))
            }
            SynthesisEventKind::Error(code) => {
                warn!("Announcement failed for {}: {code}", playback.utterance_id);
                None
            }
        }
    }

    /// The engine's voice catalog changed.
    pub fn on_voices_changed(&mut self) {
        self.catalog.replace(self.engine.voices());
        debug!("Voice catalog refreshed: {} voices", self.catalog.voices().len());
    }

    pub fn voices(&mut self) -> Vec<VoiceDescriptor> {
        if self.catalog.needs_refresh() {
            self.catalog.replace(self.engine.voices());
        }
        self.catalog.voices().to_vec()
    }

    fn finish_segment(&mut self, is_main: bool) {
        if !is_main {
            debug!("Announcement finished");
            return;
        }
        if let Some(playback) = self.current.take() {
            info!("State: {} → IDLE ({} finished)", playback.state, playback.utterance_id);
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if let Some(playback) = self.current.as_mut() {
            info!("State: {} → {} ({})", playback.state, state, playback.utterance_id);
            playback.state = state;
        }
    }

    fn dispatch(&mut self, main: EngineUtterance) -> VoiceResult<()> {
        if let Err(e) = self.engine.speak(main) {
            warn!("Engine rejected main utterance: {e}");
            self.cancel_all();
            return Err(e);
        }
        Ok(())
    }
}
