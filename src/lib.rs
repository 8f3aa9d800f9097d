//! medivoice: voice interaction controller for a healthcare portal.
//!
//! Narrates chat replies and medicine-label sections (text-to-speech) and
//! captures single spoken questions (speech-to-text) through injected
//! engine ports. See [`service::VoiceService`] for the entry point.

pub mod announcement;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod language;
pub mod output;
pub mod service;
pub mod utterance;
pub mod voice;

pub use error::{VoiceError, VoiceResult};
pub use service::{VoiceHandle, VoiceNotice, VoiceService, VoiceStatus};
pub use utterance::{SpeakOptions, UtteranceId};
