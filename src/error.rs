//! Error taxonomy for the voice subsystem.
//!
//! None of these are fatal: callers render them as a disabled control or a
//! muted fallback and carry on in text mode.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Which of the two engine ports an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Synthesis,
    Recognition,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis => write!(f, "speech synthesis"),
            Self::Recognition => write!(f, "speech recognition"),
        }
    }
}

/// Synthesis failure codes, using the Web Speech vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisErrorCode {
    /// Utterance removed from the queue before it started (our own cancel).
    Canceled,
    /// Utterance cut off while playing (our own cancel).
    Interrupted,
    AudioBusy,
    AudioHardware,
    Network,
    SynthesisUnavailable,
    SynthesisFailed,
    LanguageUnavailable,
    VoiceUnavailable,
    TextTooLong,
    InvalidArgument,
    NotAllowed,
    Other(String),
}

impl SynthesisErrorCode {
    /// True for the codes an engine reports as a consequence of our own
    /// `cancel()`. These are never surfaced to the user.
    pub fn is_self_inflicted(&self) -> bool {
        matches!(self, Self::Canceled | Self::Interrupted)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Canceled => "canceled",
            Self::Interrupted => "interrupted",
            Self::AudioBusy => "audio-busy",
            Self::AudioHardware => "audio-hardware",
            Self::Network => "network",
            Self::SynthesisUnavailable => "synthesis-unavailable",
            Self::SynthesisFailed => "synthesis-failed",
            Self::LanguageUnavailable => "language-unavailable",
            Self::VoiceUnavailable => "voice-unavailable",
            Self::TextTooLong => "text-too-long",
            Self::InvalidArgument => "invalid-argument",
            Self::NotAllowed => "not-allowed",
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "canceled" => Self::Canceled,
            "interrupted" => Self::Interrupted,
            "audio-busy" => Self::AudioBusy,
            "audio-hardware" => Self::AudioHardware,
            "network" => Self::Network,
            "synthesis-unavailable" => Self::SynthesisUnavailable,
            "synthesis-failed" => Self::SynthesisFailed,
            "language-unavailable" => Self::LanguageUnavailable,
            "voice-unavailable" => Self::VoiceUnavailable,
            "text-too-long" => Self::TextTooLong,
            "invalid-argument" => Self::InvalidArgument,
            "not-allowed" => Self::NotAllowed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SynthesisErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognition failure codes, using the Web Speech vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    LanguageNotSupported,
    Other(String),
}

impl RecognitionErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::LanguageNotSupported => "language-not-supported",
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "language-not-supported" => Self::LanguageNotSupported,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("{0} is not available on this host")]
    EngineUnavailable(EngineKind),

    #[error("engine rejected start: {0}")]
    StartFailure(String),

    #[error("speech recognition error: {0}")]
    RecognitionError(RecognitionErrorCode),

    #[error("speech synthesis error: {0}")]
    SynthesisError(SynthesisErrorCode),

    #[error("voice service is not running")]
    ServiceStopped,
}

pub type VoiceResult<T> = Result<T, VoiceError>;
