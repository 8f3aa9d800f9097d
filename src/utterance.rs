//! Narration requests and the identifiers that track them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::announcement::Section;

/// Caller-chosen identifier of a narration (a chat message id, a label
/// field name). Repeating an id toggles pause/resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtteranceId(String);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UtteranceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UtteranceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Tag attached to every engine-level operation. Engine events echo it
/// back so callbacks for superseded work can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic ticket source. Never hands out the same ticket twice.
#[derive(Debug, Default)]
pub struct TicketCounter {
    last: u64,
}

impl TicketCounter {
    pub fn issue(&mut self) -> Ticket {
        self.last += 1;
        Ticket(self.last)
    }
}

/// Per-request overrides. Unset fields use the configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpeakOptions {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    /// Medicine-label section; selects a canned pre-roll announcement.
    pub section: Option<Section>,
    /// Explicit pre-roll text. Takes precedence over `section`.
    pub announcement: Option<String>,
}

impl SpeakOptions {
    pub fn with_section(mut self, section: Section) -> Self {
        self.section = Some(section);
        self
    }

    pub fn with_announcement(mut self, text: impl Into<String>) -> Self {
        self.announcement = Some(text.into());
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub(crate) fn announcement_text(&self) -> Option<String> {
        self.announcement
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.section.as_ref().map(|s| s.announcement().to_string()))
    }
}

/// Prosody used when a request leaves a field unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prosody {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for Prosody {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// One narration request, built per call and consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub locale_code: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub announcement_text: Option<String>,
}

impl Utterance {
    pub fn build(
        id: UtteranceId,
        text: &str,
        locale_code: &str,
        options: &SpeakOptions,
        defaults: Prosody,
        max_chars: usize,
    ) -> Self {
        Self {
            id,
            text: limit_text(text.trim(), max_chars),
            locale_code: locale_code.to_string(),
            rate: options.rate.unwrap_or(defaults.rate).clamp(0.1, 10.0),
            pitch: options.pitch.unwrap_or(defaults.pitch).clamp(0.0, 2.0),
            volume: options.volume.unwrap_or(defaults.volume).clamp(0.0, 1.0),
            announcement_text: options.announcement_text(),
        }
    }
}

/// Cut overly long narration on a char boundary and mark the cut.
/// A `max_chars` of zero disables the limit.
pub fn limit_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_text_short_passthrough() {
        assert_eq!(limit_text("Take one tablet daily", 500), "Take one tablet daily");
        assert_eq!(limit_text("abc", 0), "abc");
    }

    #[test]
    fn test_limit_text_cuts_on_char_boundary() {
        // Devanagari: multi-byte chars must not be split.
        let text = "दिन में एक गोली";
        let cut = limit_text(text, 3);
        assert_eq!(cut, "दिन...");
    }

    #[test]
    fn test_tickets_are_monotonic() {
        let mut counter = TicketCounter::default();
        let a = counter.issue();
        let b = counter.issue();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_applies_defaults_and_overrides() {
        let options = SpeakOptions::default().with_rate(0.8);
        let u = Utterance::build(
            "m1".into(),
            "  hello  ",
            "en-US",
            &options,
            Prosody::default(),
            500,
        );
        assert_eq!(u.text, "hello");
        assert_eq!(u.rate, 0.8);
        assert_eq!(u.pitch, 1.0);
        assert_eq!(u.announcement_text, None);
    }

    #[test]
    fn test_explicit_announcement_beats_section() {
        let options = SpeakOptions::default()
            .with_section(Section::Dosage)
            .with_announcement("Listen carefully");
        assert_eq!(options.announcement_text().as_deref(), Some("Listen carefully"));

        let options = SpeakOptions::default().with_section(Section::Dosage);
        assert_eq!(
            options.announcement_text().as_deref(),
            Some("Now reading dosage instructions")
        );
    }
}
