//! Voice selection for a requested locale.
//!
//! Resolution order (first match wins):
//! 1. exact locale match
//! 2. same language prefix
//! 3. any English voice, unless English was requested
//! 4. none: the engine picks its own default

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDescriptor {
    pub name: String,
    pub locale_code: String,
}

impl VoiceDescriptor {
    pub fn new(name: impl Into<String>, locale_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale_code: locale_code.into(),
        }
    }
}

/// Engines disagree on spelling: `en_US`, `en-us`, `en-US`.
fn normalize(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

fn prefix(normalized: &str) -> &str {
    normalized.split('-').next().unwrap_or(normalized)
}

/// Pick the best voice for `locale_code` from `catalog`.
pub fn resolve<'a>(
    locale_code: &str,
    catalog: &'a [VoiceDescriptor],
) -> Option<&'a VoiceDescriptor> {
    let wanted = normalize(locale_code);
    let wanted_prefix = prefix(&wanted);

    if let Some(voice) = catalog.iter().find(|v| normalize(&v.locale_code) == wanted) {
        return Some(voice);
    }

    if let Some(voice) = catalog
        .iter()
        .find(|v| prefix(&normalize(&v.locale_code)) == wanted_prefix)
    {
        return Some(voice);
    }

    if wanted_prefix != "en" {
        return catalog
            .iter()
            .find(|v| prefix(&normalize(&v.locale_code)) == "en");
    }

    None
}

/// Cached view of the engine's voice list.
///
/// Engines populate their catalog lazily, so an empty cache is never
/// trusted: callers refresh whenever it is empty or the engine reports a
/// change.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    voices: Vec<VoiceDescriptor>,
}

impl VoiceCatalog {
    pub fn needs_refresh(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn replace(&mut self, voices: Vec<VoiceDescriptor>) {
        self.voices = voices;
    }

    pub fn voices(&self) -> &[VoiceDescriptor] {
        &self.voices
    }

    pub fn resolve(&self, locale_code: &str) -> Option<&VoiceDescriptor> {
        resolve(locale_code, &self.voices)
    }
}
