//! Language registry: display name → locale code.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LanguageProfile {
    pub display_name: &'static str,
    pub locale_code: &'static str,
}

/// Profile every unknown display name falls back to.
pub const DEFAULT_PROFILE: LanguageProfile = LanguageProfile {
    display_name: "English",
    locale_code: "en-US",
};

const PROFILES: &[LanguageProfile] = &[
    DEFAULT_PROFILE,
    LanguageProfile {
        display_name: "Hindi",
        locale_code: "hi-IN",
    },
    LanguageProfile {
        display_name: "Kannada",
        locale_code: "kn-IN",
    },
    LanguageProfile {
        display_name: "Tamil",
        locale_code: "ta-IN",
    },
    LanguageProfile {
        display_name: "Telugu",
        locale_code: "te-IN",
    },
    LanguageProfile {
        display_name: "Bengali",
        locale_code: "bn-IN",
    },
    LanguageProfile {
        display_name: "Marathi",
        locale_code: "mr-IN",
    },
    LanguageProfile {
        display_name: "Gujarati",
        locale_code: "gu-IN",
    },
    LanguageProfile {
        display_name: "Malayalam",
        locale_code: "ml-IN",
    },
];

/// All supported languages, in the order the language picker shows them.
pub fn profiles() -> &'static [LanguageProfile] {
    PROFILES
}

/// Look up a profile by display name ("Hindi", "hindi", " HINDI ").
/// Unknown names resolve to [`DEFAULT_PROFILE`].
pub fn profile_for(display_name: &str) -> LanguageProfile {
    let wanted = display_name.trim();
    PROFILES
        .iter()
        .find(|p| p.display_name.eq_ignore_ascii_case(wanted))
        .copied()
        .unwrap_or(DEFAULT_PROFILE)
}

pub fn locale_for(display_name: &str) -> &'static str {
    profile_for(display_name).locale_code
}
