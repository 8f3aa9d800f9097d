//! Configuration management for medivoice.
//!
//! Loads config from a YAML file in standard locations. Every section is
//! optional; missing keys take the defaults below.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::utterance::Prosody;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Master audio toggle. When off, narration reports the engine as unavailable.
    pub enabled: bool,
    /// espeak, dry-run or none
    pub backend: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub announcement_delay_ms: u64,
    /// Longer narration is cut and suffixed with "...". 0 disables the limit.
    pub max_text_chars: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "espeak".into(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            announcement_delay_ms: 300,
            max_text_chars: 500,
        }
    }
}

impl SpeechConfig {
    pub fn prosody(&self) -> Prosody {
        Prosody {
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }

    pub fn announcement_delay(&self) -> Duration {
        Duration::from_millis(self.announcement_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub enabled: bool,
    /// whisper or none
    pub backend: String,
    pub model: String,
    pub sample_rate: u32,
    pub silence_threshold: f32,
    pub silence_duration: f64,
    pub min_speech_duration: f64,
    pub max_duration: f64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "whisper".into(),
            model: "base".into(),
            sample_rate: 16000,
            silence_threshold: 0.01,
            silence_duration: 1.5,
            min_speech_duration: 0.5,
            max_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EspeakConfig {
    pub binary: String,
    /// Words per minute at rate 1.0.
    pub base_wpm: u32,
}

impl Default for EspeakConfig {
    fn default() -> Self {
        Self {
            binary: "espeak-ng".into(),
            base_wpm: 175,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Display name used when a request names no language.
    pub default: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            default: "english".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub recognition: RecognitionConfig,
    pub espeak: EspeakConfig,
    pub api: ApiConfig,
    pub language: LanguageConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./medivoice.yaml
    /// 2. ~/.config/medivoice/config.yaml
    /// 3. /etc/medivoice/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("medivoice.yaml")),
                dirs::home_dir().map(|h| h.join(".config/medivoice/config.yaml")),
                Some(PathBuf::from("/etc/medivoice/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {e}, using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::parse(
            "speech:\n  backend: dry-run\n  rate: 0.8\napi:\n  port: 9000\n",
        )
        .unwrap();

        assert_eq!(config.speech.backend, "dry-run");
        assert_eq!(config.speech.rate, 0.8);
        assert_eq!(config.speech.announcement_delay_ms, 300);
        assert_eq!(config.speech.max_text_chars, 500);
        assert_eq!(config.api.port, 9000);
        assert!(config.api.enabled);
        assert_eq!(config.language.default, "english");
        assert_eq!(config.espeak.binary, "espeak-ng");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/medivoice.yaml")));
        assert_eq!(config.speech.backend, "espeak");
        assert_eq!(config.recognition.sample_rate, 16000);
    }

    #[test]
    fn test_announcement_delay() {
        let config = SpeechConfig {
            announcement_delay_ms: 150,
            ..SpeechConfig::default()
        };
        assert_eq!(config.announcement_delay(), Duration::from_millis(150));
    }
}
