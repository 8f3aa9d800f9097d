//! Whisper recognition adapter: cpal microphone capture + whisper.cpp.
//!
//! Each `start` opens the default input device on a capture thread,
//! records until the speaker goes quiet (RMS silence detection), then
//! transcribes the clip once. Single-utterance: one final result per
//! ticket, followed by End. `stop` cuts the recording short but still
//! transcribes it; `abort` throws the clip away.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{emit_recognition, AsrEnginePort, EventSender, RecognitionEventKind};
use crate::config::RecognitionConfig;
use crate::error::{RecognitionErrorCode, VoiceError, VoiceResult};
use crate::utterance::Ticket;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Capture {
    ticket: Ticket,
    stop: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

/// A capture keeps the device until its thread has finished, including
/// the transcription that follows `stop`.
fn ensure_idle(capture: Option<&Capture>) -> VoiceResult<()> {
    match capture {
        Some(c) if !c.worker.is_finished() => Err(VoiceError::StartFailure(format!(
            "capture {} still running",
            c.ticket
        ))),
        _ => Ok(()),
    }
}

pub struct WhisperRecognizer {
    ctx: Arc<WhisperContext>,
    config: RecognitionConfig,
    events: EventSender,
    capture: Option<Capture>,
}

impl WhisperRecognizer {
    /// Load the GGML model named by `config.model`.
    pub fn load(config: &RecognitionConfig, events: EventSender) -> Result<Self, String> {
        let model_path = find_model(&config.model)?;
        let model = model_path
            .to_str()
            .ok_or_else(|| format!("Model path is not UTF-8: {}", model_path.display()))?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();
        let ctx = WhisperContext::new_with_params(model, WhisperContextParameters::default())
            .map_err(|e| format!("Failed to load Whisper model: {e}"))?;
        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            config: config.clone(),
            events,
            capture: None,
        })
    }
}

impl AsrEnginePort for WhisperRecognizer {
    fn name(&self) -> &str {
        "whisper"
    }

    fn start(&mut self, ticket: Ticket, locale_code: &str) -> VoiceResult<()> {
        ensure_idle(self.capture.as_ref())?;

        let stop = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(AtomicBool::new(false));
        let job = CaptureJob {
            ticket,
            language: language_prefix(locale_code),
            config: self.config.clone(),
            ctx: Arc::clone(&self.ctx),
            events: self.events.clone(),
            stop: Arc::clone(&stop),
            discard: Arc::clone(&discard),
        };

        let worker = std::thread::Builder::new()
            .name("whisper-capture".into())
            .spawn(move || job.run())
            .map_err(|e| VoiceError::StartFailure(format!("failed to spawn capture thread: {e}")))?;

        self.capture = Some(Capture {
            ticket,
            stop,
            discard,
            worker,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(capture) = &self.capture {
            capture.stop.store(true, Ordering::SeqCst);
            debug!("Capture {} asked to stop", capture.ticket);
        }
    }

    fn abort(&mut self) {
        if let Some(capture) = &self.capture {
            capture.discard.store(true, Ordering::SeqCst);
            capture.stop.store(true, Ordering::SeqCst);
            debug!("Capture {} aborted", capture.ticket);
        }
    }
}

struct CaptureJob {
    ticket: Ticket,
    language: String,
    config: RecognitionConfig,
    ctx: Arc<WhisperContext>,
    events: EventSender,
    stop: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
}

#[derive(Default)]
struct CaptureState {
    buffer: Vec<f32>,
    silence_start: Option<Instant>,
    should_stop: bool,
}

impl CaptureJob {
    fn run(self) {
        let samples = match self.record() {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Audio capture failed: {e}");
                self.emit(RecognitionEventKind::Error(RecognitionErrorCode::AudioCapture));
                return;
            }
        };

        if self.discard.load(Ordering::SeqCst) {
            self.emit(RecognitionEventKind::End);
            return;
        }

        if rms_energy(&samples) < self.config.silence_threshold {
            info!("Audio is silent, skipping transcription");
            self.emit(RecognitionEventKind::Error(RecognitionErrorCode::NoSpeech));
            return;
        }

        match self.transcribe(&samples) {
            Ok(text) if text.is_empty() => {
                self.emit(RecognitionEventKind::Error(RecognitionErrorCode::NoSpeech));
            }
            Ok(transcript) => {
                self.emit(RecognitionEventKind::Result {
                    transcript,
                    is_final: true,
                });
                self.emit(RecognitionEventKind::End);
            }
            Err(e) => {
                warn!("{e}");
                self.emit(RecognitionEventKind::Error(RecognitionErrorCode::Other(
                    "transcription-failed".into(),
                )));
            }
        }
    }

    fn emit(&self, kind: RecognitionEventKind) {
        emit_recognition(&self.events, self.ticket, kind);
    }

    /// Record until silence, the duration limit, or `stop`.
    fn record(&self) -> Result<Vec<f32>, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or("No input audio device available")?;
        info!("Using audio device: {}", device.name().unwrap_or("unknown".into()));

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let max_samples = (self.config.max_duration * self.config.sample_rate as f64) as usize;
        let state = Arc::new(Mutex::new(CaptureState {
            buffer: Vec::with_capacity(max_samples),
            ..CaptureState::default()
        }));

        let shared = Arc::clone(&state);
        let started = Instant::now();
        let silence_threshold = self.config.silence_threshold;
        let silence_duration = self.config.silence_duration;
        let min_speech_duration = self.config.min_speech_duration;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mut inner = shared.lock().unwrap();
                    if inner.should_stop {
                        return;
                    }

                    let remaining = max_samples.saturating_sub(inner.buffer.len());
                    let to_copy = data.len().min(remaining);
                    inner.buffer.extend_from_slice(&data[..to_copy]);
                    if inner.buffer.len() >= max_samples {
                        info!("Max capture duration reached");
                        inner.should_stop = true;
                        return;
                    }

                    if started.elapsed().as_secs_f64() < min_speech_duration {
                        return;
                    }

                    if rms_energy(data) < silence_threshold {
                        let silence_start = *inner.silence_start.get_or_insert_with(Instant::now);
                        if silence_start.elapsed().as_secs_f64() >= silence_duration {
                            debug!("Silence for {silence_duration}s, ending capture");
                            inner.should_stop = true;
                        }
                    } else {
                        inner.silence_start = None;
                    }
                },
                move |err| warn!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| format!("Failed to build input stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;
        self.emit(RecognitionEventKind::Start);

        while !self.stop.load(Ordering::SeqCst) && !state.lock().unwrap().should_stop {
            std::thread::sleep(POLL_INTERVAL);
        }
        drop(stream);

        let samples = std::mem::take(&mut state.lock().unwrap().buffer);
        debug!(
            "Captured {:.1}s ({} samples)",
            samples.len() as f64 / self.config.sample_rate as f64,
            samples.len()
        );
        Ok(samples)
    }

    fn transcribe(&self, samples: &[f32]) -> Result<String, String> {
        let t0 = Instant::now();
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| format!("Failed to create whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| format!("Whisper inference failed: {e}"))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            if let Ok(segment_text) = segment.to_str_lossy() {
                let trimmed = segment_text.trim();
                if !trimmed.is_empty() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(trimmed);
                }
            }
        }

        info!(
            "Transcribed {:.1}s audio ({}) in {}ms",
            samples.len() as f64 / self.config.sample_rate as f64,
            self.language,
            t0.elapsed().as_millis()
        );
        Ok(text)
    }
}

/// Whisper takes ISO 639-1 codes: `hi-IN` → `hi`.
fn language_prefix(locale_code: &str) -> String {
    locale_code
        .split(['-', '_'])
        .next()
        .filter(|p| !p.is_empty())
        .unwrap_or("en")
        .to_ascii_lowercase()
}

fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Find the GGML model: a direct path, or `ggml-<name>.bin` in the
/// working directory or `~/.cache/whisper`.
fn find_model(model_name: &str) -> Result<PathBuf, String> {
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filename = format!("ggml-{}.bin", model_name.replace('/', "-"));
    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::home_dir().map(|h| h.join(".local/share/medivoice")),
    ]
    .into_iter()
    .flatten()
    .collect();

    search_dirs
        .iter()
        .map(|dir| dir.join(&filename))
        .find(|path| path.exists())
        .ok_or_else(|| format!("Whisper model {filename} not found in {search_dirs:?}"))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::utterance::TicketCounter;

    #[test]
    fn test_stopped_capture_blocks_start_until_finished() {
        let (finish, finished) = mpsc::channel::<()>();
        let ticket = TicketCounter::default().issue();
        let capture = Capture {
            ticket,
            stop: Arc::new(AtomicBool::new(true)),
            discard: Arc::new(AtomicBool::new(false)),
            // Stands in for a capture thread still transcribing.
            worker: std::thread::spawn(move || {
                let _ = finished.recv();
            }),
        };
        assert_eq!(
            ensure_idle(Some(&capture)),
            Err(VoiceError::StartFailure(format!("capture {ticket} still running")))
        );

        finish.send(()).unwrap();
        while !capture.worker.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ensure_idle(Some(&capture)), Ok(()));
        assert_eq!(ensure_idle(None), Ok(()));
    }

    #[test]
    fn test_language_prefix() {
        assert_eq!(language_prefix("hi-IN"), "hi");
        assert_eq!(language_prefix("en_US"), "en");
        assert_eq!(language_prefix(""), "en");
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert!((rms_energy(&[0.5, -0.5]) - 0.5).abs() < f32::EPSILON);
    }
}
