//! espeak-ng synthesis adapter.
//!
//! One `espeak-ng` process per utterance, played strictly in submission
//! order by a worker task. Cancel bumps a generation counter (queued jobs
//! from older generations are dropped as `canceled`) and kills the running
//! process (reported as `interrupted`). Pause/resume stop and continue the
//! running process with SIGSTOP/SIGCONT; a job that starts while paused is
//! stopped as soon as it is spawned.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::{emit_synthesis, EngineUtterance, EventSender, SpeechEnginePort, SynthesisEventKind};
use crate::config::EspeakConfig;
use crate::error::{SynthesisErrorCode, VoiceError, VoiceResult};
use crate::utterance::Ticket;
use crate::voice::VoiceDescriptor;

struct Job {
    ticket: Ticket,
    generation: u64,
    args: Vec<String>,
}

/// The running `espeak-ng` process and whether it should be stopped.
#[derive(Default)]
struct Process {
    pid: Option<u32>,
    paused: bool,
}

struct Shared {
    generation: AtomicU64,
    cancelled: Notify,
    process: Mutex<Process>,
}

/// A voice from `espeak-ng --voices` and the `-v` argument that selects it.
#[derive(Debug, Clone, PartialEq)]
struct EspeakVoice {
    descriptor: VoiceDescriptor,
    selector: String,
}

pub struct EspeakEngine {
    binary: String,
    base_wpm: u32,
    available: bool,
    jobs: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
    voices: Vec<EspeakVoice>,
}

impl EspeakEngine {
    /// Probe for the binary and start the playback worker.
    /// Must be called from within a tokio runtime.
    pub fn new(config: &EspeakConfig, events: EventSender) -> Self {
        let available = std::process::Command::new(&config.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if available {
            info!("Speech engine: {}", config.binary);
        } else {
            warn!("{} not found, speech output unavailable", config.binary);
        }

        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            cancelled: Notify::new(),
            process: Mutex::new(Process::default()),
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(config.binary.clone(), rx, Arc::clone(&shared), events));

        Self {
            binary: config.binary.clone(),
            base_wpm: config.base_wpm,
            available,
            jobs,
            shared,
            voices: Vec::new(),
        }
    }

    fn selector_for(&self, utterance: &EngineUtterance) -> String {
        if let Some(voice) = &utterance.voice {
            if let Some(v) = self.voices.iter().find(|v| v.descriptor == *voice) {
                return v.selector.clone();
            }
        }
        // Let espeak pick its default voice for the language.
        utterance
            .locale_code
            .split(['-', '_'])
            .next()
            .unwrap_or("en")
            .to_ascii_lowercase()
    }

    fn command_args(&self, utterance: &EngineUtterance) -> Vec<String> {
        let wpm = (self.base_wpm as f32 * utterance.rate).round().clamp(80.0, 450.0) as u32;
        let pitch = (50.0 * utterance.pitch).round().clamp(0.0, 99.0) as u32;
        let amplitude = (100.0 * utterance.volume).round().clamp(0.0, 200.0) as u32;

        vec![
            "-v".into(),
            self.selector_for(utterance),
            "-s".into(),
            wpm.to_string(),
            "-p".into(),
            pitch.to_string(),
            "-a".into(),
            amplitude.to_string(),
            "--".into(),
            utterance.text.clone(),
        ]
    }

    fn submit(&self, ticket: Ticket, args: Vec<String>) -> VoiceResult<()> {
        let job = Job {
            ticket,
            generation: self.shared.generation.load(Ordering::SeqCst),
            args,
        };
        self.jobs
            .send(job)
            .map_err(|_| VoiceError::StartFailure("espeak worker stopped".into()))
    }

    fn set_paused(&self, paused: bool) {
        // The worker checks `paused` under the same lock after each spawn.
        let mut process = self.shared.process.lock().unwrap();
        process.paused = paused;
        if let Some(pid) = process.pid {
            send_signal(if paused { "-STOP" } else { "-CONT" }, pid);
        }
    }
}

fn send_signal(signal: &str, pid: u32) {
    match std::process::Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
    {
        Ok(status) if status.success() => debug!("Sent {signal} to espeak pid {pid}"),
        Ok(status) => warn!("kill {signal} {pid} exited with {status}"),
        Err(e) => warn!("Failed to signal espeak: {e}"),
    }
}

impl SpeechEnginePort for EspeakEngine {
    fn name(&self) -> &str {
        "espeak"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn speak(&mut self, utterance: EngineUtterance) -> VoiceResult<()> {
        self.submit(utterance.ticket, self.command_args(&utterance))
    }

    fn cancel(&mut self) {
        self.shared.process.lock().unwrap().paused = false;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.cancelled.notify_waiters();
    }

    fn pause(&mut self) {
        self.set_paused(true);
    }

    fn resume(&mut self) {
        self.set_paused(false);
    }

    fn voices(&mut self) -> Vec<VoiceDescriptor> {
        if self.voices.is_empty() && self.available {
            match std::process::Command::new(&self.binary).arg("--voices").output() {
                Ok(output) if output.status.success() => {
                    self.voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
                    debug!("espeak reports {} voices", self.voices.len());
                }
                Ok(output) => warn!("{} --voices exited with {}", self.binary, output.status),
                Err(e) => warn!("Failed to list espeak voices: {e}"),
            }
        }
        self.voices.iter().map(|v| v.descriptor.clone()).collect()
    }
}

async fn run_worker(
    binary: String,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    shared: Arc<Shared>,
    events: EventSender,
) {
    while let Some(job) = jobs.recv().await {
        let cancelled = shared.cancelled.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        if job.generation != shared.generation.load(Ordering::SeqCst) {
            let canceled = SynthesisEventKind::Error(SynthesisErrorCode::Canceled);
            emit_synthesis(&events, job.ticket, canceled);
            continue;
        }

        let mut child = match Command::new(&binary)
            .args(&job.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {binary}: {e}");
                emit_synthesis(
                    &events,
                    job.ticket,
                    SynthesisEventKind::Error(SynthesisErrorCode::SynthesisUnavailable),
                );
                continue;
            }
        };

        {
            let mut process = shared.process.lock().unwrap();
            process.pid = child.id();
            if let (true, Some(pid)) = (process.paused, process.pid) {
                debug!("Paused, holding espeak pid {pid}");
                send_signal("-STOP", pid);
            }
        }
        emit_synthesis(&events, job.ticket, SynthesisEventKind::Start);

        let outcome = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut cancelled => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill espeak: {e}");
                }
                None
            }
        };

        shared.process.lock().unwrap().pid = None;

        let kind = match outcome {
            None => SynthesisEventKind::Error(SynthesisErrorCode::Interrupted),
            Some(Ok(status)) if status.success() => SynthesisEventKind::End,
            Some(Ok(status)) => {
                warn!("espeak exited with {status}");
                SynthesisEventKind::Error(SynthesisErrorCode::SynthesisFailed)
            }
            Some(Err(e)) => {
                warn!("Failed to wait for espeak: {e}");
                SynthesisEventKind::Error(SynthesisErrorCode::AudioHardware)
            }
        };
        emit_synthesis(&events, job.ticket, kind);
    }
    debug!("espeak worker stopped");
}

/// Parse the table printed by `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)(en-r 5)
/// ```
fn parse_voice_list(output: &str) -> Vec<EspeakVoice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let _priority = cols.next()?;
            let language = cols.next()?;
            let _age_gender = cols.next()?;
            let name = cols.next()?;
            Some(EspeakVoice {
                descriptor: VoiceDescriptor::new(name.replace('_', " "), locale_code(language)),
                selector: language.to_string(),
            })
        })
        .collect()
}

/// `en-us` → `en-US`, `hi` → `hi`, `en-gb-scotland` → `en-GB-scotland`.
fn locale_code(language: &str) -> String {
    language
        .split('-')
        .enumerate()
        .map(|(i, part)| {
            if i == 1 && part.len() == 2 {
                part.to_ascii_uppercase()
            } else {
                part.to_ascii_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::engine::{event_channel, EngineEvent, EventReceiver};
    use crate::utterance::TicketCounter;
    use crate::voice;

    const VOICES: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  bn              --/M      Bengali            inc/bn
 2  en-gb           --/M      English_(Great_Britain) gmw/en               (en 2)
 5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
 5  hi              --/M      Hindi              inc/hi
 5  ta              --/M      Tamil              dra/ta
";

    #[test]
    fn test_parse_voice_list() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(voices.len(), 5);
        assert_eq!(voices[2].descriptor, VoiceDescriptor::new("English (America)", "en-US"));
        assert_eq!(voices[2].selector, "en-us");
        assert_eq!(voices[3].descriptor.locale_code, "hi");
    }

    #[test]
    fn test_espeak_catalog_resolves_through_prefix() {
        let catalog: Vec<VoiceDescriptor> =
            parse_voice_list(VOICES).into_iter().map(|v| v.descriptor).collect();
        // espeak lists "hi" without a region, so hi-IN resolves by prefix.
        assert_eq!(voice::resolve("hi-IN", &catalog).map(|v| v.name.as_str()), Some("Hindi"));
        // No Kannada voice: English fallback takes the first English entry.
        assert_eq!(
            voice::resolve("kn-IN", &catalog).map(|v| v.name.as_str()),
            Some("English (Great Britain)")
        );
    }

    /// An engine whose worker runs `sleep <secs>` instead of espeak-ng.
    fn sleep_engine() -> (EspeakEngine, EventReceiver) {
        let (events, rx) = event_channel();
        let config = EspeakConfig {
            binary: "sleep".into(),
            ..EspeakConfig::default()
        };
        (EspeakEngine::new(&config, events), rx)
    }

    async fn next(rx: &mut EventReceiver) -> (Ticket, SynthesisEventKind) {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(EngineEvent::Synthesis(event))) => (event.ticket, event.kind),
            other => panic!("expected a synthesis event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_kills_running_and_drops_queued() {
        let (mut engine, mut rx) = sleep_engine();
        let mut tickets = TicketCounter::default();
        let (running, queued, fresh) = (tickets.issue(), tickets.issue(), tickets.issue());

        engine.submit(running, vec!["5".into()]).unwrap();
        engine.submit(queued, vec!["5".into()]).unwrap();
        assert_eq!(next(&mut rx).await, (running, SynthesisEventKind::Start));

        engine.cancel();
        engine.submit(fresh, vec!["0".into()]).unwrap();

        let interrupted = SynthesisEventKind::Error(SynthesisErrorCode::Interrupted);
        let canceled = SynthesisEventKind::Error(SynthesisErrorCode::Canceled);
        assert_eq!(next(&mut rx).await, (running, interrupted));
        assert_eq!(next(&mut rx).await, (queued, canceled));
        assert_eq!(next(&mut rx).await, (fresh, SynthesisEventKind::Start));
        assert_eq!(next(&mut rx).await, (fresh, SynthesisEventKind::End));
    }

    #[tokio::test]
    async fn test_pause_between_jobs_holds_next_job() {
        let (mut engine, mut rx) = sleep_engine();
        let ticket = TicketCounter::default().issue();

        // Nothing is running yet.
        engine.pause();
        engine.submit(ticket, vec!["0.2".into()]).unwrap();
        assert_eq!(next(&mut rx).await, (ticket, SynthesisEventKind::Start));

        // A stopped process cannot exit.
        assert!(timeout(Duration::from_millis(800), rx.recv()).await.is_err());

        engine.resume();
        assert_eq!(next(&mut rx).await, (ticket, SynthesisEventKind::End));
    }

    #[tokio::test]
    async fn test_cancel_clears_pause() {
        let (mut engine, mut rx) = sleep_engine();
        let ticket = TicketCounter::default().issue();

        engine.pause();
        engine.cancel();
        engine.submit(ticket, vec!["0".into()]).unwrap();

        assert_eq!(next(&mut rx).await, (ticket, SynthesisEventKind::Start));
        assert_eq!(next(&mut rx).await, (ticket, SynthesisEventKind::End));
    }

    #[test]
    fn test_locale_code() {
        assert_eq!(locale_code("en-us"), "en-US");
        assert_eq!(locale_code("hi"), "hi");
        assert_eq!(locale_code("en-gb-scotland"), "en-GB-scotland");
    }
}
