//! HTTP control API for the voice service.
//!
//! Lets the portal (or curl) drive narration and listening without
//! linking the crate. Runs on 127.0.0.1:8768 by default using axum.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::announcement::Section;
use crate::input::StartOutcome;
use crate::language::{self, LanguageProfile};
use crate::output::SpeakOutcome;
use crate::service::{VoiceHandle, VoiceStatus};
use crate::utterance::{SpeakOptions, UtteranceId};
use crate::voice::{self, VoiceDescriptor};

#[derive(Clone)]
pub struct ApiState {
    pub voice: VoiceHandle,
    /// Language used when a request names none.
    pub default_language: String,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SpeakRequest {
    id: UtteranceId,
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    section: Option<Section>,
    #[serde(default)]
    announcement: Option<String>,
    #[serde(default)]
    rate: Option<f32>,
    #[serde(default)]
    pitch: Option<f32>,
    #[serde(default)]
    volume: Option<f32>,
}

#[derive(Deserialize)]
struct ListenRequest {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            ticket: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            ticket: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct VoicesResponse {
    voices: Vec<VoiceDescriptor>,
    /// Voice each registered language would be narrated with.
    resolved: Vec<ResolvedVoice>,
}

#[derive(Serialize)]
struct ResolvedVoice {
    language: &'static str,
    locale_code: &'static str,
    voice: Option<String>,
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .route("/cancel", post(handle_cancel))
        .route("/listen", post(handle_listen))
        .route("/listen/stop", post(handle_listen_stop))
        .route("/voices", get(handle_voices))
        .route("/languages", get(handle_languages))
        .with_state(state)
}

/// Start the API server as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind voice API on {addr}: {e}");
            return;
        }
    };
    info!("Voice API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Voice API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<VoiceStatus> {
    Json(state.voice.status())
}

async fn handle_speak(
    State(state): State<ApiState>,
    Json(req): Json<SpeakRequest>,
) -> Json<SimpleResponse> {
    let language = req.language.unwrap_or(state.default_language);
    let options = SpeakOptions {
        rate: req.rate,
        pitch: req.pitch,
        volume: req.volume,
        section: req.section,
        announcement: req.announcement,
    };

    let preview: String = req.text.chars().take(60).collect();
    info!("HTTP /speak [{}] {language}: \"{}\"", req.id, preview.replace('\n', " "));

    match state.voice.request_speak(req.id, req.text, &language, options).await {
        Ok(SpeakOutcome::Started { ticket, .. }) => Json(SimpleResponse {
            ticket: Some(ticket.value()),
            ..SimpleResponse::ok("speaking")
        }),
        Ok(SpeakOutcome::Paused) => Json(SimpleResponse::ok("paused")),
        Ok(SpeakOutcome::Resumed) => Json(SimpleResponse::ok("resumed")),
        Ok(SpeakOutcome::Ignored) => Json(SimpleResponse::err("empty text")),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_cancel(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.voice.cancel_all_speech().await {
        Ok(true) => Json(SimpleResponse::ok("cancelled")),
        Ok(false) => Json(SimpleResponse::ok("idle")),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_listen(
    State(state): State<ApiState>,
    Json(req): Json<ListenRequest>,
) -> Json<SimpleResponse> {
    let language = req.language.unwrap_or(state.default_language);
    info!("HTTP /listen {language}");

    // Transcripts and errors reach HTTP clients through /status.
    let result = state
        .voice
        .start_listening(
            &language,
            |text| info!("Transcript ready ({} chars)", text.len()),
            |_| {},
        )
        .await;

    match result {
        Ok(outcome) => {
            let (status, ticket) = match outcome {
                StartOutcome::Started(t) => ("listening", t),
                StartOutcome::AlreadyListening(t) => ("already-listening", t),
            };
            Json(SimpleResponse {
                ticket: Some(ticket.value()),
                ..SimpleResponse::ok(status)
            })
        }
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_listen_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.voice.stop_listening().await {
        Ok(true) => Json(SimpleResponse::ok("stopped")),
        Ok(false) => Json(SimpleResponse::ok("idle")),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_voices(State(state): State<ApiState>) -> Json<VoicesResponse> {
    let voices = state.voice.voices().await.unwrap_or_default();
    let resolved = language::profiles()
        .iter()
        .map(|p| ResolvedVoice {
            language: p.display_name,
            locale_code: p.locale_code,
            voice: voice::resolve(p.locale_code, &voices).map(|v| v.name.clone()),
        })
        .collect();
    Json(VoicesResponse { voices, resolved })
}

async fn handle_languages() -> Json<&'static [LanguageProfile]> {
    Json(language::profiles())
}
