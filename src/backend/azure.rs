//! Azure Cognitive Services backend.
//!
//! Each chunk is sent to the fast transcription REST API, which returns every
//! phrase it recognized with its offset. The phrases are then translated in
//! batched calls to the Translator text API. Both calls run on a spawned task
//! that reports one `Recognized` event per phrase.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use http::header::ACCEPT;
use http::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{CancellationReason, RecognitionEvent, SpeechTranslator, TranslationSession};
use crate::config::AzureConfig;
use crate::error::AppError;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const SUBSCRIPTION_REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";
const TRANSCRIPTION_API_VERSION: &str = "2024-11-15";
const WAV_MIME: &str = "audio/wav";
/// Translator accepts at most 1000 elements per call.
const TRANSLATE_BATCH: usize = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);
const ERROR_BODY_CHARS: usize = 300;

/// Speech translation over the Azure REST APIs.
pub struct AzureSpeechTranslator {
    client: reqwest::Client,
    cfg: AzureConfig,
}

impl AzureSpeechTranslator {
    pub fn new(cfg: AzureConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;
        Ok(Self { client, cfg })
    }

    fn session_context(&self) -> Result<SessionContext, AppError> {
        let (Some(key), Some(region)) = (self.cfg.key.clone(), self.cfg.region.clone()) else {
            return Err(AppError::translation(
                "authentication failed: COG_SERVICE_KEY and COG_SERVICE_REGION must be set",
            ));
        };
        let transcription_url = self.cfg.transcription_url().ok_or_else(|| {
            AppError::translation("authentication failed: no speech endpoint configured")
        })?;

        Ok(SessionContext {
            client: self.client.clone(),
            key,
            region,
            transcription_url,
            translate_url: format!(
                "{}/translate",
                self.cfg.translator_endpoint.trim_end_matches('/')
            ),
            source_locale: self.cfg.source_language.clone(),
            source_text_language: self.cfg.source_text_language().to_string(),
        })
    }
}

#[async_trait]
impl SpeechTranslator for AzureSpeechTranslator {
    async fn open_session(
        &self,
        audio: &Path,
        target_language: &str,
    ) -> Result<TranslationSession, AppError> {
        let ctx = self.session_context()?;
        let bytes = tokio::fs::read(audio).await.map_err(|err| {
            AppError::translation(format!("failed to read audio chunk {:?}: {err}", audio))
        })?;
        let file_name = audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chunk.wav".to_string());

        let (tx, rx) = mpsc::channel(8);
        let target = target_language.to_string();
        let worker = tokio::spawn(async move {
            run_session(ctx, bytes, file_name, target, tx).await;
        });
        Ok(TranslationSession::new(rx, Some(worker)))
    }
}

struct SessionContext {
    client: reqwest::Client,
    key: String,
    region: String,
    transcription_url: String,
    translate_url: String,
    source_locale: String,
    source_text_language: String,
}

async fn run_session(
    ctx: SessionContext,
    audio: Vec<u8>,
    file_name: String,
    target: String,
    events: mpsc::Sender<RecognitionEvent>,
) {
    let phrases = match transcribe(&ctx, audio, file_name).await {
        Ok(phrases) => phrases,
        Err(err) => return cancel(&events, err).await,
    };
    let translations = match translate_phrases(&ctx, &phrases, &target).await {
        Ok(translations) => translations,
        Err(err) => return cancel(&events, err).await,
    };
    debug!(phrases = phrases.len(), "chunk transcribed");

    for event in phrase_events(phrases, translations) {
        if events.send(event).await.is_err() {
            debug!("translation session dropped before completion");
            return;
        }
    }
    let _ = events.send(RecognitionEvent::SessionStopped).await;
}

async fn cancel(events: &mpsc::Sender<RecognitionEvent>, err: AppError) {
    warn!(error = %err, "speech translation session canceled");
    let _ = events
        .send(RecognitionEvent::Canceled {
            reason: CancellationReason::Error,
            details: err.to_string(),
        })
        .await;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionResponse {
    #[serde(default)]
    phrases: Vec<TranscribedPhrase>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribedPhrase {
    #[serde(default)]
    offset_milliseconds: u64,
    #[serde(default)]
    text: String,
}

async fn transcribe(
    ctx: &SessionContext,
    audio: Vec<u8>,
    file_name: String,
) -> Result<Vec<String>, AppError> {
    let audio_part = Part::bytes(audio)
        .file_name(file_name)
        .mime_str(WAV_MIME)
        .map_err(|err| AppError::internal(format!("invalid audio content type: {err}")))?;
    let form = Form::new()
        .part("audio", audio_part)
        .text("definition", json!({ "locales": [ctx.source_locale] }).to_string());

    let response = ctx
        .client
        .post(&ctx.transcription_url)
        .query(&[("api-version", TRANSCRIPTION_API_VERSION)])
        .header(SUBSCRIPTION_KEY_HEADER, &ctx.key)
        .header(ACCEPT, "application/json")
        .multipart(form)
        .send()
        .await
        .map_err(|err| AppError::translation(format!("speech recognition request failed: {err}")))?;

    let status = response.status();
    let body = response.text().await.map_err(|err| {
        AppError::translation(format!("failed to read speech recognition response: {err}"))
    })?;
    check_status("speech recognition", status, &body)?;

    let parsed: TranscriptionResponse = serde_json::from_str(&body).map_err(|err| {
        AppError::translation(format!("invalid speech recognition response: {err}"))
    })?;
    Ok(recognized_phrases(parsed))
}

/// Phrase texts in spoken order, without blank ones.
fn recognized_phrases(response: TranscriptionResponse) -> Vec<String> {
    let mut phrases = response.phrases;
    phrases.sort_by_key(|phrase| phrase.offset_milliseconds);
    phrases
        .into_iter()
        .map(|phrase| phrase.text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// One event per phrase, or a single `NoMatch` when nothing was heard.
fn phrase_events(phrases: Vec<String>, translations: Vec<Option<String>>) -> Vec<RecognitionEvent> {
    if phrases.is_empty() {
        return vec![RecognitionEvent::NoMatch];
    }
    let mut translations = translations.into_iter();
    phrases
        .into_iter()
        .map(|text| RecognitionEvent::Recognized {
            text,
            translation: translations.next().flatten(),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct TranslateItem {
    #[serde(default)]
    translations: Vec<TranslationEntry>,
}

#[derive(Debug, Deserialize)]
struct TranslationEntry {
    text: String,
    to: String,
}

/// Translates `phrases` in order; the result lines up with the input.
async fn translate_phrases(
    ctx: &SessionContext,
    phrases: &[String],
    target: &str,
) -> Result<Vec<Option<String>>, AppError> {
    let mut translations = Vec::with_capacity(phrases.len());
    for batch in phrases.chunks(TRANSLATE_BATCH) {
        let items = translate_batch(ctx, batch, target).await?;
        translations.extend((0..batch.len()).map(|idx| {
            items
                .get(idx)
                .and_then(|item| pick_translation(item, target))
        }));
    }
    Ok(translations)
}

async fn translate_batch(
    ctx: &SessionContext,
    batch: &[String],
    target: &str,
) -> Result<Vec<TranslateItem>, AppError> {
    let body = batch
        .iter()
        .map(|text| json!({ "Text": text }))
        .collect::<Vec<_>>();
    let response = ctx
        .client
        .post(&ctx.translate_url)
        .query(&[
            ("api-version", "3.0"),
            ("from", ctx.source_text_language.as_str()),
            ("to", target),
        ])
        .header(SUBSCRIPTION_KEY_HEADER, &ctx.key)
        .header(SUBSCRIPTION_REGION_HEADER, &ctx.region)
        .json(&body)
        .send()
        .await
        .map_err(|err| AppError::translation(format!("translation request failed: {err}")))?;

    let status = response.status();
    let body = response.text().await.map_err(|err| {
        AppError::translation(format!("failed to read translation response: {err}"))
    })?;
    check_status("translation", status, &body)?;

    serde_json::from_str(&body)
        .map_err(|err| AppError::translation(format!("invalid translation response: {err}")))
}

/// Finds the non-empty rendering for `target` in one Translator result item.
fn pick_translation(item: &TranslateItem, target: &str) -> Option<String> {
    item.translations
        .iter()
        .find(|entry| entry.to.eq_ignore_ascii_case(target))
        .map(|entry| entry.text.clone())
        .filter(|text| !text.is_empty())
}

fn check_status(service: &str, status: StatusCode, body: &str) -> Result<(), AppError> {
    if status.is_success() {
        return Ok(());
    }
    let snippet = body.chars().take(ERROR_BODY_CHARS).collect::<String>();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::translation(format!(
            "authentication failed: {service} service returned {status}; check COG_SERVICE_KEY and COG_SERVICE_REGION"
        )),
        StatusCode::TOO_MANY_REQUESTS => AppError::translation(format!(
            "quota exceeded: {service} service returned {status}"
        )),
        _ => AppError::translation(format!(
            "{service} service returned {status}: {snippet}"
        )),
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Bytes;
    use axum::response::{IntoResponse, Response};

    use super::*;
    use crate::config::test_config;
    use crate::workflow::testing::phrase;

    #[test]
    fn transcription_keeps_every_phrase_in_spoken_order() {
        let parsed: TranscriptionResponse = serde_json::from_str(
            r#"{
                "durationMilliseconds": 58200,
                "combinedPhrases": [{"text": "Next stop, Central. Mind the gap. Doors closing."}],
                "phrases": [
                    {"offsetMilliseconds": 31000, "durationMilliseconds": 1800, "text": "Doors closing.", "locale": "en-US", "confidence": 0.91},
                    {"offsetMilliseconds": 400, "durationMilliseconds": 2100, "text": "Next stop, Central.", "locale": "en-US", "confidence": 0.95},
                    {"offsetMilliseconds": 12000, "durationMilliseconds": 300, "text": "  ", "locale": "en-US", "confidence": 0.2},
                    {"offsetMilliseconds": 15500, "durationMilliseconds": 1200, "text": "Mind the gap.", "locale": "en-US", "confidence": 0.93}
                ]
            }"#,
        )
        .expect("json");
        assert_eq!(
            recognized_phrases(parsed),
            ["Next stop, Central.", "Mind the gap.", "Doors closing."]
        );
    }

    #[test]
    fn silent_transcription_has_no_phrases() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"durationMilliseconds": 60000, "combinedPhrases": [], "phrases": []}"#)
                .expect("json");
        assert!(recognized_phrases(parsed).is_empty());
        let parsed: TranscriptionResponse = serde_json::from_str("{}").expect("json");
        assert!(recognized_phrases(parsed).is_empty());
    }

    #[test]
    fn each_phrase_becomes_one_event() {
        let events = phrase_events(
            vec!["One.".to_string(), "Two.".to_string(), "Three.".to_string()],
            vec![Some("Un.".to_string()), None],
        );
        assert_eq!(
            events,
            [
                phrase("One.", Some("Un.")),
                phrase("Two.", None),
                phrase("Three.", None),
            ]
        );
        assert_eq!(phrase_events(Vec::new(), Vec::new()), [RecognitionEvent::NoMatch]);
    }

    #[test]
    fn pick_translation_matches_target_case_insensitively() {
        let items: Vec<TranslateItem> = serde_json::from_str(
            r#"[{"translations":[{"text":"Bonjour.","to":"fr"},{"text":"你好。","to":"zh-Hans"}]}]"#,
        )
        .expect("json");
        assert_eq!(pick_translation(&items[0], "fr").as_deref(), Some("Bonjour."));
        assert_eq!(pick_translation(&items[0], "zh-hans").as_deref(), Some("你好。"));
        assert_eq!(pick_translation(&items[0], "de"), None);
    }

    #[test]
    fn pick_translation_ignores_empty_text() {
        let items: Vec<TranslateItem> =
            serde_json::from_str(r#"[{"translations":[{"text":"","to":"fr"}]}]"#).expect("json");
        assert_eq!(pick_translation(&items[0], "fr"), None);
    }

    #[test]
    fn auth_statuses_map_to_authentication_errors() {
        let err = check_status("translation", StatusCode::UNAUTHORIZED, "").expect_err("401");
        assert!(err.to_string().starts_with("authentication failed"));
        let err = check_status("translation", StatusCode::TOO_MANY_REQUESTS, "").expect_err("429");
        assert!(err.to_string().starts_with("quota exceeded"));
        let err = check_status("translation", StatusCode::BAD_REQUEST, "bad target")
            .expect_err("400");
        assert!(err.to_string().contains("bad target"));
        assert!(check_status("translation", StatusCode::OK, "").is_ok());
    }

    #[tokio::test]
    async fn missing_credentials_fail_every_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = test_config(dir.path(), &dir.path().join("station.wav"));
        cfg.azure.key = None;
        let translator = AzureSpeechTranslator::new(cfg.azure).expect("client");

        let err = translator
            .open_session(&dir.path().join("chunk_000.wav"), "fr")
            .await
            .err()
            .expect("auth error");
        assert!(matches!(err, AppError::Translation(_)));
        assert!(err.to_string().contains("authentication failed"));
    }

    /// Stands in for both Azure services on one local listener.
    async fn fake_azure(uri: http::Uri, body: Bytes) -> Response {
        match uri.path() {
            "/speechtotext/transcriptions:transcribe" => {
                let form = String::from_utf8_lossy(&body);
                let complete = form.contains("name=\"definition\"")
                    && form.contains("filename=\"chunk_000.wav\"");
                if !complete {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                axum::Json(json!({
                    "durationMilliseconds": 21000,
                    "phrases": [
                        {"offsetMilliseconds": 9000, "text": "Mind the gap."},
                        {"offsetMilliseconds": 300, "text": "Next stop, Central."},
                        {"offsetMilliseconds": 17000, "text": "Doors closing."}
                    ]
                }))
                .into_response()
            }
            "/translate" => {
                let Ok(items) = serde_json::from_slice::<Vec<serde_json::Value>>(&body) else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                let translated = items
                    .iter()
                    .map(|item| {
                        let text = item["Text"].as_str().unwrap_or_default();
                        json!({ "translations": [{ "text": format!("[fr] {text}"), "to": "fr" }] })
                    })
                    .collect::<Vec<_>>();
                axum::Json(translated).into_response()
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn start_fake_azure() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, axum::Router::new().fallback(fake_azure)).await;
        });
        addr
    }

    #[tokio::test]
    async fn multi_phrase_chunk_reports_every_phrase() {
        let addr = start_fake_azure().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let chunk = dir.path().join("chunk_000.wav");
        std::fs::write(&chunk, b"RIFF____WAVE").expect("write chunk");

        let mut cfg = test_config(dir.path(), &chunk);
        cfg.azure.speech_endpoint = Some(format!("http://{addr}"));
        cfg.azure.translator_endpoint = format!("http://{addr}/");
        let translator = AzureSpeechTranslator::new(cfg.azure).expect("client");

        let mut session = translator.open_session(&chunk, "fr").await.expect("session");
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = session.recv().await {
                events.push(event);
            }
        })
        .await
        .expect("session finished");

        assert_eq!(
            events,
            [
                phrase("Next stop, Central.", Some("[fr] Next stop, Central.")),
                phrase("Mind the gap.", Some("[fr] Mind the gap.")),
                phrase("Doors closing.", Some("[fr] Doors closing.")),
                RecognitionEvent::SessionStopped,
            ]
        );
    }

    #[tokio::test]
    async fn service_error_cancels_session() {
        let addr = start_fake_azure().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let chunk = dir.path().join("chunk_000.wav");
        std::fs::write(&chunk, b"RIFF____WAVE").expect("write chunk");

        let mut cfg = test_config(dir.path(), &chunk);
        cfg.azure.speech_endpoint = Some(format!("http://{addr}/missing"));
        let translator = AzureSpeechTranslator::new(cfg.azure).expect("client");

        let mut session = translator.open_session(&chunk, "fr").await.expect("session");
        let event = tokio::time::timeout(Duration::from_secs(10), session.recv())
            .await
            .expect("event in time");
        assert!(matches!(
            event,
            Some(RecognitionEvent::Canceled { reason: CancellationReason::Error, ref details })
                if details.contains("404")
        ));
    }
}
