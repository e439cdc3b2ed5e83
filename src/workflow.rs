//! The per-request translation workflow.
//!
//! resolve audio -> split into chunks -> translate each chunk in order ->
//! aggregate -> release per-request files. Any failure after the audio is
//! resolved is reported as an `(Error)` result instead of an HTTP error.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{CancellationReason, RecognitionEvent, SpeechTranslator};
use crate::chunker::{AudioChunk, AudioSplitter};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::languages::display_name;
use crate::upload::{resolve_audio, RequestArtifacts, UploadedFile};

/// Placeholder for speech that was recognized but not translated.
pub const NO_TRANSLATION: &str = "(No translation)";
/// Recognized-text value shown when a request fails.
pub const ERROR_MARKER: &str = "(Error)";

/// Recognized and translated text for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTranslation {
    pub recognized: String,
    pub translated: String,
}

/// Result shown to the user for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationOutcome {
    /// Display name of the target language.
    pub language: String,
    pub recognized: String,
    pub translated: String,
    /// Playable copy of the upload, when uploads are kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl TranslationOutcome {
    fn failed(target_language: &str, err: &AppError) -> Self {
        Self {
            language: display_name(target_language).to_string(),
            recognized: ERROR_MARKER.to_string(),
            translated: err.to_string(),
            audio_url: None,
        }
    }
}

/// Collects the phrases of one chunk's session.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    recognized: Vec<String>,
    translated: Vec<String>,
}

impl ChunkAccumulator {
    /// Records a recognition event; non-phrase events are ignored.
    pub fn push(&mut self, event: &RecognitionEvent) {
        let RecognitionEvent::Recognized { text, translation } = event else {
            return;
        };
        if text.is_empty() {
            return;
        }
        self.recognized.push(text.clone());
        match translation.as_deref() {
            Some(translated) if !translated.is_empty() => {
                self.translated.push(translated.to_string())
            }
            _ => self.translated.push(NO_TRANSLATION.to_string()),
        }
    }

    pub fn finish(self) -> ChunkTranslation {
        ChunkTranslation {
            recognized: self.recognized.join(" "),
            translated: self.translated.join(" "),
        }
    }
}

/// Runs one chunk through the translator and waits for its session to end.
///
/// The wait is bounded by `deadline`; a session that neither stops nor
/// cancels in time fails the chunk.
pub async fn translate_chunk(
    translator: &dyn SpeechTranslator,
    chunk: &AudioChunk,
    target_language: &str,
    deadline: Duration,
) -> Result<ChunkTranslation, AppError> {
    let mut session = translator.open_session(&chunk.path, target_language).await?;
    let mut acc = ChunkAccumulator::default();

    let drained = tokio::time::timeout(deadline, async {
        loop {
            match session.recv().await {
                Some(RecognitionEvent::SessionStopped)
                | Some(RecognitionEvent::Canceled {
                    reason: CancellationReason::EndOfStream,
                    ..
                }) => return Ok(()),
                Some(RecognitionEvent::Canceled {
                    reason: CancellationReason::Error,
                    details,
                }) => return Err(AppError::translation(details)),
                Some(event) => acc.push(&event),
                None => {
                    return Err(AppError::translation(
                        "translation session ended without a stop signal",
                    ))
                }
            }
        }
    })
    .await;

    match drained {
        Ok(Ok(())) => Ok(acc.finish()),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AppError::translation(format!(
            "translation of {} timed out after {}s",
            chunk.file_name(),
            deadline.as_secs()
        ))),
    }
}

/// Joins per-chunk results in order with single spaces and trims the ends.
pub fn aggregate(chunks: &[ChunkTranslation]) -> ChunkTranslation {
    let recognized = chunks
        .iter()
        .map(|c| c.recognized.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let translated = chunks
        .iter()
        .map(|c| c.translated.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    ChunkTranslation {
        recognized: recognized.trim().to_string(),
        translated: translated.trim().to_string(),
    }
}

/// Processes one form submission end to end.
pub async fn process_request(
    cfg: &AppConfig,
    splitter: &dyn AudioSplitter,
    translator: &dyn SpeechTranslator,
    target_language: &str,
    upload: Option<UploadedFile>,
) -> TranslationOutcome {
    let source = match resolve_audio(cfg, upload).await {
        Ok(source) => source,
        Err(err) => {
            warn!(error = %err, "no audio available for request");
            return TranslationOutcome::failed(target_language, &err);
        }
    };

    info!(
        path = ?source.path(),
        fallback = source.is_fallback(),
        target = %target_language,
        "resolved request audio"
    );
    let mut artifacts = RequestArtifacts::default();
    let (audio_path, audio_url) = artifacts.adopt(source);

    let result = run_chunks(
        cfg,
        splitter,
        translator,
        &mut artifacts,
        &audio_path,
        target_language,
    )
    .await;
    artifacts.release().await;

    match result {
        Ok(text) => TranslationOutcome {
            language: display_name(target_language).to_string(),
            recognized: text.recognized,
            translated: text.translated,
            audio_url,
        },
        Err(err) => {
            error!(error = %err, target = %target_language, "translation request failed");
            TranslationOutcome {
                audio_url,
                ..TranslationOutcome::failed(target_language, &err)
            }
        }
    }
}

async fn run_chunks(
    cfg: &AppConfig,
    splitter: &dyn AudioSplitter,
    translator: &dyn SpeechTranslator,
    artifacts: &mut RequestArtifacts,
    audio_path: &Path,
    target_language: &str,
) -> Result<ChunkTranslation, AppError> {
    let chunk_dir = artifacts.create_chunk_dir(&cfg.chunk_root()).await?;
    let chunks = splitter.split(audio_path, &chunk_dir).await?;
    if chunks.is_empty() {
        return Err(AppError::chunking("audio chunking produced no chunks"));
    }
    info!(
        source = ?audio_path,
        chunks = chunks.len(),
        target = %target_language,
        "translating audio"
    );

    let mut results = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let result = translate_chunk(translator, chunk, target_language, cfg.chunk_timeout).await?;
        info!(
            chunk = %chunk.file_name(),
            index = chunk.index,
            recognized_chars = result.recognized.len(),
            "translated chunk"
        );
        results.push(result);
    }

    Ok(aggregate(&results))
}
