//! Backend abstraction for the cloud speech-translation service.
//!
//! The workflow depends on the [`SpeechTranslator`] trait instead of a
//! concrete client. A translator opens a [`TranslationSession`] per chunk:
//! a finite stream of [`RecognitionEvent`]s ending in either
//! [`RecognitionEvent::SessionStopped`] or [`RecognitionEvent::Canceled`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::error::AppError;

pub mod azure;

/// Why a session was canceled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CancellationReason {
    /// The audio ran out; equivalent to a normal stop.
    EndOfStream,
    /// The service or transport failed.
    Error,
}

/// One notification from a running recognition session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RecognitionEvent {
    /// A phrase was recognized. `translation` is `None` when the service had
    /// no rendering for the requested target language.
    Recognized {
        text: String,
        translation: Option<String>,
    },
    /// Audio was processed but no speech was found.
    NoMatch,
    /// The session finished normally.
    SessionStopped,
    Canceled {
        reason: CancellationReason,
        details: String,
    },
}

/// Receiving end of a recognition session.
///
/// Dropping the session stops the task producing its events.
pub struct TranslationSession {
    events: mpsc::Receiver<RecognitionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl TranslationSession {
    /// Creates a session fed by `events`, optionally owning its producer task.
    pub fn new(events: mpsc::Receiver<RecognitionEvent>, worker: Option<JoinHandle<()>>) -> Self {
        Self { events, worker }
    }

    /// Waits for the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }
}

impl Drop for TranslationSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Backend contract implemented by speech-translation services.
#[async_trait]
pub trait SpeechTranslator: Send + Sync {
    /// Starts recognizing `audio` and translating it into `target_language`.
    async fn open_session(
        &self,
        audio: &Path,
        target_language: &str,
    ) -> Result<TranslationSession, AppError>;
}

/// Builds the configured translator implementation.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn SpeechTranslator>, AppError> {
    Ok(Arc::new(azure::AzureSpeechTranslator::new(cfg.azure.clone())?))
}
