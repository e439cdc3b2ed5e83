//! Upload handling: choosing the audio file a request works on and owning
//! the per-request files until the request finishes.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::audio::is_allowed_file;
use crate::config::AppConfig;
use crate::error::AppError;

const FALLBACK_UPLOAD_NAME: &str = "upload.wav";

/// Raw file part taken from the multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Where a request's audio came from.
#[derive(Debug)]
pub enum AudioSource {
    /// Upload stored for the duration of the request only.
    Transient(NamedTempFile),
    /// Upload kept on disk and served back under `public_url`.
    Persisted { path: PathBuf, public_url: String },
    /// The configured default recording. Never modified or removed.
    Fallback(PathBuf),
}

impl AudioSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Transient(file) => file.path(),
            Self::Persisted { path, .. } => path,
            Self::Fallback(path) => path,
        }
    }

    pub fn audio_url(&self) -> Option<&str> {
        match self {
            Self::Persisted { public_url, .. } => Some(public_url),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Makes an uploaded filename safe to use as a single path component.
///
/// Non-ASCII characters are dropped, whitespace runs and path separators
/// become `_`, and anything outside `[A-Za-z0-9_.-]` is removed. The result
/// always ends in `.wav`.
pub fn sanitize_filename(raw: &str) -> String {
    let ascii = raw
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect::<String>();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        FALLBACK_UPLOAD_NAME.to_string()
    } else if is_allowed_file(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.wav")
    }
}

/// Picks the audio file for a request.
///
/// An upload with an accepted extension is written into the uploads
/// directory under a unique name, whatever its content; unreadable audio
/// fails later, at chunking. Otherwise the default recording is
/// used when it exists. With neither available the request cannot proceed.
pub async fn resolve_audio(
    cfg: &AppConfig,
    upload: Option<UploadedFile>,
) -> Result<AudioSource, AppError> {
    match upload {
        Some(file) if is_allowed_file(&file.filename) => {
            return store_upload(cfg, file).await;
        }
        Some(file) if !file.filename.is_empty() => {
            warn!(
                filename = %file.filename,
                size = file.bytes.len(),
                "ignoring upload that is not a .wav file"
            );
        }
        _ => {}
    }

    let is_file = tokio::fs::metadata(&cfg.default_audio)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if is_file {
        info!(path = ?cfg.default_audio, "using default audio file");
        return Ok(AudioSource::Fallback(cfg.default_audio.clone()));
    }

    Err(AppError::no_audio_available(&cfg.default_audio_name()))
}

async fn store_upload(cfg: &AppConfig, file: UploadedFile) -> Result<AudioSource, AppError> {
    let upload_dir = cfg.upload_dir.clone();
    let persist = cfg.persist_uploads;
    let name = sanitize_filename(&file.filename);
    let size = file.bytes.len();

    let source = tokio::task::spawn_blocking(move || {
        write_upload(&upload_dir, &name, &file.bytes, persist)
    })
    .await
    .map_err(|err| AppError::internal(format!("upload write task failed: {err}")))??;

    info!(path = ?source.path(), size, persisted = persist, "stored uploaded audio");
    Ok(source)
}

fn write_upload(
    upload_dir: &Path,
    name: &str,
    bytes: &[u8],
    persist: bool,
) -> Result<AudioSource, AppError> {
    std::fs::create_dir_all(upload_dir).map_err(|err| {
        AppError::internal(format!(
            "failed to create upload directory {:?}: {err}",
            upload_dir
        ))
    })?;

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!("_{name}"))
        .tempfile_in(upload_dir)
        .map_err(|err| AppError::internal(format!("failed to create upload file: {err}")))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|err| AppError::internal(format!("failed to write upload file: {err}")))?;

    if !persist {
        return Ok(AudioSource::Transient(file));
    }

    let (_, path) = file
        .keep()
        .map_err(|err| AppError::internal(format!("failed to keep upload file: {err}")))?;
    let public_url = format!(
        "/uploads/{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    Ok(AudioSource::Persisted { path, public_url })
}

/// Per-request files that must not outlive the request.
///
/// [`RequestArtifacts::release`] removes everything held here off the async
/// worker threads. If the request is dropped or panics before that, `Drop`
/// removes whatever is left. Removal failures are logged and otherwise
/// ignored.
#[derive(Debug, Default)]
pub struct RequestArtifacts {
    upload: Option<NamedTempFile>,
    chunk_dir: Option<TempDir>,
}

impl RequestArtifacts {
    /// Takes ownership of the transient upload, if the source is one.
    ///
    /// Returns the path the workflow should read from along with the public
    /// URL of a persisted upload.
    pub fn adopt(&mut self, source: AudioSource) -> (PathBuf, Option<String>) {
        let path = source.path().to_path_buf();
        let url = source.audio_url().map(ToOwned::to_owned);
        if let AudioSource::Transient(file) = source {
            self.upload = Some(file);
        }
        (path, url)
    }

    /// Creates a fresh, uniquely named chunk directory under `root`.
    pub async fn create_chunk_dir(&mut self, root: &Path) -> Result<PathBuf, AppError> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || make_chunk_dir(&root))
            .await
            .map_err(|err| AppError::chunking(format!("chunk directory task failed: {err}")))??;
        let path = dir.path().to_path_buf();
        self.chunk_dir = Some(dir);
        Ok(path)
    }

    /// Removes the chunk directory and the transient upload.
    pub async fn release(mut self) {
        let chunk_dir = self.chunk_dir.take();
        let upload = self.upload.take();
        if chunk_dir.is_none() && upload.is_none() {
            return;
        }
        if let Err(err) =
            tokio::task::spawn_blocking(move || remove_artifacts(chunk_dir, upload)).await
        {
            warn!(error = %err, "request cleanup task failed");
        }
    }
}

fn make_chunk_dir(root: &Path) -> Result<TempDir, AppError> {
    std::fs::create_dir_all(root).map_err(|err| {
        AppError::chunking(format!("failed to create chunk root {:?}: {err}", root))
    })?;
    tempfile::Builder::new()
        .prefix("chunks-")
        .tempdir_in(root)
        .map_err(|err| AppError::chunking(format!("failed to create chunk directory: {err}")))
}

fn remove_artifacts(chunk_dir: Option<TempDir>, upload: Option<NamedTempFile>) {
    if let Some(dir) = chunk_dir {
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(path = ?path, "removed chunk directory"),
            Err(err) => warn!(path = ?path, error = %err, "failed to remove chunk directory"),
        }
    }
    if let Some(file) = upload {
        let path = file.path().to_path_buf();
        match file.close() {
            Ok(()) => debug!(path = ?path, "removed uploaded file"),
            Err(err) => warn!(path = ?path, error = %err, "failed to remove uploaded file"),
        }
    }
}

impl Drop for RequestArtifacts {
    fn drop(&mut self) {
        remove_artifacts(self.chunk_dir.take(), self.upload.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_silent_wav;
    use crate::config::test_config;

    fn wav_upload(name: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            bytes: b"RIFF____WAVE".to_vec(),
        }
    }

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("speech_en.wav"), "speech_en.wav");
        assert_eq!(sanitize_filename("../../etc/passwd.wav"), "etc_passwd.wav");
        assert_eq!(sanitize_filename("my talk (final).WAV"), "my_talk_final.WAV");
        assert_eq!(sanitize_filename("C:\\Users\\me\\rec.wav"), "C_Users_me_rec.wav");
    }

    #[test]
    fn sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize_filename("..."), "upload.wav");
        assert_eq!(sanitize_filename("日本語"), "upload.wav");
        assert_eq!(sanitize_filename("日本.wav"), "wav.wav");
    }

    #[tokio::test]
    async fn transient_upload_is_removed_with_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir.path().join("uploads"), &dir.path().join("missing.wav"));

        let source = resolve_audio(&cfg, Some(wav_upload("speech_en.wav")))
            .await
            .expect("resolved");
        assert!(matches!(source, AudioSource::Transient(_)));
        assert!(source.audio_url().is_none());

        let mut artifacts = RequestArtifacts::default();
        let (path, url) = artifacts.adopt(source);
        assert!(url.is_none());
        assert!(path.starts_with(&cfg.upload_dir));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("upload-") && n.ends_with("_speech_en.wav")));
        assert_eq!(std::fs::read(&path).expect("read"), b"RIFF____WAVE");

        let chunk_dir = artifacts
            .create_chunk_dir(&cfg.chunk_root())
            .await
            .expect("chunk dir");
        std::fs::write(chunk_dir.join("chunk_000.wav"), b"x").expect("write chunk");

        artifacts.release().await;
        assert!(!path.exists());
        assert!(!chunk_dir.exists());
    }

    #[tokio::test]
    async fn dropped_artifacts_still_clean_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir.path().join("uploads"), &dir.path().join("missing.wav"));

        let source = resolve_audio(&cfg, Some(wav_upload("speech_en.wav")))
            .await
            .expect("resolved");
        let mut artifacts = RequestArtifacts::default();
        let (path, _) = artifacts.adopt(source);
        let chunk_dir = artifacts
            .create_chunk_dir(&cfg.chunk_root())
            .await
            .expect("chunk dir");

        drop(artifacts);
        assert!(!path.exists());
        assert!(!chunk_dir.exists());
    }

    #[tokio::test]
    async fn persisted_upload_survives_and_has_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = test_config(&dir.path().join("uploads"), &dir.path().join("missing.wav"));
        cfg.persist_uploads = true;

        let source = resolve_audio(&cfg, Some(wav_upload("talk.wav")))
            .await
            .expect("resolved");
        let url = source.audio_url().expect("url").to_string();
        assert!(url.starts_with("/uploads/upload-"));

        let mut artifacts = RequestArtifacts::default();
        let (path, _) = artifacts.adopt(source);
        artifacts.release().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn invalid_extension_uses_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fallback = dir.path().join("station.wav");
        write_silent_wav(&fallback, 16_000, 1);
        let cfg = test_config(&dir.path().join("uploads"), &fallback);

        let source = resolve_audio(&cfg, Some(wav_upload("song.mp3")))
            .await
            .expect("resolved");
        assert!(source.is_fallback());
        assert_eq!(source.path(), fallback.as_path());

        let mut artifacts = RequestArtifacts::default();
        let (path, _) = artifacts.adopt(source);
        artifacts.release().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn empty_wav_upload_is_stored_not_replaced_by_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fallback = dir.path().join("station.wav");
        write_silent_wav(&fallback, 16_000, 1);
        let cfg = test_config(&dir.path().join("uploads"), &fallback);

        let upload = UploadedFile {
            filename: "speech.wav".to_string(),
            bytes: Vec::new(),
        };
        let source = resolve_audio(&cfg, Some(upload)).await.expect("resolved");
        assert!(matches!(source, AudioSource::Transient(_)));
        assert!(source.path().starts_with(&cfg.upload_dir));
        assert_eq!(std::fs::metadata(source.path()).expect("stat").len(), 0);
    }

    #[tokio::test]
    async fn no_upload_and_no_fallback_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir.path().join("uploads"), &dir.path().join("station.wav"));

        let err = resolve_audio(&cfg, None).await.expect_err("no audio");
        assert!(matches!(err, AppError::NoAudioAvailable(_)));
        assert!(err.to_string().contains("station.wav"));
    }

    #[tokio::test]
    async fn fallback_directory_does_not_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir.path().join("uploads"), dir.path());

        assert!(resolve_audio(&cfg, None).await.is_err());
    }
}
