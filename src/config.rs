//! Configuration loading from environment variables.
//!
//! Values are validated early so startup fails fast with actionable errors.
//! Service credentials are optional here: when they are missing the server
//! still starts, and every translation attempt reports an authentication
//! error instead.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_CHUNK_SECONDS: u64 = 60;
pub const MAX_CHUNK_SECONDS: u64 = 600;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 120;
pub const MAX_CHUNK_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_TRANSLATOR_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com";

/// Credentials and endpoints for the cloud speech-translation service.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Subscription key (`COG_SERVICE_KEY`).
    pub key: Option<String>,
    /// Service region such as `westeurope` (`COG_SERVICE_REGION`).
    pub region: Option<String>,
    /// Recognition locale of the uploaded speech, for example `en-US`.
    pub source_language: String,
    /// Explicit speech service base URL; derived from `region` when unset.
    pub speech_endpoint: Option<String>,
    /// Base URL of the text translation API.
    pub translator_endpoint: String,
}

impl AzureConfig {
    /// Returns the fast transcription URL, if enough is configured to build one.
    pub fn transcription_url(&self) -> Option<String> {
        let base = match (&self.speech_endpoint, &self.region) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(region)) => format!("https://{region}.api.cognitive.microsoft.com"),
            (None, None) => return None,
        };
        Some(format!("{base}/speechtotext/transcriptions:transcribe"))
    }

    /// Primary language subtag of the recognition locale (`en-US` -> `en`).
    pub fn source_text_language(&self) -> &str {
        self.source_language
            .split(['-', '_'])
            .next()
            .unwrap_or(&self.source_language)
    }
}

/// Runtime configuration for the HTTP server, workflow, and backend.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    pub azure: AzureConfig,
    /// Directory receiving uploads; chunk directories live under `chunks/`.
    pub upload_dir: PathBuf,
    /// Recording used when a request carries no usable upload.
    pub default_audio: PathBuf,
    /// Keeps uploads on disk and links them from the result page.
    pub persist_uploads: bool,
    /// Nominal length of each chunk.
    pub chunk_seconds: u64,
    /// Deadline for one chunk's recognition session.
    pub chunk_timeout: Duration,
    /// Media tool used for segmentation.
    pub ffmpeg_bin: String,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `5000`)
    /// - `COG_SERVICE_KEY`, `COG_SERVICE_REGION` (service credentials)
    /// - `SOURCE_LANGUAGE` (default `en-US`)
    /// - `SPEECH_ENDPOINT` (optional speech service base URL override)
    /// - `TRANSLATOR_ENDPOINT` (default `https://api.cognitive.microsofttranslator.com`)
    /// - `UPLOAD_DIR` (default `uploads`)
    /// - `DEFAULT_AUDIO` (default `station.wav`)
    /// - `PERSIST_UPLOADS` (default `false`)
    /// - `CHUNK_SECONDS` (default `60`, min `1`, max `600`)
    /// - `CHUNK_TIMEOUT_SECS` (default `120`, min `1`, max `3600`)
    /// - `FFMPEG_BIN` (default `ffmpeg`)
    /// - `MAX_UPLOAD_BYTES` (default 100 MiB)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 5000)?;

        let azure = AzureConfig {
            key: env_opt("COG_SERVICE_KEY"),
            region: env_opt("COG_SERVICE_REGION"),
            source_language: env_str("SOURCE_LANGUAGE", "en-US"),
            speech_endpoint: env_opt("SPEECH_ENDPOINT"),
            translator_endpoint: env_str("TRANSLATOR_ENDPOINT", DEFAULT_TRANSLATOR_ENDPOINT),
        };

        let chunk_seconds = env_u64_bounded(
            "CHUNK_SECONDS",
            DEFAULT_CHUNK_SECONDS,
            1,
            MAX_CHUNK_SECONDS,
        )?;
        let chunk_timeout_secs = env_u64_bounded(
            "CHUNK_TIMEOUT_SECS",
            DEFAULT_CHUNK_TIMEOUT_SECS,
            1,
            MAX_CHUNK_TIMEOUT_SECS,
        )?;
        let max_upload_bytes = env_u64_bounded(
            "MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES as u64,
            1024,
            u32::MAX as u64,
        )? as usize;

        Ok(Self {
            host,
            port,
            azure,
            upload_dir: PathBuf::from(env_str("UPLOAD_DIR", "uploads")),
            default_audio: PathBuf::from(env_str("DEFAULT_AUDIO", "station.wav")),
            persist_uploads: env_bool("PERSIST_UPLOADS", false)?,
            chunk_seconds,
            chunk_timeout: Duration::from_secs(chunk_timeout_secs),
            ffmpeg_bin: env_str("FFMPEG_BIN", "ffmpeg"),
            max_upload_bytes,
        })
    }

    /// Parent directory of the per-request chunk directories.
    pub fn chunk_root(&self) -> PathBuf {
        self.upload_dir.join("chunks")
    }

    /// Display form of the fallback file used in user-facing messages.
    pub fn default_audio_name(&self) -> String {
        self.default_audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.default_audio.display().to_string())
    }

    /// Creates the uploads and chunk root directories.
    pub fn ensure_dirs(&self) -> Result<(), AppError> {
        create_dir(&self.upload_dir)?;
        create_dir(&self.chunk_root())
    }
}

fn create_dir(path: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(path).map_err(|err| {
        AppError::internal(format!("failed to create directory {:?}: {err}", path))
    })
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_bool(name: &str, default: bool) -> Result<bool, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_bool(name, &raw)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn env_u64_bounded(name: &str, default: u64, min: u64, max: u64) -> Result<u64, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_u64_bounded(name, &raw, min, max)
}

fn parse_u64_bounded(name: &str, raw: &str, min: u64, max: u64) -> Result<u64, AppError> {
    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
pub(crate) fn test_config(upload_dir: &Path, default_audio: &Path) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 5000,
        azure: AzureConfig {
            key: Some("test-key".to_string()),
            region: Some("westeurope".to_string()),
            source_language: "en-US".to_string(),
            speech_endpoint: None,
            translator_endpoint: DEFAULT_TRANSLATOR_ENDPOINT.to_string(),
        },
        upload_dir: upload_dir.to_path_buf(),
        default_audio: default_audio.to_path_buf(),
        persist_uploads: false,
        chunk_seconds: DEFAULT_CHUNK_SECONDS,
        chunk_timeout: Duration::from_secs(5),
        ffmpeg_bin: "ffmpeg".to_string(),
        max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
    }
}
