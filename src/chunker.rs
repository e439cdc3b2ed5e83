//! Splitting one recording into fixed-length chunk files.
//!
//! Segmentation is delegated to `ffmpeg`'s segment muxer with stream copy, so
//! boundaries land on container frames rather than exact timestamps.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::audio::probe_wav;
use crate::config::AppConfig;
use crate::error::AppError;

/// Output name pattern; zero padding keeps name order chronological.
pub const CHUNK_PATTERN: &str = "chunk_%03d.wav";

const STDERR_TAIL_CHARS: usize = 400;

/// One segment of the source recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position of the chunk in the source, starting at zero.
    pub index: usize,
    pub path: PathBuf,
}

impl AudioChunk {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Contract for turning a source file into ordered chunk files.
#[async_trait]
pub trait AudioSplitter: Send + Sync {
    /// Writes chunks of `source` into `out_dir` and returns them in order.
    async fn split(&self, source: &Path, out_dir: &Path) -> Result<Vec<AudioChunk>, AppError>;
}

/// Splitter backed by the `ffmpeg` command-line tool.
pub struct FfmpegSplitter {
    program: String,
    chunk_seconds: u64,
}

impl FfmpegSplitter {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            program: cfg.ffmpeg_bin.clone(),
            chunk_seconds: cfg.chunk_seconds,
        }
    }

    fn args(&self, source: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            self.chunk_seconds.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            out_dir.join(CHUNK_PATTERN).to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl AudioSplitter for FfmpegSplitter {
    async fn split(&self, source: &Path, out_dir: &Path) -> Result<Vec<AudioChunk>, AppError> {
        let probe_path = source.to_path_buf();
        let expected = match tokio::task::spawn_blocking(move || probe_wav(&probe_path)).await {
            Ok(Ok(info)) => {
                info!(
                    source = ?source,
                    duration_secs = info.duration().as_secs_f64(),
                    sample_rate = info.sample_rate,
                    channels = info.channels,
                    "probed source audio"
                );
                Some(info.expected_chunks(self.chunk_seconds))
            }
            Ok(Err(err)) => {
                warn!(source = ?source, error = %err, "could not probe source audio");
                None
            }
            Err(err) => {
                warn!(error = %err, "audio probe task failed");
                None
            }
        };

        tokio::fs::create_dir_all(out_dir).await.map_err(|err| {
            AppError::chunking(format!("failed to create chunk directory {:?}: {err}", out_dir))
        })?;

        let output = Command::new(&self.program)
            .args(self.args(source, out_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                AppError::chunking(format!("failed to run {}: {err}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                status = %output.status,
                stderr = %tail(stderr.trim(), STDERR_TAIL_CHARS),
                "audio segmentation failed"
            );
            return Err(AppError::chunking(format!(
                "audio chunking failed: {} exited with {}",
                self.program, output.status
            )));
        }

        let chunks = list_chunks(out_dir).await?;
        if chunks.is_empty() {
            return Err(AppError::chunking("audio chunking produced no chunks"));
        }
        if let Some(expected) = expected.filter(|n| *n != chunks.len()) {
            warn!(
                expected,
                produced = chunks.len(),
                "chunk count differs from probed duration"
            );
        }
        debug!(count = chunks.len(), dir = ?out_dir, "split audio into chunks");
        Ok(chunks)
    }
}

/// Lists `.wav` files in `dir`, ordered by file name.
pub async fn list_chunks(dir: &Path) -> Result<Vec<AudioChunk>, AppError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| {
        AppError::chunking(format!("failed to read chunk directory {:?}: {err}", dir))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|err| {
        AppError::chunking(format!("failed to read chunk directory {:?}: {err}", dir))
    })? {
        let path = entry.path();
        let is_wav = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".wav"));
        if is_wav {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| AudioChunk { index, path })
        .collect())
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_silent_wav;
    use crate::config::test_config;

    #[tokio::test]
    async fn list_chunks_sorts_by_name_and_skips_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["chunk_010.wav", "chunk_002.wav", "notes.txt", "chunk_000.wav"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }

        let chunks = list_chunks(dir.path()).await.expect("list");
        let names = chunks.iter().map(AudioChunk::file_name).collect::<Vec<_>>();
        assert_eq!(names, ["chunk_000.wav", "chunk_002.wav", "chunk_010.wav"]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[tokio::test]
    async fn list_chunks_fails_for_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = list_chunks(&dir.path().join("nope")).await.expect_err("missing");
        assert!(matches!(err, AppError::Chunking(_)));
    }

    #[test]
    fn ffmpeg_args_use_stream_copy_segments() {
        let cfg = test_config(Path::new("uploads"), Path::new("station.wav"));
        let splitter = FfmpegSplitter::new(&cfg);
        let args = splitter.args(Path::new("in.wav"), Path::new("out"));

        let window = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };
        assert_eq!(window("-i").as_deref(), Some("in.wav"));
        assert_eq!(window("-f").as_deref(), Some("segment"));
        assert_eq!(window("-segment_time").as_deref(), Some("60"));
        assert_eq!(window("-c").as_deref(), Some("copy"));
        assert_eq!(
            args.last().map(String::as_str),
            Some(Path::new("out").join("chunk_%03d.wav").to_str().expect("utf8 path"))
        );
    }

    #[test]
    fn tail_keeps_last_characters() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn missing_program_is_a_chunking_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("in.wav");
        write_silent_wav(&source, 16_000, 1);

        let mut cfg = test_config(dir.path(), &source);
        cfg.ffmpeg_bin = "definitely-not-a-real-ffmpeg".to_string();
        let err = FfmpegSplitter::new(&cfg)
            .split(&source, &dir.path().join("chunks"))
            .await
            .expect_err("spawn failure");
        assert!(matches!(err, AppError::Chunking(_)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn short_input_yields_single_chunk_of_same_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("short.wav");
        write_silent_wav(&source, 16_000, 5);

        let cfg = test_config(dir.path(), &source);
        let out = dir.path().join("chunks");
        let chunks = FfmpegSplitter::new(&cfg)
            .split(&source, &out)
            .await
            .expect("split");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_name(), "chunk_000.wav");
        let original = probe_wav(&source).expect("probe source");
        let chunk = probe_wav(&chunks[0].path).expect("probe chunk");
        assert_eq!(chunk.frames, original.frames);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn long_input_chunks_cover_whole_duration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("long.wav");
        write_silent_wav(&source, 8_000, 90);

        let cfg = test_config(dir.path(), &source);
        let chunks = FfmpegSplitter::new(&cfg)
            .split(&source, &dir.path().join("chunks"))
            .await
            .expect("split");

        assert_eq!(chunks.len(), 2);
        let total = chunks
            .iter()
            .map(|c| probe_wav(&c.path).expect("probe chunk").frames)
            .sum::<u64>();
        let original = probe_wav(&source).expect("probe source").frames;
        assert!(
            total.abs_diff(original) <= 1,
            "chunks hold {total} frames, source holds {original}"
        );
    }
}
