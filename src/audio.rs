//! Audio file validation and header probing.
//!
//! Uploads are accepted by file extension only; the container is never
//! sniffed at upload time. Probing happens later, right before chunking, and
//! only feeds logging and sanity checks.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;

use crate::error::AppError;

/// File extensions accepted by upload validation.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav"];

/// Returns true when `filename` ends in an accepted extension, ignoring case.
pub fn is_allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .map(|ext| SUPPORTED_EXTENSIONS.iter().any(|allowed| *allowed == ext))
        .unwrap_or(false)
}

/// Stream parameters read from a WAV header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: u64,
}

impl WavInfo {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    /// Number of segments a split at `chunk_seconds` should produce.
    pub fn expected_chunks(&self, chunk_seconds: u64) -> usize {
        let frames_per_chunk = chunk_seconds.saturating_mul(self.sample_rate as u64);
        if frames_per_chunk == 0 || self.frames == 0 {
            return 1;
        }
        self.frames.div_ceil(frames_per_chunk) as usize
    }
}

/// Reads sample rate, channel count, and frame count from a WAV file.
pub fn probe_wav(path: &Path) -> Result<WavInfo, AppError> {
    let file = File::open(path)
        .map_err(|err| AppError::chunking(format!("failed to open audio file {:?}: {err}", path)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("wav");

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AppError::chunking(format!("not a readable WAV file: {err}")))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| AppError::chunking("no audio track found in WAV file"))?;
    let params = &track.codec_params;

    Ok(WavInfo {
        sample_rate: params.sample_rate.unwrap_or(0),
        channels: params.channels.map(|c| c.count()).unwrap_or(0),
        frames: params.n_frames.unwrap_or(0),
    })
}

/// Writes a 16-bit PCM WAV of silence, for tests that need real audio files.
#[cfg(test)]
pub(crate) fn write_silent_wav(path: &Path, sample_rate: u32, seconds: u32) {
    use std::io::Write;

    let channels: u16 = 1;
    let bits: u16 = 16;
    let block_align = channels * bits / 8;
    let data_len = sample_rate * seconds * block_align as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);

    let mut file = File::create(path).expect("create wav");
    file.write_all(&out).expect("write wav");
}
