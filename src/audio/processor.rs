//! # Waveform Loading
//!
//! Reads the converter's normalized WAV output into the sample format the
//! recognizer consumes: 32-bit floats in [-1.0, 1.0] at 16 kHz mono.
//!
//! ## Validation:
//! The converter is trusted to produce the right rate and channel count
//! (it is told to), but the header is still checked so a misbehaving
//! converter fails here with a clear message instead of producing garbage
//! transcripts downstream.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::path::Path;

use crate::audio::convert::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};

/// Load a normalized WAV file as f32 samples.
///
/// ## Requirements on the input file:
/// - Sample rate: 16kHz
/// - Channels: mono
/// - Encoding: 16-bit signed PCM or 32-bit float
pub fn load_wav_samples(path: &Path) -> Result<Vec<f32>> {
    let mut file = File::open(path)
        .map_err(|e| anyhow!("cannot open waveform {:?}: {}", path, e))?;

    let (header, data) = wav::read(&mut file)
        .map_err(|e| anyhow!("cannot parse waveform {:?}: {}", path, e))?;

    if header.sampling_rate != TARGET_SAMPLE_RATE {
        return Err(anyhow!(
            "unexpected sample rate: {} (expected {})",
            header.sampling_rate,
            TARGET_SAMPLE_RATE
        ));
    }

    if header.channel_count != TARGET_CHANNELS as u16 {
        return Err(anyhow!(
            "unexpected channel count: {} (expected {})",
            header.channel_count,
            TARGET_CHANNELS
        ));
    }

    let samples = match data {
        wav::BitDepth::Sixteen(pcm) => pcm_to_float(&pcm),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        other => {
            return Err(anyhow!(
                "unsupported bit depth in waveform {:?}: {:?}",
                path,
                other
            ))
        }
    };

    if samples.is_empty() {
        return Err(anyhow!("waveform {:?} contains no samples", path));
    }

    Ok(samples)
}

/// Convert 16-bit PCM samples to 32-bit float format for the model.
///
/// Scales from [-32768, 32767] to [-1.0, 1.0].
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Convert 32-bit float samples back to 16-bit PCM format.
///
/// Used when writing waveform fixtures and any future path that needs to
/// re-emit normalized audio.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Duration in seconds represented by a 16 kHz sample buffer.
pub fn duration_seconds(samples: &[f32]) -> f64 {
    samples.len() as f64 / TARGET_SAMPLE_RATE as f64
}
