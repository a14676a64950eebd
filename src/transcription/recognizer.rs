//! # Shared Recognizer Handle
//!
//! The Whisper model is loaded exactly once at process start and shared
//! read-only by every request for the lifetime of the process. Candle's
//! decoder mutates its KV caches during a decode pass, so concurrent
//! invocations are serialized through a mutex held only around the decode
//! call, never around conversion or I/O.
//!
//! The HTTP layer depends on the [`SpeechRecognizer`] trait instead of the
//! concrete Whisper implementation, which keeps request handling decoupled
//! from inference code.

use anyhow::{anyhow, Result};
use candle_core::Device;
use std::sync::Mutex;

use crate::audio::processor;
use crate::transcription::model::{ModelSize, WhisperModel};

/// What the recognizer reports for one utterance.
#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    /// Transcript text, not yet trimmed or truncated
    pub text: String,
    /// Language hint passed through, or detected language, when known
    pub language: Option<String>,
    /// Total decoded audio duration in seconds
    pub duration_seconds: Option<f64>,
}

/// Contract the request handler programs against.
///
/// `transcribe` is blocking and CPU-bound; callers dispatch it onto a
/// worker thread (`web::block`) so the accept loop stays responsive.
pub trait SpeechRecognizer: Send + Sync {
    /// Name of the loaded variant, reported by the health endpoints.
    fn model_name(&self) -> &str;

    /// Run recognition on normalized 16 kHz mono samples.
    fn transcribe(
        &self,
        samples: &[f32],
        language_hint: Option<&str>,
    ) -> Result<RecognitionOutcome>;
}

/// Process-wide Whisper recognizer.
pub struct Recognizer {
    model: Mutex<WhisperModel>,
    model_name: String,
}

impl Recognizer {
    /// Load the configured model variant onto the CPU.
    ///
    /// Called once from `main` before the server starts accepting
    /// connections; a failure here aborts startup.
    pub async fn initialize(size: ModelSize) -> Result<Self> {
        let model = WhisperModel::load(size, Device::Cpu).await?;
        Ok(Self {
            model: Mutex::new(model),
            model_name: size.to_string(),
        })
    }
}

impl SpeechRecognizer for Recognizer {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn transcribe(
        &self,
        samples: &[f32],
        language_hint: Option<&str>,
    ) -> Result<RecognitionOutcome> {
        let duration = processor::duration_seconds(samples);

        let decoded = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("recognizer mutex poisoned"))?;
            model.transcribe(samples, language_hint)?
        };

        Ok(RecognitionOutcome {
            text: decoded.text,
            language: decoded.language,
            duration_seconds: Some(duration),
        })
    }
}
