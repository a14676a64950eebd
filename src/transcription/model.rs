//! # Whisper Model
//!
//! Loads a Whisper variant from HuggingFace and runs encode/decode on it
//! using Candle-rs.
//!
//! ## Model Loading Process:
//! 1. Download model files from HuggingFace (cached locally by hf-hub)
//! 2. Load tokenizer and model configuration
//! 3. Build the mel filter bank for audio preprocessing
//! 4. Load weights onto the CPU with f32 dtype
//!
//! ## Decoding:
//! Greedy decoding with a temperature-fallback ladder and a repetition
//! guard. When no language hint is supplied, the language is detected from
//! the decoder's language-token logits on the first step.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

/// Available Whisper model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace model repository for this variant.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate on-disk size, for startup logging.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Languages the detector can report, as (ISO code, special-token text).
///
/// Multilingual Whisper tokenizers carry one token per supported language;
/// detection reduces to an argmax over these tokens' logits. The table
/// covers the languages the service is expected to see; anything else
/// decodes fine with a caller-supplied hint.
const LANGUAGES: &[(&str, &str)] = &[
    ("en", "<|en|>"),
    ("zh", "<|zh|>"),
    ("de", "<|de|>"),
    ("es", "<|es|>"),
    ("ru", "<|ru|>"),
    ("ko", "<|ko|>"),
    ("fr", "<|fr|>"),
    ("ja", "<|ja|>"),
    ("pt", "<|pt|>"),
    ("it", "<|it|>"),
    ("nl", "<|nl|>"),
    ("ar", "<|ar|>"),
    ("hi", "<|hi|>"),
    ("tr", "<|tr|>"),
    ("pl", "<|pl|>"),
    ("uk", "<|uk|>"),
];

/// Maximum number of samples fed to one encoder pass (30 seconds at 16 kHz).
const MAX_SAMPLES: usize = 30 * 16_000;

/// Decode budget per attempt, half the decoder context as in the reference
/// Whisper setup.
const MAX_DECODE_TOKENS: usize = 224;

/// Temperature ladder for decode retries.
const TEMPERATURES: &[f32] = &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Raw decode result before response shaping.
#[derive(Debug, Clone)]
pub struct DecodedUtterance {
    /// Transcript text with special tokens stripped
    pub text: String,
    /// Language the decode ran with (hint or detected), if known
    pub language: Option<String>,
}

/// A loaded Whisper model ready for transcription.
///
/// Decoding mutates the model's KV caches, so `transcribe` takes `&mut
/// self`; callers share the model behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    sot_token: u32,
    eot_token: u32,
    transcribe_token: u32,
    no_timestamps_token: u32,
}

impl WhisperModel {
    /// Download (if needed) and load a Whisper variant.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!(
            "Loading Whisper {} model (~{}MB)...",
            size,
            size.size_mb()
        );
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder.build()?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(config.num_mel_bins as usize);

        // f32 weights on the CPU; no half-precision path
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let sot_token = special_token(&tokenizer, m::SOT_TOKEN)?;
        let eot_token = special_token(&tokenizer, m::EOT_TOKEN)?;
        let transcribe_token = special_token(&tokenizer, m::TRANSCRIBE_TOKEN)?;
        let no_timestamps_token = special_token(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?;

        let load_time = start_time.elapsed();
        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            load_time.as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            size,
            tokenizer,
            mel_filters,
            sot_token,
            eot_token,
            transcribe_token,
            no_timestamps_token,
        })
    }

    /// The variant this model was loaded from.
    pub fn size(&self) -> ModelSize {
        self.size
    }

    /// Transcribe 16 kHz mono f32 samples.
    ///
    /// ## Parameters:
    /// - **samples**: range [-1.0, 1.0]; at most 30 seconds is decoded,
    ///   longer input is truncated with a warning
    /// - **language_hint**: ISO-like code; when absent, language is detected
    ///   from the first decoder step
    pub fn transcribe(
        &mut self,
        samples: &[f32],
        language_hint: Option<&str>,
    ) -> Result<DecodedUtterance> {
        if samples.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        if samples.len() > MAX_SAMPLES {
            tracing::warn!(
                "Audio is {:.1}s, decoding the first 30s only",
                samples.len() as f64 / 16_000.0
            );
        }

        let mut padded = vec![0.0f32; MAX_SAMPLES];
        let copy_len = samples.len().min(MAX_SAMPLES);
        padded[..copy_len].copy_from_slice(&samples[..copy_len]);

        let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let mel_len = mel.len();
        let n_mels = self.config.num_mel_bins as usize;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;

        let encoder_output = self.model.encoder.forward(&mel, true)?;

        // Resolve the language up front so the decode prefix is stable
        let language = match language_hint {
            Some(hint) => Some(hint.to_string()),
            None => self.detect_language(&encoder_output)?,
        };
        let language_token = language
            .as_deref()
            .and_then(|code| self.language_token(code));

        let mut prefix = vec![self.sot_token];
        if let Some(token) = language_token {
            prefix.push(token);
        }
        prefix.push(self.transcribe_token);
        prefix.push(self.no_timestamps_token);

        let mut output_tokens = Vec::new();

        for &temperature in TEMPERATURES {
            output_tokens.clear();
            match self.decode_attempt(&encoder_output, &prefix, temperature, &mut output_tokens) {
                Ok(true) => break,
                Ok(false) => {
                    tracing::debug!(
                        "Decode degenerated at temperature {:.1}, retrying hotter",
                        temperature
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let text = self.decode_tokens(&output_tokens)?;

        tracing::debug!(
            "Transcribed {:.2}s of audio: '{}'",
            copy_len as f64 / 16_000.0,
            text
        );

        Ok(DecodedUtterance { text, language })
    }

    /// One pass of greedy decoding. Returns Ok(false) when the repetition
    /// guard tripped and a hotter retry is warranted.
    fn decode_attempt(
        &mut self,
        encoder_output: &Tensor,
        prefix: &[u32],
        temperature: f32,
        output_tokens: &mut Vec<u32>,
    ) -> Result<bool> {
        let mut tokens = prefix.to_vec();

        for step in 0..MAX_DECODE_TOKENS {
            let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let hidden = self
                .model
                .decoder
                .forward(&token_tensor, encoder_output, step == 0)?;

            let (_, seq_len, _) = hidden.dims3()?;
            let last = hidden.i((..1, seq_len - 1..))?;
            let logits = self.model.decoder.final_linear(&last)?.i(0)?.i(0)?;

            let next_token = if temperature > 0.0 {
                self.sample_token(&logits, temperature)?
            } else {
                logits.argmax(D::Minus1)?.to_scalar::<u32>()?
            };

            if next_token == self.eot_token {
                return Ok(true);
            }

            if is_repetitive(output_tokens, next_token) {
                return Ok(false);
            }

            tokens.push(next_token);
            output_tokens.push(next_token);
        }

        Ok(true)
    }

    /// Detect the spoken language from one decoder step on the SOT token.
    ///
    /// Returns None when none of the known language tokens exist in this
    /// tokenizer (English-only model variants).
    fn detect_language(&mut self, encoder_output: &Tensor) -> Result<Option<String>> {
        let candidates: Vec<(&str, u32)> = LANGUAGES
            .iter()
            .filter_map(|(code, token_text)| {
                self.tokenizer
                    .token_to_id(token_text)
                    .map(|id| (*code, id))
            })
            .collect();

        if candidates.is_empty() {
            return Ok(None);
        }

        let sot = Tensor::new(&[self.sot_token], &self.device)?.unsqueeze(0)?;
        let hidden = self.model.decoder.forward(&sot, encoder_output, true)?;
        let logits = self.model.decoder.final_linear(&hidden.i((..1, ..1))?)?.i(0)?.i(0)?;
        let logits = logits.to_vec1::<f32>()?;

        let mut best: Option<(&str, f32)> = None;
        for (code, id) in &candidates {
            let score = logits
                .get(*id as usize)
                .copied()
                .ok_or_else(|| anyhow!("language token {} out of logits range", id))?;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((code, score));
            }
        }

        Ok(best.map(|(code, _)| code.to_string()))
    }

    /// Token for a language code, if this tokenizer knows it.
    fn language_token(&self, code: &str) -> Option<u32> {
        let normalized = code.to_lowercase();
        LANGUAGES
            .iter()
            .find(|(c, _)| *c == normalized)
            .and_then(|(_, token_text)| self.tokenizer.token_to_id(token_text))
    }

    /// Sample a token from temperature-scaled logits.
    fn sample_token(&self, logits: &Tensor, temperature: f32) -> Result<u32> {
        let scaled = (logits / temperature as f64)?;
        let probs = candle_nn::ops::softmax_last_dim(&scaled)?;
        let token = probs.argmax(D::Minus1)?.to_scalar::<u32>()?;
        Ok(token)
    }

    /// Decode tokens to text and strip residual special tokens.
    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        let cleaned = text
            .replace(m::SOT_TOKEN, "")
            .replace(m::EOT_TOKEN, "")
            .replace(m::NO_TIMESTAMPS_TOKEN, "");

        Ok(cleaned.trim().to_string())
    }
}

/// Look up a required special token in the tokenizer.
fn special_token(tokenizer: &Tokenizer, text: &str) -> Result<u32> {
    tokenizer
        .token_to_id(text)
        .ok_or_else(|| anyhow!("tokenizer is missing special token {}", text))
}

/// Check whether appending `new_token` makes the tail degenerate.
///
/// Trips on three identical tokens in a row and on an immediately repeated
/// trigram, the two patterns greedy Whisper decoding gets stuck in.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 2 {
        let n = tokens.len();
        if tokens[n - 1] == new_token && tokens[n - 2] == new_token {
            return true;
        }
    }

    if tokens.len() >= 5 {
        let n = tokens.len();
        let last: [u32; 3] = [tokens[n - 2], tokens[n - 1], new_token];
        let prev: [u32; 3] = [tokens[n - 5], tokens[n - 4], tokens[n - 3]];
        if last == prev {
            return true;
        }
    }

    false
}

/// Build a mel filter bank matching Whisper's preprocessing: triangular
/// filters on the mel scale over a 400-point FFT at 16 kHz.
///
/// Layout is row-major (n_mels, n_fft/2 + 1), the shape
/// `pcm_to_mel` expects.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    const N_FFT: usize = 400;
    const SAMPLE_RATE: f32 = 16_000.0;
    let n_freqs = N_FFT / 2 + 1;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10.0f32.powf(mel / 2595.0) - 1.0);

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(SAMPLE_RATE / 2.0);

    // n_mels + 2 edge points, evenly spaced on the mel scale
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| {
            let mel = mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32;
            mel_to_hz(mel)
        })
        .collect();

    let bin_hz = |bin: usize| bin as f32 * SAMPLE_RATE / N_FFT as f32;

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel_idx in 0..n_mels {
        let (left, center, right) = (edges[mel_idx], edges[mel_idx + 1], edges[mel_idx + 2]);
        // Slaney-style area normalization keeps per-band energy comparable
        let norm = 2.0 / (right - left);

        for bin in 0..n_freqs {
            let hz = bin_hz(bin);
            let weight = if hz <= left || hz >= right {
                0.0
            } else if hz <= center {
                (hz - left) / (center - left)
            } else {
                (right - hz) / (right - center)
            };
            filters[mel_idx * n_freqs + bin] = weight * norm;
        }
    }

    filters
}
