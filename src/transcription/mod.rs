//! # Transcription Module
//!
//! Speech-to-text via Whisper models running on the Candle-rs framework.
//! Pure Rust inference without FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Model**: Loading a Whisper variant from HuggingFace and running the
//!   encode/decode passes, including language detection
//! - **Recognizer**: The process-wide shared handle; loaded once at startup,
//!   invocations serialized through a mutex around the decode call
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default; good CPU-only latency
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest
//!
//! ## CPU Execution:
//! Models are loaded with f32 weights on `Device::Cpu`; no half-precision
//! GPU fast path is involved anywhere in the inference chain.

pub mod model;       // Whisper loading and encode/decode
pub mod recognizer;  // Shared process-wide recognizer handle

pub use model::ModelSize;
pub use recognizer::{RecognitionOutcome, Recognizer, SpeechRecognizer};
