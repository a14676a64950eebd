//! # Transcription Request Handler
//!
//! The core of the service: accept one audio upload, normalize it through
//! the external converter, run the recognizer, shape the response, and
//! remove both temporary files on every exit path.
//!
//! ## Endpoint: `POST /transcribe`
//!
//! ## Request:
//! Multipart form data with the audio in a field named "file"; an optional
//! language hint arrives as a `language` query parameter or form field.
//!
//! ## Response:
//! ```json
//! {
//!   "transcript": "full text...",
//!   "language": "en",
//!   "tldr": "first 150 chars...",
//!   "duration": 3.2,
//!   "status": "success"
//! }
//! ```
//!
//! ## Processing order (fixed):
//! read + size check → temp write → convert → recognize → shape. Failures
//! at each stage map to the taxonomy in `error.rs`; cleanup is owned by
//! `ScratchFile` drop guards allocated before the first fallible stage.

use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::audio::convert::AudioConverter;
use crate::audio::processor;
use crate::audio::scratch::ScratchFile;
use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::SpeechRecognizer;

/// Characters of transcript kept in the tldr before the ellipsis.
const TLDR_CHARS: usize = 150;

/// Successful transcription response.
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub transcript: String,
    pub language: String,
    pub tldr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub status: String,
}

/// Optional language hint via query string.
#[derive(Debug, Deserialize)]
pub struct TranscribeQuery {
    pub language: Option<String>,
}

/// Transcribe an uploaded audio file (OGG, MP3, WAV, ...).
pub async fn transcribe_audio(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    mut payload: actix_multipart::Multipart,
) -> Result<HttpResponse, AppError> {
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut form_language: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field = item?;

        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();

        match field_name.as_str() {
            "file" => {
                filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(|s| s.to_string());

                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    bytes.extend_from_slice(&chunk);
                }
                audio_bytes = Some(bytes);
            }
            "language" => {
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    bytes.extend_from_slice(&chunk);
                }
                form_language = String::from_utf8(bytes).ok().filter(|s| !s.is_empty());
            }
            _ => {
                // Drain unknown fields so the stream stays consumable
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    let audio_bytes =
        audio_bytes.ok_or_else(|| AppError::BadRequest("No audio file provided".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload".to_string());

    info!(
        "Received file: {} ({} bytes)",
        filename,
        audio_bytes.len()
    );

    // Size ceiling is enforced on the fully-read content
    if audio_bytes.len() > state.config.limits.max_upload_bytes {
        return Err(AppError::PayloadTooLarge);
    }

    let language_hint = query.into_inner().language.or(form_language);

    // Both scratch guards exist before the first fallible stage, so every
    // exit path below runs their cleanup
    let input = ScratchFile::allocate(upload_extension(&filename));
    let wav = ScratchFile::allocate("wav");

    tokio::fs::write(input.path(), &audio_bytes)
        .await
        .map_err(|e| AppError::Internal(format!("cannot write upload to disk: {}", e)))?;

    state.converter.convert(input.path(), wav.path()).await?;

    info!("Starting transcription...");
    let recognizer: Arc<dyn SpeechRecognizer> = state.recognizer.clone();
    let wav_path = wav.path().to_path_buf();
    let hint = language_hint;

    let outcome = web::block(move || {
        let samples = processor::load_wav_samples(&wav_path)?;
        recognizer.transcribe(&samples, hint.as_deref())
    })
    .await
    .map_err(|e| AppError::Internal(format!("worker pool failure: {}", e)))?
    .map_err(|e| AppError::Recognition(e.to_string()))?;

    let transcript = outcome.text.trim().to_string();
    let language = outcome
        .language
        .unwrap_or_else(|| "unknown".to_string());
    let tldr = make_tldr(&transcript);

    info!("Transcription complete. Language: {}", language);

    Ok(HttpResponse::Ok().json(TranscriptionResponse {
        transcript,
        language,
        tldr,
        duration: outcome.duration_seconds,
        status: "success".to_string(),
    }))
}

/// Extension for the raw upload's scratch file, taken from the client's
/// filename so ffmpeg gets a container hint; content sniffing does the
/// real work.
fn upload_extension(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("ogg")
}

/// First 150 characters of the transcript, ellipsis-suffixed when truncated.
///
/// Counted in characters, not bytes, so multibyte transcripts never get
/// split mid-character.
fn make_tldr(transcript: &str) -> String {
    if transcript.chars().count() > TLDR_CHARS {
        let prefix: String = transcript.chars().take(TLDR_CHARS).collect();
        format!("{}...", prefix)
    } else {
        transcript.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::convert::{AudioConverter, ConvertError};
    use crate::config::AppConfig;
    use crate::transcription::RecognitionOutcome;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Converter stub that writes a tiny valid WAV and remembers the paths
    /// it was handed, so tests can assert on cleanup afterwards.
    struct FakeConverter {
        fail: bool,
        seen: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl FakeConverter {
        fn succeeding() -> Self {
            Self {
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen_paths(&self) -> Vec<(PathBuf, PathBuf)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioConverter for FakeConverter {
        async fn convert(&self, input: &std::path::Path, output: &std::path::Path) -> Result<(), ConvertError> {
            self.seen
                .lock()
                .unwrap()
                .push((input.to_path_buf(), output.to_path_buf()));

            if self.fail {
                return Err(ConvertError::Failed {
                    status: Some(1),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }

            let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16000, 16);
            let samples = vec![0i16; 16000];
            let mut out = std::fs::File::create(output).unwrap();
            wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out).unwrap();
            Ok(())
        }
    }

    /// Recognizer stub returning a fixed transcript.
    struct FakeRecognizer {
        text: String,
    }

    impl SpeechRecognizer for FakeRecognizer {
        fn model_name(&self) -> &str {
            "base"
        }

        fn transcribe(
            &self,
            samples: &[f32],
            language_hint: Option<&str>,
        ) -> anyhow::Result<RecognitionOutcome> {
            Ok(RecognitionOutcome {
                text: self.text.clone(),
                language: language_hint.map(|s| s.to_string()).or(Some("en".to_string())),
                duration_seconds: Some(samples.len() as f64 / 16000.0),
            })
        }
    }

    fn test_state(converter: Arc<FakeConverter>, transcript: &str) -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(FakeRecognizer {
                text: transcript.to_string(),
            }),
            converter,
        )
    }

    fn multipart_body(file_bytes: &[u8], filename: &str) -> (String, Vec<u8>) {
        let boundary = "----test-boundary-7MA4YWxkTrZu0gW";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", boundary),
            body,
        )
    }

    async fn post_transcribe(
        state: AppState,
        uri: &str,
        file_bytes: &[u8],
        filename: &str,
    ) -> actix_web::dev::ServiceResponse {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/transcribe", web::post().to(transcribe_audio)),
        )
        .await;

        let (content_type, body) = multipart_body(file_bytes, filename);
        let req = test::TestRequest::post()
            .uri(uri)
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        test::call_service(&app, req).await
    }

    #[actix_web::test]
    async fn test_small_upload_succeeds_and_cleans_up() {
        let converter = Arc::new(FakeConverter::succeeding());
        let state = test_state(converter.clone(), "hello world");

        let resp = post_transcribe(state, "/transcribe", b"fake-ogg-bytes", "note.ogg").await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["transcript"], "hello world");
        assert_eq!(body["tldr"], "hello world");
        assert_eq!(body["language"], "en");
        assert_eq!(body["status"], "success");
        assert!((body["duration"].as_f64().unwrap() - 1.0).abs() < 1e-9);

        // Both scratch files must be gone after the response
        for (input, wav) in converter.seen_paths() {
            assert!(!input.exists(), "input scratch {:?} left behind", input);
            assert!(!wav.exists(), "wav scratch {:?} left behind", wav);
        }
    }

    #[actix_web::test]
    async fn test_language_query_parameter_is_passed_through() {
        let converter = Arc::new(FakeConverter::succeeding());
        let state = test_state(converter, "hola mundo");

        let resp =
            post_transcribe(state, "/transcribe?language=es", b"bytes", "voz.ogg").await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["language"], "es");
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected_before_conversion() {
        let converter = Arc::new(FakeConverter::succeeding());
        let mut state = test_state(converter.clone(), "unused");
        // Shrink the ceiling so the test payload stays small
        let mut config = AppConfig::default();
        config.limits.max_upload_bytes = 64;
        state.config = Arc::new(config);

        let oversized = vec![0u8; 65];
        let resp = post_transcribe(state, "/transcribe", &oversized, "big.ogg").await;
        assert_eq!(resp.status().as_u16(), 413);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "File too large. Max 25MB.");

        // The converter must never have been invoked
        assert!(converter.seen_paths().is_empty());
    }

    #[actix_web::test]
    async fn test_conversion_failure_maps_to_500_and_cleans_up() {
        let converter = Arc::new(FakeConverter::failing());
        let state = test_state(converter.clone(), "unused");

        let resp = post_transcribe(state, "/transcribe", b"plain text, not audio", "fake.ogg").await;
        assert_eq!(resp.status().as_u16(), 500);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "Audio conversion failed");

        for (input, wav) in converter.seen_paths() {
            assert!(!input.exists());
            assert!(!wav.exists());
        }
    }

    #[actix_web::test]
    async fn test_missing_file_field_is_bad_request() {
        let converter = Arc::new(FakeConverter::succeeding());
        let state = test_state(converter, "unused");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/transcribe", web::post().to(transcribe_audio)),
        )
        .await;

        let boundary = "----test-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{b}--\r\n",
            b = boundary
        );
        let req = test::TestRequest::post()
            .uri("/transcribe")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn test_same_bytes_twice_yield_independent_equal_responses() {
        let converter = Arc::new(FakeConverter::succeeding());
        let state = test_state(converter.clone(), "same words");

        let first = post_transcribe(state.clone(), "/transcribe", b"same-bytes", "a.ogg").await;
        let second = post_transcribe(state, "/transcribe", b"same-bytes", "a.ogg").await;
        assert!(first.status().is_success());
        assert!(second.status().is_success());

        let first: serde_json::Value = test::read_body_json(first).await;
        let second: serde_json::Value = test::read_body_json(second).await;
        assert_eq!(first["transcript"], second["transcript"]);
        assert_eq!(first["language"], second["language"]);

        // Each request used its own scratch paths
        let seen = converter.seen_paths();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].0, seen[1].0);
        assert_ne!(seen[0].1, seen[1].1);
    }

    #[actix_web::test]
    async fn test_empty_transcript_yields_empty_tldr() {
        let converter = Arc::new(FakeConverter::succeeding());
        let state = test_state(converter, "   ");

        let resp = post_transcribe(state, "/transcribe", b"silence", "quiet.wav").await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["transcript"], "");
        assert_eq!(body["tldr"], "");
    }

    #[::core::prelude::v1::test]
    fn test_tldr_short_transcript_unchanged() {
        assert_eq!(make_tldr("short text"), "short text");
        assert_eq!(make_tldr(""), "");
    }

    #[::core::prelude::v1::test]
    fn test_tldr_exactly_150_chars_unchanged() {
        let text = "a".repeat(150);
        assert_eq!(make_tldr(&text), text);
    }

    #[::core::prelude::v1::test]
    fn test_tldr_151_chars_truncated_with_ellipsis() {
        let text = "b".repeat(151);
        let tldr = make_tldr(&text);
        assert_eq!(tldr.chars().count(), 153);
        assert!(tldr.ends_with("..."));
        assert!(text.starts_with(tldr.trim_end_matches("...")));
    }

    #[::core::prelude::v1::test]
    fn test_tldr_counts_characters_not_bytes() {
        // 151 three-byte characters; byte-based slicing would panic or split
        let text = "語".repeat(151);
        let tldr = make_tldr(&text);
        assert_eq!(tldr.chars().count(), 153);
        assert!(tldr.ends_with("..."));
    }

    #[::core::prelude::v1::test]
    fn test_upload_extension_fallback() {
        assert_eq!(upload_extension("voice.mp3"), "mp3");
        assert_eq!(upload_extension("voice"), "ogg");
        assert_eq!(upload_extension("weird.!!"), "ogg");
        assert_eq!(upload_extension("archive.tar.gz"), "gz");
    }
}
