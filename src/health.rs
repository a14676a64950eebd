use crate::state::AppState;
use crate::transcription::SpeechRecognizer;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

/// Static identity structure returned by `GET /` and `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub version: String,
}

impl HealthResponse {
    fn current(state: &AppState) -> Self {
        Self {
            status: "healthy".to_string(),
            model: state.recognizer.model_name().to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::current(&state))
}

/// Metrics collected by the middleware; ambient observability, not part of
/// the transcription contract.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "model": state.recognizer.model_name()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::convert::{AudioConverter, ConvertError};
    use crate::config::AppConfig;
    use crate::transcription::RecognitionOutcome;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;

    struct StubRecognizer;

    impl SpeechRecognizer for StubRecognizer {
        fn model_name(&self) -> &str {
            "base"
        }

        fn transcribe(
            &self,
            _samples: &[f32],
            _language_hint: Option<&str>,
        ) -> anyhow::Result<RecognitionOutcome> {
            unreachable!("health endpoints never transcribe")
        }
    }

    struct StubConverter;

    #[async_trait]
    impl AudioConverter for StubConverter {
        async fn convert(&self, _input: &Path, _output: &Path) -> Result<(), ConvertError> {
            unreachable!("health endpoints never convert")
        }
    }

    fn test_state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(StubRecognizer),
            Arc::new(StubConverter),
        )
    }

    #[actix_web::test]
    async fn test_health_returns_identity_shape() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "base");
        assert_eq!(body["version"], "1.0.0");
    }

    #[actix_web::test]
    async fn test_metrics_reports_counters() {
        let state = test_state();
        state.record_endpoint_request("POST /transcribe", 120, false);
        state.increment_request_count();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["overall"]["total_requests"], 1);
        assert_eq!(body["endpoints"][0]["endpoint"], "POST /transcribe");
        assert_eq!(body["model"], "base");
    }
}
