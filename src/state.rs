//! # Application State Management
//!
//! Shared state handed to every HTTP request handler through
//! `web::Data<AppState>`. Nothing here is ambient or global; the state is
//! constructed once in `main` and injected explicitly.
//!
//! ## What is shared:
//! - **config**: Immutable for the process lifetime. There is no runtime
//!   reconfiguration, so no lock is needed around it.
//! - **recognizer**: The loaded speech model behind its own internal mutex
//!   (see `transcription::recognizer`); `Arc` gives every worker a handle.
//! - **metrics**: Request counters updated by middleware on every request,
//!   so these sit behind `Arc<RwLock<..>>`.

use crate::audio::convert::AudioConverter;
use crate::config::AppConfig;
use crate::transcription::SpeechRecognizer;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Immutable process configuration
    pub config: Arc<AppConfig>,

    /// Loaded speech model, shared by all requests
    pub recognizer: Arc<dyn SpeechRecognizer>,

    /// External format converter the handler delegates to
    pub converter: Arc<dyn AudioConverter>,

    /// Request metrics, updated by middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Server start time, for uptime reporting
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total requests processed since server start
    pub request_count: u64,

    /// Total error responses since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        converter: Arc<dyn AudioConverter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            recognizer,
            converter,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record timing for one finished request.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the counters, released before serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint in [0.0, 1.0].
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metric_averages() {
        let metric = EndpointMetric {
            request_count: 4,
            total_duration_ms: 200,
            error_count: 1,
        };
        assert_eq!(metric.average_duration_ms(), 50.0);
        assert_eq!(metric.error_rate(), 0.25);
    }

    #[test]
    fn test_endpoint_metric_handles_zero_requests() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
