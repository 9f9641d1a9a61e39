use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

use crate::orchestrator::Dispatch;

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    backend_attempts_total: IntCounterVec,
    backend_attempt_duration_seconds: HistogramVec,
    exhausted_total: IntCounterVec,
}

pub struct InflightGuard<'a> {
    metrics: &'a AppMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "gateway_http_requests_total",
                "Total HTTP requests processed by gateway"
            ),
            &["path", "status"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["path"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "gateway_inflight_requests",
            "Current in-flight requests at gateway",
        )
        .expect("valid inflight_requests metric");

        let backend_attempts_total = IntCounterVec::new(
            opts!(
                "gateway_backend_attempts_total",
                "Backend attempts by backend and outcome"
            ),
            &["capability", "backend", "outcome"],
        )
        .expect("valid backend_attempts_total metric");

        let backend_attempt_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_backend_attempt_duration_seconds",
                "Latency of individual backend attempts in seconds",
            ),
            &["backend"],
        )
        .expect("valid backend_attempt_duration_seconds metric");

        let exhausted_total = IntCounterVec::new(
            opts!(
                "gateway_fallback_exhausted_total",
                "Dispatches answered with the apology after every backend failed"
            ),
            &["capability"],
        )
        .expect("valid exhausted_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_requests.clone()))
            .expect("register inflight_requests");
        registry
            .register(Box::new(backend_attempts_total.clone()))
            .expect("register backend_attempts_total");
        registry
            .register(Box::new(backend_attempt_duration_seconds.clone()))
            .expect("register backend_attempt_duration_seconds");
        registry
            .register(Box::new(exhausted_total.clone()))
            .expect("register exhausted_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            backend_attempts_total,
            backend_attempt_duration_seconds,
            exhausted_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.inflight_requests.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(&self, path: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, &status_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_dispatch(&self, dispatch: &Dispatch) {
        let capability = dispatch.capability.as_str();
        for attempt in &dispatch.attempts {
            let backend = attempt.backend.identifier.as_str();
            self.backend_attempts_total
                .with_label_values(&[capability, backend, attempt.label()])
                .inc();
            self.backend_attempt_duration_seconds
                .with_label_values(&[backend])
                .observe(attempt.latency.as_secs_f64());
        }
        if dispatch.exhausted() {
            self.exhausted_total.with_label_values(&[capability]).inc();
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_requests.dec();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        backend::{BackendDescriptor, BackendError, BackendKind, Capability},
        models::NormalizedResponse,
        orchestrator::AttemptOutcome,
    };

    #[test]
    fn exhausted_dispatch_is_counted_per_capability_and_outcome() {
        let metrics = AppMetrics::new();
        let descriptor = BackendDescriptor::new(
            "gemini-vision",
            BackendKind::Remote,
            Capability::Vision,
            "gemini-2.0-flash",
            Duration::from_secs(60),
        );
        let dispatch = Dispatch {
            capability: Capability::Vision,
            response: NormalizedResponse::degraded("sorry"),
            attempts: vec![AttemptOutcome {
                backend: descriptor,
                result: Err(BackendError::Timeout("slow".to_owned()).into()),
                latency: Duration::from_millis(5),
            }],
        };

        metrics.observe_dispatch(&dispatch);
        let rendered = metrics.render().expect("metrics render");

        assert!(rendered.contains("gateway_fallback_exhausted_total{capability=\"vision\"} 1"));
        assert!(rendered.contains("outcome=\"timeout\""));
    }
}
