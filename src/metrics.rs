/// Metrics for pipeline operations
///
/// Tracks success rates, error counts, and latency per operation
/// (popular, latest, search, detail, chapters, chapter_images, relay)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
}

impl OperationMetrics {
    pub fn new(operation: String) -> Self {
        Self {
            operation,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    fn record_failure(&mut self, error: String) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error);
    }
}

/// Shared tracker; one entry per operation name.
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, OperationMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, operation: &str, response_time: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics
            .entry(operation.to_string())
            .or_insert_with(|| OperationMetrics::new(operation.to_string()));
        entry.record_success(response_time);

        log::debug!(
            "[{}] success in {}ms, success rate {:.2}%",
            operation,
            response_time.as_millis(),
            entry.success_rate()
        );
    }

    pub fn record_failure(&self, operation: &str, error: String) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics
            .entry(operation.to_string())
            .or_insert_with(|| OperationMetrics::new(operation.to_string()));
        entry.record_failure(error.clone());

        log::warn!(
            "[{}] failure: {}, success rate {:.2}%",
            operation,
            error,
            entry.success_rate()
        );
    }

    pub fn get(&self, operation: &str) -> Option<OperationMetrics> {
        self.metrics.lock().unwrap().get(operation).cloned()
    }

    pub fn all(&self) -> Vec<OperationMetrics> {
        self.metrics.lock().unwrap().values().cloned().collect()
    }

    pub fn export_json(&self) -> String {
        let metrics = self.metrics.lock().unwrap();
        serde_json::to_string_pretty(&*metrics).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation() {
        let metrics = OperationMetrics::new("popular".to_string());
        assert_eq!(metrics.operation, "popular");
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn success_rate_calculation() {
        let tracker = MetricsTracker::new();
        tracker.record_success("detail", Duration::from_millis(100));
        tracker.record_success("detail", Duration::from_millis(200));
        tracker.record_failure("detail", "status 502".to_string());

        let m = tracker.get("detail").unwrap();
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.successful_requests, 2);
        assert_eq!(m.failed_requests, 1);
        assert!((m.success_rate() - 66.66).abs() < 0.1);
        assert!((m.average_response_time_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tracker_keeps_operations_separate() {
        let tracker = MetricsTracker::new();
        tracker.record_success("popular", Duration::from_millis(100));
        tracker.record_failure("chapter_images", "render failed".to_string());

        assert_eq!(tracker.get("popular").unwrap().success_rate(), 100.0);
        assert_eq!(tracker.get("chapter_images").unwrap().success_rate(), 0.0);
        assert_eq!(tracker.all().len(), 2);

        let json = tracker.export_json();
        assert!(json.contains("popular"));
    }
}
