//! # Application State Management
//!
//! This module manages state shared by every HTTP worker: the configuration, request and
//! analysis metrics, and the admission pool that bounds how many analyses run at once.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every actix worker hold the same state without copying it
//! - **Config**: `Arc<AppConfig>` with no lock at all, because the configuration is
//!   built once at startup and never changes afterwards
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer
//! - **Used for**: Metrics, which every request updates
//! - **Poisoning**: A panic while holding the lock only loses a counter update, so a
//!   poisoned lock is recovered with `into_inner` instead of propagating the panic
//!
//! ### Semaphore (tokio)
//! - **Purpose**: Admission control for CPU-heavy analyses
//! - **Owned permits**: `acquire_owned` returns a permit that can be moved into a
//!   blocking closure, so the slot stays taken until the analysis really finishes,
//!   even if the HTTP request already timed out
//!
//! ### RAII guards
//! - `ActiveAnalysis` increments the active-analysis gauge when created and decrements it
//!   in `Drop`, so the gauge cannot drift on early returns or panics.

use crate::config::AppConfig;        // Our configuration types
use std::collections::HashMap;       // For storing per-endpoint metrics
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};  // Uptime and queue timeouts
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either an `Arc` or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, immutable after startup
    pub config: Arc<AppConfig>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// One permit per analysis allowed to run concurrently
    analysis_slots: Arc<Semaphore>,

    /// When the server started
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: Overall load and reliability
/// - **active_analyses**: How many decode + estimate runs are in flight right now
/// - **analyses_***: Outcome counters for the analysis pipeline
/// - **endpoint_metrics**: Per-route latency and error rates
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed requests (4xx and 5xx) since server start
    pub error_count: u64,

    /// Analyses currently holding a slot
    pub active_analyses: u32,

    /// Analyses that produced a tempo estimate
    pub analyses_completed: u64,

    /// Analyses that ended in a decode, estimate or storage error
    pub analyses_failed: u64,

    /// Analyses abandoned because they exceeded the analysis timeout
    pub analyses_timed_out: u64,

    /// Requests turned away because no slot became free in time
    pub analyses_rejected: u64,

    /// Detailed metrics for each API endpoint
    /// Key: route pattern (e.g., "POST /analyze-bpm/")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

/// How one analysis request ended, for the outcome counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed,
    Failed,
    TimedOut,
    Rejected,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    ///
    /// The admission pool is sized from `analysis.max_concurrent_analyses` (at least one slot).
    pub fn new(config: AppConfig) -> Self {
        let slots = config.analysis.max_concurrent_analyses.max(1);
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            analysis_slots: Arc::new(Semaphore::new(slots)),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: Method plus route pattern (e.g., "GET /health")
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether this request resulted in an error status
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();

        // Get or create metrics for this specific endpoint
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Wait up to `wait` for a free analysis slot.
    ///
    /// Returns `None` when the pool stayed saturated for the whole wait. The returned
    /// permit frees the slot when dropped.
    pub async fn acquire_analysis_slot(&self, wait: Duration) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout(wait, self.analysis_slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            // Closed semaphore or elapsed wait: either way there is no slot for this request.
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Slots that are free right now.
    pub fn available_analysis_slots(&self) -> usize {
        self.analysis_slots.available_permits()
    }

    /// Mark an analysis as started. The gauge goes back down when the guard is dropped.
    pub fn begin_analysis(&self) -> ActiveAnalysis {
        self.metrics_write().active_analyses += 1;
        ActiveAnalysis {
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn record_analysis_outcome(&self, outcome: AnalysisOutcome) {
        let mut metrics = self.metrics_write();
        match outcome {
            AnalysisOutcome::Completed => metrics.analyses_completed += 1,
            AnalysisOutcome::Failed => metrics.analyses_failed += 1,
            AnalysisOutcome::TimedOut => metrics.analyses_timed_out += 1,
            AnalysisOutcome::Rejected => metrics.analyses_rejected += 1,
        }
    }

    /// Get a snapshot of current metrics (used for the /health and /metrics endpoints).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Guard for the active-analysis gauge, see [`AppState::begin_analysis`].
#[derive(Debug)]
pub struct ActiveAnalysis {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveAnalysis {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        // Underflow protection
        metrics.active_analyses = metrics.active_analyses.saturating_sub(1);
    }
}

impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no average to calculate
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no errors possible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_slots(slots: usize) -> AppState {
        let mut config = AppConfig::default();
        config.analysis.max_concurrent_analyses = slots;
        AppState::new(config)
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state_with_slots(1);
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().error_rate(), 0.0);
    }

    #[test]
    fn test_active_analysis_guard_tracks_gauge() {
        let state = state_with_slots(2);
        let first = state.begin_analysis();
        let second = state.begin_analysis();
        assert_eq!(state.get_metrics_snapshot().active_analyses, 2);

        drop(first);
        assert_eq!(state.get_metrics_snapshot().active_analyses, 1);
        drop(second);
        assert_eq!(state.get_metrics_snapshot().active_analyses, 0);
    }

    #[test]
    fn test_outcome_counters() {
        let state = state_with_slots(1);
        state.record_analysis_outcome(AnalysisOutcome::Completed);
        state.record_analysis_outcome(AnalysisOutcome::Completed);
        state.record_analysis_outcome(AnalysisOutcome::TimedOut);
        state.record_analysis_outcome(AnalysisOutcome::Rejected);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.analyses_completed, 2);
        assert_eq!(snapshot.analyses_failed, 0);
        assert_eq!(snapshot.analyses_timed_out, 1);
        assert_eq!(snapshot.analyses_rejected, 1);
    }

    #[tokio::test]
    async fn test_analysis_slots_are_bounded() {
        let state = state_with_slots(1);
        let permit = state.acquire_analysis_slot(Duration::from_millis(50)).await;
        assert!(permit.is_some());
        assert_eq!(state.available_analysis_slots(), 0);

        // Saturated pool: the second caller gives up after the wait.
        assert!(state.acquire_analysis_slot(Duration::from_millis(50)).await.is_none());

        drop(permit);
        assert!(state.acquire_analysis_slot(Duration::from_millis(50)).await.is_some());
    }
}
