use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let uptime_seconds = state.get_uptime_seconds();

    let memory_info = get_memory_info();
    let system_status = get_system_status(config, &metrics, state.available_analysis_slots());

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_analyses": metrics.active_analyses
        },
        "memory": memory_info,
        "analysis": {
            "sample_rate": config.analysis.sample_rate,
            "upload_field": config.analysis.upload_field,
            "max_upload_bytes": config.analysis.max_upload_bytes,
            "max_duration_secs": config.analysis.max_duration_secs,
            "timeout_secs": config.analysis.timeout_secs,
            "bpm_range": [config.tempo.min_bpm, config.tempo.max_bpm]
        },
        "system": system_status
    }))
}

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
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "analyses": {
            "active": metrics.active_analyses,
            "completed": metrics.analyses_completed,
            "failed": metrics.analyses_failed,
            "timed_out": metrics.analyses_timed_out,
            "rejected_busy": metrics.analyses_rejected,
            "available_slots": state.available_analysis_slots(),
            "max_concurrent": state.config.analysis.max_concurrent_analyses
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let pid = std::process::id();
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) else {
        return json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false
        });
    };

    let mut vm_rss = 0;
    let mut vm_size = 0;
    for line in status.lines() {
        if line.starts_with("VmRSS:") {
            if let Some(kb_str) = line.split_whitespace().nth(1) {
                vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
            }
        } else if line.starts_with("VmSize:") {
            if let Some(kb_str) = line.split_whitespace().nth(1) {
                vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
            }
        }
    }

    json!({
        "resident_memory_bytes": vm_rss,
        "virtual_memory_bytes": vm_size,
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics, free_slots: usize) -> serde_json::Value {
    let max_slots = config.analysis.max_concurrent_analyses.max(1);
    let busy_slots = max_slots.saturating_sub(free_slots);
    let slot_usage = busy_slots as f64 / max_slots as f64;

    let status = if slot_usage >= 1.0 {
        "saturated"
    } else if slot_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "slot_usage_percent": (slot_usage * 100.0).round(),
        "max_concurrent_analyses": max_slots,
        "active_analyses": metrics.active_analyses,
        "load_warnings": if slot_usage >= 1.0 {
            vec!["All analysis slots busy - new requests are queued up to queue_timeout_secs"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_analysis_settings() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["analysis"]["upload_field"], "file");
        assert_eq!(body["metrics"]["active_analyses"], 0);
        assert_eq!(body["system"]["status"], "normal");
    }

    #[actix_web::test]
    async fn test_metrics_report_analysis_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_analysis_outcome(crate::state::AnalysisOutcome::Completed);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(body["analyses"]["completed"], 1);
        assert_eq!(body["analyses"]["timed_out"], 0);
    }
}
