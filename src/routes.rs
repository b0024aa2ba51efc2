//! # Route Table and CORS Policy
//!
//! Both are derived from the immutable `AppConfig`, so `main` and the tests build the
//! exact same application.

use crate::config::CorsConfig;
use crate::{handlers, health};
use actix_cors::Cors;
use actix_web::web;

/// Register every route of the service.
///
/// `/analyze-bpm/` is the path browsers call; the slash-less form is accepted too so a
/// missing trailing slash doesn't turn into a 404.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics)),
    )
    // Also provide health check at root level for convenience
    .route("/health", web::get().to(health::health_check))
    .route("/analyze-bpm/", web::post().to(handlers::analyze_bpm))
    .route("/analyze-bpm", web::post().to(handlers::analyze_bpm));
}

/// Build the CORS middleware from the `cors` config section.
///
/// With `"*"` in `allowed_origins` any origin is accepted. The request origin is echoed
/// back rather than answered with a literal `*`, which keeps credentialed requests valid.
pub fn cors_policy(config: &CorsConfig) -> Cors {
    let mut cors = Cors::default()
        .allow_any_method()    // Allow GET, POST, OPTIONS, etc.
        .allow_any_header()    // Allow any HTTP headers
        .max_age(config.max_age_secs);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in &config.allowed_origins {
            cors = cors.allowed_origin(origin);
        }
    }

    if config.allow_credentials {
        cors = cors.supports_credentials();
    }
    cors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use actix_web::{http::header, http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_health_routes_are_mounted() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        for uri in ["/health", "/api/v1/health", "/api/v1/metrics"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        }

        let resp = test::call_service(&app, test::TestRequest::get().uri("/analyze-bpm/").to_request()).await;
        assert!(resp.status().is_client_error());
    }

    #[actix_web::test]
    async fn test_cors_echoes_origin_with_credentials() {
        let config = AppConfig::default();
        let state = AppState::new(config.clone());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(cors_policy(&config.cors))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/health")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        let headers = resp.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[actix_web::test]
    async fn test_cors_preflight_for_analysis() {
        let config = AppConfig::default();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config.clone())))
                .wrap(cors_policy(&config.cors))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/analyze-bpm/")
            .insert_header((header::ORIGIN, "https://app.example.com"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_MAX_AGE).unwrap(),
            "3600"
        );
    }
}
