//! # API Server Module
//!
//! ## Purpose
//! REST endpoints serving persisted reports to the web frontend: report
//! lookup by date (most recent by default), date listing, health, and
//! run statistics.
//!
//! ## Endpoints
//! - `GET /api/report?date=YYYY-MM-DD`: one report (latest when no date)
//! - `GET /api/dates`: available report dates, most recent first
//! - `GET /api/health`: component health
//! - `GET /api/stats`: store sizes and report totals

use crate::errors::{DigestError, Result};
use crate::AppState;
use actix_cors::Cors;
use actix_web::middleware::Condition;
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use serde::{Deserialize, Serialize};

/// API server wrapping the shared application state.
pub struct ApiServer {
    app_state: AppState,
}

/// Query parameters for report lookup
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub date: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HealthComponents,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub history: String,
    pub reports: String,
}

impl ApiServer {
    pub fn new(app_state: AppState) -> Self {
        Self { app_state }
    }

    /// Run the API server until shutdown.
    pub async fn run(self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.app_state.config.server.host, self.app_state.config.server.port
        );
        let enable_cors = self.app_state.config.server.enable_cors;
        let state = self.app_state.clone();

        tracing::info!("Starting API server on {}", bind_addr);

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(Condition::new(enable_cors, Cors::permissive()))
                .route("/api/report", web::get().to(report_handler))
                .route("/api/dates", web::get().to(dates_handler))
                .route("/api/health", web::get().to(health_handler))
                .route("/api/stats", web::get().to(stats_handler))
        })
        .bind(&bind_addr)
        .map_err(|e| DigestError::Internal {
            message: format!("Failed to bind server to {}: {}", bind_addr, e),
        })?
        .run()
        .await
        .map_err(|e| DigestError::Internal {
            message: format!("Server error: {}", e),
        })?;

        Ok(())
    }
}

/// Report lookup; defaults to the most recent report.
async fn report_handler(
    app_state: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> ActixResult<HttpResponse> {
    let result = match query.date.as_deref() {
        Some(date) => app_state.reports.get(date),
        None => app_state.reports.latest(),
    };

    match result {
        Ok(Some(report)) => Ok(HttpResponse::Ok().json(report)),
        Ok(None) => {
            let date = query.date.clone().unwrap_or_else(|| "latest".to_string());
            Ok(HttpResponse::NotFound().json(serde_json::json!({
                "error": "Report not found",
                "date": date,
            })))
        }
        Err(e) => {
            tracing::error!("Report lookup failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Report lookup failed",
                "message": e.to_string(),
            })))
        }
    }
}

/// Available report dates, most recent first.
async fn dates_handler(app_state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    match app_state.reports.list_dates() {
        Ok(dates) => Ok(HttpResponse::Ok().json(dates)),
        Err(e) => {
            tracing::error!("Date listing failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Date listing failed",
                "message": e.to_string(),
            })))
        }
    }
}

/// Health check endpoint handler
async fn health_handler(app_state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let history_status = match app_state.history.health_check() {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    let reports_status = match app_state.reports.health_check() {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let healthy = history_status == "healthy" && reports_status == "healthy";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        components: HealthComponents {
            history: history_status.to_string(),
            reports: reports_status.to_string(),
        },
    };

    if healthy {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(response))
    }
}

/// Statistics endpoint handler
async fn stats_handler(app_state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let latest = app_state.reports.latest().ok().flatten();
    let response = serde_json::json!({
        "tracked_identities": app_state.history.len(),
        "report_count": app_state.reports.len(),
        "latest_report": latest.map(|r| serde_json::json!({
            "date": r.date,
            "total_papers": r.total_papers,
            "matched_papers": r.matched_papers,
            "analyzed_papers": r.analyzed_papers,
        })),
    });
    Ok(HttpResponse::Ok().json(response))
}
