pub mod detection;
pub mod error;
pub mod health;


use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde_json::json;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index));
    health::configure(cfg);
    detection::configure(cfg);
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": health::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": Utc::now(),
    }))
}

/// Fallback for unmatched paths, installed with `App::default_service`.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "Endpoint not found" }))
}
