use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::{
    db::connection::{ConnectionManager, ConnectionSnapshot, Connector},
    error::Result,
    middleware::auth::{TokenVerifier, VerifierStats},
};

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub database: ConnectionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<VerifierStats>,
}

/// `GET /health`. Answers 200 while the database is down so the process is not
/// restarted during an outage; `status` reports `degraded` instead.
pub async fn health_check<C: Connector>(
    db: web::Data<ConnectionManager<C>>,
    verifier: Option<web::Data<TokenVerifier>>,
) -> Result<HttpResponse> {
    let database = db.snapshot();
    let status = if database.is_connected {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthCheckResponse {
        status,
        database,
        auth: verifier.map(|verifier| verifier.stats()),
    };

    Ok(HttpResponse::Ok().json(response))
}
