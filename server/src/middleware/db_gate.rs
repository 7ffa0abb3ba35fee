use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, HttpMessage,
};

use crate::config::AppConfig;
use crate::db::connection::{ConnectionManager, Connector};
use crate::error::AppError;

/// Makes sure the database is reachable before the wrapped handlers run.
///
/// On success the live connection is stored in the request extensions
/// (`web::ReqData<C::Connection>`). On failure the request is answered with
/// `DB_CONNECTION_ERROR`; the connection state snapshot is included unless the
/// app runs in production.
pub async fn db_gate_middleware<C: Connector>(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let manager = req
        .app_data::<web::Data<ConnectionManager<C>>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("Connection manager not available".to_string()))?;

    let verbose = req
        .app_data::<web::Data<AppConfig>>()
        .map(|config| config.verbose_errors())
        .unwrap_or(false);

    match manager.ensure_connected().await {
        Ok(connection) => {
            req.extensions_mut().insert(connection);
            next.call(req).await
        }
        Err(err) => {
            log::error!("Database unavailable for {}: {}", req.path(), err);
            let snapshot = verbose.then(|| manager.snapshot());
            Err(AppError::db_unavailable(err, snapshot).into())
        }
    }
}
