pub mod auth;
pub mod health;

use actix_web::{middleware::from_fn, web};

use crate::db::{MongoConnection, MongoConnector};
use crate::middleware::{auth_middleware, db_gate_middleware};

pub use auth::{current_member, login, logout, register};
pub use health::health_check;

/// Route table. Authentication runs before the database gate.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check::<MongoConnector>))
        .service(
            web::scope("/api/auth")
                .service(
                    web::resource("/register")
                        .wrap(from_fn(db_gate_middleware::<MongoConnector>))
                        .route(web::post().to(register::<MongoConnection>)),
                )
                .service(
                    web::resource("/login")
                        .wrap(from_fn(db_gate_middleware::<MongoConnector>))
                        .route(web::post().to(login::<MongoConnection>)),
                )
                .service(
                    web::resource("/logout")
                        .wrap(from_fn(auth_middleware))
                        .route(web::post().to(logout)),
                )
                .service(
                    web::resource("")
                        .wrap(from_fn(db_gate_middleware::<MongoConnector>))
                        .wrap(from_fn(auth_middleware))
                        .route(web::get().to(current_member::<MongoConnection>)),
                ),
        );
}
