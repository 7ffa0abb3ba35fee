pub mod auth;
pub mod db_gate;

pub use auth::{auth_middleware, AuthUser, TokenVerifier};
pub use db_gate::db_gate_middleware;
