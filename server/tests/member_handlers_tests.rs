mod common;

use std::time::Duration;

use actix_web::{http::StatusCode, middleware::from_fn, test, web, App};
use common::{call_json, InMemoryMembers, MemberConnector};
use community_server::auth_token::{now_secs, TokenService};
use community_server::db::connection::{ConnectionManager, ConnectionSettings};
use community_server::handlers;
use community_server::middleware::auth::VerifierSettings;
use community_server::middleware::{auth_middleware, db_gate_middleware, TokenVerifier};
use mongodb::bson::oid::ObjectId;
use serde_json::json;

const SECRET: &[u8] = b"01234567890123456789012345678901";

fn tokens() -> TokenService {
    TokenService::new(SECRET.to_vec(), Duration::from_secs(3600)).expect("token service")
}

fn verifier() -> TokenVerifier {
    TokenVerifier::new(Some(tokens()), VerifierSettings::default())
}

macro_rules! member_app {
    ($verifier:expr, $store:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($verifier))
                .app_data(web::Data::new(ConnectionManager::new(
                    MemberConnector::new($store.clone()),
                    ConnectionSettings::default(),
                )))
                .service(
                    web::scope("/api/auth")
                        .service(
                            web::resource("/register")
                                .wrap(from_fn(db_gate_middleware::<MemberConnector>))
                                .route(web::post().to(handlers::register::<InMemoryMembers>)),
                        )
                        .service(
                            web::resource("/login")
                                .wrap(from_fn(db_gate_middleware::<MemberConnector>))
                                .route(web::post().to(handlers::login::<InMemoryMembers>)),
                        )
                        .service(
                            web::resource("")
                                .wrap(from_fn(db_gate_middleware::<MemberConnector>))
                                .wrap(from_fn(auth_middleware))
                                .route(web::get().to(handlers::current_member::<InMemoryMembers>)),
                        ),
                ),
        )
        .await
    };
}

fn login_request(email: &str, password: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": email, "password": password }))
}

fn profile_request(token: &str) -> test::TestRequest {
    test::TestRequest::get()
        .uri("/api/auth")
        .insert_header(("Authorization", format!("Bearer {token}")))
}

#[actix_web::test]
async fn test_login_issues_token_and_records_login() {
    let (store, id) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(verifier(), store);

    let req = login_request(" Asha@Example.org ", "password123").to_request();
    let (status, body) = call_json(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let token = body["token"].as_str().expect("token in body");
    let claims = tokens().verify(token, now_secs()).expect("issued token verifies");
    assert_eq!(claims.user.id, id.to_hex());
    assert!(store.get(&id).unwrap().last_login.is_some());
}

#[actix_web::test]
async fn test_login_rejects_unknown_email_and_wrong_password_alike() {
    let (store, id) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(verifier(), store);

    let req = login_request("nobody@example.org", "password123").to_request();
    let (status, unknown) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown["code"], "INVALID_CREDENTIALS");

    let req = login_request("asha@example.org", "not-it").to_request();
    let (status, wrong) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong, unknown);

    assert!(store.get(&id).unwrap().last_login.is_none());
}

#[actix_web::test]
async fn test_login_without_secret_is_config_error() {
    let (store, _) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(TokenVerifier::new(None, VerifierSettings::default()), store);

    let req = login_request("asha@example.org", "password123").to_request();
    let (status, body) = call_json(&app, req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "CONFIG_ERROR");
}

#[actix_web::test]
async fn test_current_member_returns_profile_without_hash() {
    let (store, id) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(verifier(), store);
    let token = tokens().issue_for_user(&id.to_hex(), now_secs()).unwrap();

    let req = profile_request(&token).to_request();
    let (status, body) = call_json(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.to_hex());
    assert_eq!(body["name"], "Asha");
    assert_eq!(body["email"], "asha@example.org");
    assert!(body.get("password").is_none());
    assert!(body.get("password_hash").is_none());
}

#[actix_web::test]
async fn test_current_member_with_non_object_id_is_not_found() {
    let (store, _) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(verifier(), store);
    let token = tokens().issue_for_user("member-1", now_secs()).unwrap();

    let req = profile_request(&token).to_request();
    let (status, body) = call_json(&app, req).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "MEMBER_NOT_FOUND");
}

#[actix_web::test]
async fn test_current_member_with_unknown_id_is_not_found() {
    let (store, _) = InMemoryMembers::with_member("Asha", "asha@example.org", "password123");
    let app = member_app!(verifier(), store);
    let token = tokens()
        .issue_for_user(&ObjectId::new().to_hex(), now_secs())
        .unwrap();

    let req = profile_request(&token).to_request();
    let (status, body) = call_json(&app, req).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "MEMBER_NOT_FOUND");
}

#[actix_web::test]
async fn test_register_creates_member_once() {
    let store = InMemoryMembers::default();
    let app = member_app!(verifier(), store);

    let register = || {
        test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "name": "Ravi",
                "email": "Ravi@Example.org",
                "password": "secret99",
            }))
            .to_request()
    };

    let (status, body) = call_json(&app, register()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.len(), 1);
    let token = body["token"].as_str().expect("token in body");
    let id = ObjectId::parse_str(tokens().verify(token, now_secs()).unwrap().user.id).unwrap();
    let member = store.get(&id).expect("stored member");
    assert_eq!(member.email, "ravi@example.org");
    assert!(member.verify_password("secret99").unwrap());

    let (status, body) = call_json(&app, register()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MEMBER_EXISTS");
    assert_eq!(store.len(), 1);

    let req = login_request("ravi@example.org", "secret99").to_request();
    let (status, _) = call_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn test_register_validates_input() {
    let store = InMemoryMembers::default();
    let app = member_app!(verifier(), store);

    for payload in [
        json!({ "name": " ", "email": "a@example.org", "password": "secret99" }),
        json!({ "name": "Ravi", "email": "not-an-email", "password": "secret99" }),
        json!({ "name": "Ravi", "email": "a@example.org", "password": "123" }),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(payload)
            .to_request();
        let (status, body) = call_json(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
    assert_eq!(store.len(), 0);
}
