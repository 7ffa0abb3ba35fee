use actix_web::{http::header, web, HttpRequest, HttpResponse};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    auth_token::now_secs,
    db::{
        models::{normalize_email, Member, MemberProfile},
        MemberStore,
    },
    error::{AppError, Result},
    middleware::auth::{extract_bearer, AuthUser, TokenVerifier},
};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// `POST /api/auth/register`
pub async fn register<S: MemberStore>(
    req: web::Json<RegisterRequest>,
    db: web::ReqData<S>,
    verifier: web::Data<TokenVerifier>,
) -> Result<HttpResponse> {
    let tokens = verifier.token_service()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    let email = normalize_email(&req.email);
    if !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if db.find_by_email(&email).await?.is_some() {
        return Err(AppError::MemberExists);
    }

    let member = Member::new(name.to_string(), &email, &req.password)?;
    let member_id = db.insert(member).await?;
    let token = tokens.issue_for_user(&member_id.to_hex(), now_secs())?;

    log::info!("Member {} registered", member_id.to_hex());

    Ok(HttpResponse::Ok().json(LoginResponse {
        success: true,
        token,
    }))
}

/// `POST /api/auth/login`
pub async fn login<S: MemberStore>(
    req: web::Json<LoginRequest>,
    db: web::ReqData<S>,
    verifier: web::Data<TokenVerifier>,
) -> Result<HttpResponse> {
    let tokens = verifier.token_service()?;

    let member = db
        .find_by_email(&req.email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !member.verify_password(&req.password)? {
        log::warn!("Failed login attempt for {}", req.email);
        return Err(AppError::InvalidCredentials);
    }

    let member_id = member
        .id
        .ok_or_else(|| AppError::Internal("Stored member has no id".to_string()))?;

    db.update_last_login(&member_id).await?;
    let token = tokens.issue_for_user(&member_id.to_hex(), now_secs())?;

    log::info!("Member {} logged in", member_id.to_hex());

    Ok(HttpResponse::Ok().json(LoginResponse {
        success: true,
        token,
    }))
}

/// `GET /api/auth`: the authenticated member's profile.
pub async fn current_member<S: MemberStore>(
    user: web::ReqData<AuthUser>,
    db: web::ReqData<S>,
) -> Result<HttpResponse> {
    let member_id = ObjectId::parse_str(&user.id).map_err(|_| AppError::MemberNotFound)?;

    let member = db
        .find_by_id(&member_id)
        .await?
        .ok_or(AppError::MemberNotFound)?;

    let profile: MemberProfile = member.profile();
    Ok(HttpResponse::Ok().json(profile))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /api/auth/logout`. Tokens stay valid until they expire; this only
/// drops the cached verification so the next request is checked in full.
pub async fn logout(
    req: HttpRequest,
    user: web::ReqData<AuthUser>,
    verifier: web::Data<TokenVerifier>,
) -> Result<HttpResponse> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if let Ok(token) = extract_bearer(authorization) {
        verifier.forget(token);
    }

    log::info!("Member {} logged out", user.id);

    Ok(HttpResponse::Ok().json(LogoutResponse {
        success: true,
        message: "Logout successful".to_string(),
    }))
}
