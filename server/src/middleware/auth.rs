use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header,
    middleware::Next,
    web, HttpMessage,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth_token::{now_ms, TokenError, TokenService};
use crate::error::AuthError;

const BEARER_PREFIX: &str = "Bearer ";
/// Trailing characters of a token that identify its cache entry.
pub const CACHE_KEY_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierSettings {
    pub cache_ttl_ms: u64,
    pub prune_threshold: usize,
    pub log_throttle_ms: u64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            prune_threshold: 100,
            log_throttle_ms: 10_000,
        }
    }
}

/// Identity attached to authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    user: AuthUser,
    timestamp_ms: u64,
    log_timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub user: AuthUser,
    /// Accepted from the cache without cryptographic verification.
    pub cache_hit: bool,
    /// A verification log line was emitted for this request.
    pub logged: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct VerifierStats {
    pub verifications: u64,
    pub cache_hits: u64,
    pub cached_entries: usize,
}

/// Bearer-token authentication with a short-lived verification cache.
#[derive(Clone)]
pub struct TokenVerifier {
    tokens: Option<TokenService>,
    cache: Arc<DashMap<String, CacheEntry>>,
    settings: VerifierSettings,
    verifications: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
}

impl TokenVerifier {
    /// `tokens` is `None` when no secret is configured; every request then
    /// fails with [`AuthError::ConfigError`].
    pub fn new(tokens: Option<TokenService>, settings: VerifierSettings) -> Self {
        Self {
            tokens,
            cache: Arc::new(DashMap::new()),
            settings,
            verifications: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn token_service(&self) -> Result<&TokenService, AuthError> {
        self.tokens.as_ref().ok_or(AuthError::ConfigError)
    }

    pub fn authenticate(&self, authorization: Option<&str>) -> Result<AuthOutcome, AuthError> {
        self.authenticate_at(authorization, now_ms())
    }

    pub fn authenticate_at(
        &self,
        authorization: Option<&str>,
        now_ms: u64,
    ) -> Result<AuthOutcome, AuthError> {
        let token = extract_bearer(authorization)?;

        let tokens = self.tokens.as_ref().ok_or_else(|| {
            log::error!("JWT secret is not configured; rejecting authenticated request");
            AuthError::ConfigError
        })?;

        let key = cache_key(token);

        if let Some(entry) = self.cache.get(&key) {
            if self.is_fresh(&entry, now_ms) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(AuthOutcome {
                    user: entry.user.clone(),
                    cache_hit: true,
                    logged: false,
                });
            }
        }

        self.verifications.fetch_add(1, Ordering::Relaxed);
        let claims = tokens
            .verify(token, now_ms / 1_000)
            .map_err(classify_token_error)?;

        let user = AuthUser { id: claims.user.id };
        let logged = self.remember(key, &user, now_ms);
        if logged {
            log::info!("Token verified for user {}", user.id);
        }

        self.prune_stale(now_ms);

        Ok(AuthOutcome {
            user,
            cache_hit: false,
            logged,
        })
    }

    /// Drops the cached verification for a token so the next request re-verifies it.
    pub fn forget(&self, token: &str) -> bool {
        self.cache.remove(&cache_key(token)).is_some()
    }

    pub fn stats(&self) -> VerifierStats {
        VerifierStats {
            verifications: self.verifications.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cached_entries: self.cache.len(),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.timestamp_ms) < self.settings.cache_ttl_ms
    }

    // Returns whether this verification should be logged.
    fn remember(&self, key: String, user: &AuthUser, now_ms: u64) -> bool {
        match self.cache.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.user = user.clone();
                entry.timestamp_ms = now_ms;
                if now_ms.saturating_sub(entry.log_timestamp_ms) > self.settings.log_throttle_ms {
                    entry.log_timestamp_ms = now_ms;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    user: user.clone(),
                    timestamp_ms: now_ms,
                    log_timestamp_ms: now_ms,
                });
                true
            }
        }
    }

    fn prune_stale(&self, now_ms: u64) {
        if self.cache.len() <= self.settings.prune_threshold {
            return;
        }

        let before = self.cache.len();
        self.cache.retain(|_, entry| self.is_fresh(entry, now_ms));
        log::debug!(
            "Pruned {} stale token cache entries",
            before.saturating_sub(self.cache.len())
        );
    }
}

pub fn extract_bearer(authorization: Option<&str>) -> Result<&str, AuthError> {
    let token = authorization
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .ok_or(AuthError::NoToken)?;

    if token.is_empty() {
        return Err(AuthError::NoToken);
    }
    if token.contains(char::is_whitespace) {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

// Digest of the token suffix; neither the token nor its suffix is stored.
fn cache_key(token: &str) -> String {
    let start = token
        .char_indices()
        .rev()
        .nth(CACHE_KEY_CHARS - 1)
        .map(|(index, _)| index)
        .unwrap_or(0);
    URL_SAFE_NO_PAD.encode(Sha256::digest(&token.as_bytes()[start..]))
}

fn classify_token_error(err: TokenError) -> AuthError {
    match err {
        TokenError::Expired { expired_at } => {
            log::debug!("Rejected expired token (expired at {})", expired_at);
            AuthError::TokenExpired { expired_at }
        }
        TokenError::Malformed | TokenError::InvalidSignature => {
            log::warn!("Rejected invalid token: {}", err);
            AuthError::TokenInvalid
        }
        other => {
            log::error!("Unexpected token verification failure: {}", other);
            AuthError::Unexpected(other)
        }
    }
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let verifier = req
        .app_data::<web::Data<TokenVerifier>>()
        .cloned()
        .ok_or(AuthError::ConfigError)?;

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| AuthError::InvalidFormat))
        .transpose()?;

    let outcome = verifier.authenticate(authorization)?;

    // Available to handlers via `web::ReqData<AuthUser>`
    req.extensions_mut().insert(outcome.user);

    next.call(req).await
}
