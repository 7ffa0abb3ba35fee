use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Shorter secrets are accepted but weaken HS256.
const RECOMMENDED_SECRET_LEN: usize = 32;
const ALGORITHM: &str = "HS256";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token secret is empty")]
    EmptySecret,

    #[error("jwt malformed")]
    Malformed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("jwt expired")]
    Expired { expired_at: DateTime<Utc> },

    #[error("jwt not active")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUser {
    pub id: String,
}

/// Claims carried by a member credential: `{ user: { id }, iat, exp }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub user: TokenUser,
    pub iat: u64,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

impl TokenClaims {
    pub fn new(user_id: impl Into<String>, issued_at_s: u64, ttl: Duration) -> Self {
        Self {
            user: TokenUser { id: user_id.into() },
            iat: issued_at_s,
            exp: issued_at_s.saturating_add(ttl.as_secs()),
            nbf: None,
        }
    }

    pub fn is_expired(&self, reference_s: u64) -> bool {
        reference_s >= self.exp
    }
}

/// Issues and verifies HS256 JSON Web Tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: Vec<u8>, ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if secret.len() < RECOMMENDED_SECRET_LEN {
            log::warn!(
                "JWT secret is {} bytes; at least {} bytes is recommended",
                secret.len(),
                RECOMMENDED_SECRET_LEN
            );
        }

        Ok(Self {
            secret: Arc::<[u8]>::from(secret),
            ttl,
        })
    }

    pub fn issue_for_user(&self, user_id: &str, issued_at_s: u64) -> Result<String, TokenError> {
        self.issue(&TokenClaims::new(user_id, issued_at_s, self.ttl))
    }

    pub fn issue(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    pub fn verify(&self, token: &str, reference_s: u64) -> Result<TokenClaims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };

        let header: TokenHeader = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: TokenClaims = decode_segment(payload_b64)?;

        if claims.is_expired(reference_s) {
            return Err(TokenError::Expired {
                expired_at: secs_to_datetime(claims.exp),
            });
        }

        if let Some(nbf) = claims.nbf {
            if nbf > reference_s {
                return Err(TokenError::NotYetValid {
                    not_before: secs_to_datetime(nbf),
                });
            }
        }

        Ok(claims)
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidSignature)?;
        mac.update(bytes);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

fn secs_to_datetime(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_secs() -> u64 {
    now_ms() / 1_000
}
