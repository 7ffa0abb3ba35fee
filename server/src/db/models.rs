use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(rename = "date")]
    pub created_at: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime>,
}

impl Member {
    pub fn new(name: String, email: &str, password: &str) -> Result<Self> {
        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

        Ok(Self {
            id: None,
            name,
            email: normalize_email(email),
            password_hash,
            created_at: DateTime::now(),
            last_login: None,
        })
    }

    pub fn verify_password(&self, password: &str) -> Result<bool> {
        Ok(bcrypt::verify(password, &self.password_hash)?)
    }

    pub fn profile(&self) -> MemberProfile {
        MemberProfile {
            id: self.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: self.name.clone(),
            email: self.email.clone(),
            date: self.created_at.try_to_rfc3339_string().ok(),
        }
    }
}

/// Member as returned to clients; never carries the password hash.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub date: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
