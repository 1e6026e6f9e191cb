//! HS256 tokens for panel users and shop customers

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::error::AppError;

/// Panel users own sites; customers buy from them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User or customer id
    pub sub: String,
    pub kind: PrincipalKind,
    /// Customers are scoped to one site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<i64>,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
    pub iat: usize,
}

/// Authenticated caller, put into request extensions by the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub kind: PrincipalKind,
    pub site_id: Option<i64>,
    pub is_admin: bool,
}

impl Identity {
    pub fn customer_id(&self) -> Result<i64, AppError> {
        match self.kind {
            PrincipalKind::Customer => Ok(self.id),
            PrincipalKind::User => Err(AppError::forbidden("customer token required")),
        }
    }

    pub fn user_id(&self) -> Result<i64, AppError> {
        match self.kind {
            PrincipalKind::User => Ok(self.id),
            PrincipalKind::Customer => Err(AppError::forbidden("user token required")),
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.kind == PrincipalKind::User && self.is_admin {
            Ok(())
        } else {
            Err(AppError::admin_required())
        }
    }

    /// Owner of the resource, or an admin
    pub fn require_owner(&self, owner_id: i64) -> Result<(), AppError> {
        let user_id = self.user_id()?;
        if self.is_admin || user_id == owner_id {
            Ok(())
        } else {
            Err(AppError::forbidden("not the owner"))
        }
    }

    /// A customer token may only act on its own site
    pub fn require_site(&self, site_id: i64) -> Result<(), AppError> {
        match (self.kind, self.site_id) {
            (PrincipalKind::Customer, Some(own)) if own != site_id => {
                Err(AppError::forbidden("token belongs to another site"))
            }
            _ => Ok(()),
        }
    }

    /// Panel user managing `site_id` (the site claim of its token), or an admin
    pub fn require_site_owner(&self, site_id: i64) -> Result<(), AppError> {
        self.user_id()?;
        if self.is_admin || self.site_id == Some(site_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("site is managed by another user"))
        }
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService").field("ttl", &self.ttl).finish()
    }
}

impl JwtService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
        let claims = Claims {
            sub: identity.id.to_string(),
            kind: identity.kind,
            site_id: identity.site_id,
            is_admin: identity.is_admin,
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::token_expired(),
                _ => {
                    tracing::debug!("JWT validation failed: {e}");
                    AppError::invalid_token("invalid token")
                }
            },
        )?;
        let claims = data.claims;
        let id = claims
            .sub
            .parse()
            .map_err(|_| AppError::invalid_token("subject is not an id"))?;
        Ok(Identity {
            id,
            kind: claims.kind,
            site_id: claims.site_id,
            // 只有面板用户可以是管理员
            is_admin: claims.is_admin && claims.kind == PrincipalKind::User,
        })
    }
}
