//! Access keys and signed download tokens.
//!
//! An access key is a short, non-secret checksum of an identity tuple that any
//! node can recompute. A download token is an HS256 JWT binding that key to an
//! expiry; possession of a valid token is the only authorization a download
//! needs.

use crate::services::error::{AuthError, StorageError, StorageResult};
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Lifetime of tokens embedded in download URLs.
pub const DOWNLOAD_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Claims carried by a download token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Access key of the object the token grants.
    pub ak: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
}

/// Derive the access key for an identity tuple: CRC-32 of
/// `bucket/key@schema` as eight lowercase hex digits.
pub fn derive_access_key(schema: &str, bucket: &str, key: &str) -> String {
    let raw = format!("{}/{}@{}", bucket, key, schema);
    format!("{:08x}", crc32fast::hash(raw.as_bytes()))
}

/// Issues and verifies download tokens with one signing secret.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority").finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Build an authority for `secret`. An empty secret is rejected.
    pub fn new(secret: &str) -> StorageResult<Self> {
        if secret.trim().is_empty() {
            return Err(StorageError::Configuration(
                "a token signing secret is required".into(),
            ));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn issue_token(&self, access_key: &str, ttl: Duration) -> Result<String, AuthError> {
        self.issue_token_at(access_key, ttl, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_token_at(
        &self,
        access_key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let ttl = TimeDelta::from_std(ttl).map_err(|e| AuthError::Signing(e.to_string()))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Signing("expiry out of range".into()))?;
        let claims = AccessClaims {
            ak: access_key.to_string(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as if the current time were `now` and return its access key.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against `now`, without leeway.
        validation.validate_exp = false;

        let data = decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::Invalid)?;
        if now.timestamp() > data.claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(data.claims.ak)
    }
}
