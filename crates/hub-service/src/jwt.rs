//! JWT session codec: HS256 access/refresh tokens keyed by participant id.
//!
//! `hub_core::auth` decides *whether* a session is granted; this module
//! owns the actual wire encoding, kept out of the core per `SPEC_FULL.md`'s
//! resolution of the JWT-ownership split.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    pub fn encode_access(&self, pid: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: pid.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    pub fn encode_refresh(&self, pid: &str, jti: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: pid.to_string(),
            jti: jti.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::days(REFRESH_TOKEN_TTL_DAYS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    pub fn decode_access(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode(token, &self.decoding_key, &validation)?.claims)
    }

    pub fn decode_refresh(&self, token: &str) -> Result<RefreshClaims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode(token, &self.decoding_key, &validation)?.claims)
    }
}

/// New random refresh-token id, minted each time a session is issued so a
/// stolen refresh token can be revoked without affecting others.
pub fn new_jti() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips() {
        let codec = JwtCodec::new(b"test-secret");
        let token = codec.encode_access("pid-a").unwrap();
        let claims = codec.decode_access(&token).unwrap();
        assert_eq!(claims.sub, "pid-a");
    }

    #[test]
    fn refresh_token_carries_jti() {
        let codec = JwtCodec::new(b"test-secret");
        let jti = new_jti();
        let token = codec.encode_refresh("pid-a", &jti).unwrap();
        let claims = codec.decode_refresh(&token).unwrap();
        assert_eq!(claims.jti, jti);
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let codec_a = JwtCodec::new(b"secret-a");
        let codec_b = JwtCodec::new(b"secret-b");
        let token = codec_a.encode_access("pid-a").unwrap();
        assert!(codec_b.decode_access(&token).is_err());
    }
}
