//! Password verification and bearer token issuance.
//!
//! Tokens are HS256 JWTs. An access token authorizes API calls; a refresh
//! token can only be exchanged for a new access token.

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{AccessToken, TokenKind, TokenObtainRequest, TokenPair, UserRecord};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "No active account found with the given credentials";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// The caller behind a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_lifetime", &self.access_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], access_lifetime: Duration, refresh_lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            access_lifetime,
            refresh_lifetime,
        }
    }

    fn sign(&self, user_id: i64, username: &str, kind: TokenKind) -> AppResult<String> {
        let now = Utc::now();
        let lifetime = match kind {
            TokenKind::Access => self.access_lifetime,
            TokenKind::Refresh => self.refresh_lifetime,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            token_type: kind,
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AppError::Internal(format!("token signing failed: {}", err)))
    }

    pub fn issue_pair(&self, user: &UserRecord) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access: self.sign(user.id, &user.username, TokenKind::Access)?,
            refresh: self.sign(user.id, &user.username, TokenKind::Refresh)?,
        })
    }

    /// Decodes and checks signature, expiry and token kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> AppResult<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;
        if claims.token_type != expected {
            return Err(AppError::Unauthorized(format!(
                "Token has wrong type; expected {} token",
                expected.as_str()
            )));
        }
        Ok(claims)
    }

    pub fn authenticate(&self, access_token: &str) -> AppResult<AuthenticatedUser> {
        let claims = self.verify(access_token, TokenKind::Access)?;
        let user_id = claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Token contained no recognizable user identification".to_string()))?;
        Ok(AuthenticatedUser {
            user_id,
            username: claims.username,
        })
    }

    pub fn refresh(&self, refresh_token: &str) -> AppResult<AccessToken> {
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Token contained no recognizable user identification".to_string()))?;
        Ok(AccessToken {
            access: self.sign(user_id, &claims.username, TokenKind::Access)?,
        })
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|err| AppError::Internal(format!("failed to encode salt: {}", err)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("failed to hash password: {}", err)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Exchanges username and password for an access/refresh pair.
pub fn obtain_pair(db: &Database, tokens: &TokenService, request: &TokenObtainRequest) -> AppResult<TokenPair> {
    let user = db
        .get_user_by_username(&request.username)?
        .filter(|user| verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;
    tokens.issue_pair(&user)
}

/// Creates the bootstrap superuser unless one with that username exists.
/// Returns whether an account was created.
pub fn ensure_superuser(db: &Database, username: &str, email: &str, password: &str) -> AppResult<bool> {
    if db.get_user_by_username(username)?.is_some() {
        return Ok(false);
    }
    let password_hash = hash_password(password)?;
    db.create_user(username, email, &password_hash, true)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"test-secret", Duration::minutes(5), Duration::days(1))
    }

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("admin123").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("admin124", &hash));
        assert!(!verify_password("admin123", "not-a-phc-string"));
    }

    #[test]
    fn access_tokens_authenticate_and_refresh_tokens_do_not() {
        let db = Database::in_memory().expect("db");
        let user = db.create_user("ana", "", "unused", false).expect("user");
        let tokens = service();
        let pair = tokens.issue_pair(&user).expect("pair");

        let caller = tokens.authenticate(&pair.access).expect("access token valid");
        assert_eq!(caller, AuthenticatedUser { user_id: user.id, username: "ana".to_string() });
        assert!(matches!(tokens.authenticate(&pair.refresh), Err(AppError::Unauthorized(_))));

        let renewed = tokens.refresh(&pair.refresh).expect("refresh");
        assert!(tokens.authenticate(&renewed.access).is_ok());
        assert!(tokens.refresh(&pair.access).is_err());
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let user = UserRecord {
            id: 1,
            username: "ana".to_string(),
            email: String::new(),
            password_hash: String::new(),
            is_superuser: false,
            created_at: Utc::now(),
        };
        let expired = TokenService::new(b"test-secret", Duration::hours(-2), Duration::hours(-2));
        let pair = expired.issue_pair(&user).expect("pair");
        assert!(service().authenticate(&pair.access).is_err());

        let foreign = TokenService::new(b"other-secret", Duration::minutes(5), Duration::days(1));
        let pair = foreign.issue_pair(&user).expect("pair");
        assert!(service().authenticate(&pair.access).is_err());
        assert!(service().authenticate("garbage").is_err());
    }

    #[test]
    fn credentials_are_checked_and_superuser_bootstrap_is_idempotent() {
        let db = Database::in_memory().expect("db");
        assert!(ensure_superuser(&db, "admin", "admin@example.com", "s3cret").expect("create"));
        assert!(!ensure_superuser(&db, "admin", "admin@example.com", "other").expect("exists"));

        let tokens = service();
        let good = TokenObtainRequest {
            username: "admin".to_string(),
            password: "s3cret".to_string(),
        };
        assert!(obtain_pair(&db, &tokens, &good).is_ok());

        let bad = TokenObtainRequest {
            password: "other".to_string(),
            ..good
        };
        assert!(matches!(obtain_pair(&db, &tokens, &bad), Err(AppError::Unauthorized(_))));
    }
}
