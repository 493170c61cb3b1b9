//! Wallet login and request authentication
//!
//! A wallet proves control of its key by signing a one-time challenge
//! string; the service answers with an HS256 JWT whose subject is the
//! wallet's public key.

use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use stellar_strkey::ed25519::PublicKey as StrkeyPublicKey;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::handlers::AppState;
use crate::models::{ChallengeResponse, TokenResponse};

pub const CHALLENGE_TTL_SECS: i64 = 300;
pub const TOKEN_TTL_SECS: i64 = 86_400;

/// JWT payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Owner public key
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    challenge: String,
    expires_at: DateTime<Utc>,
}

pub struct AuthService {
    jwt_secret: String,
    network_passphrase: String,
    challenge_ttl: Duration,
    challenges: Mutex<HashMap<String, PendingChallenge>>,
}

fn verifying_key(public_key: &str) -> ServiceResult<VerifyingKey> {
    let key = StrkeyPublicKey::from_string(public_key)
        .map_err(|_| ServiceError::bad_request("Invalid Stellar public key"))?;
    VerifyingKey::from_bytes(&key.0)
        .map_err(|_| ServiceError::bad_request("Invalid Stellar public key"))
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, network_passphrase: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            network_passphrase: network_passphrase.into(),
            challenge_ttl: Duration::seconds(CHALLENGE_TTL_SECS),
            challenges: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn issue_token(&self, public_key: &str) -> ServiceResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: public_key.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::Internal(format!("Failed to issue token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> ServiceResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            let message = match e.kind() {
                ErrorKind::ExpiredSignature => "Token has expired",
                ErrorKind::InvalidSignature => "Invalid token signature",
                _ => "Malformed token",
            };
            ServiceError::unauthorized(message)
        })
    }

    /// Issue a fresh challenge, replacing any pending one for the key.
    pub async fn create_challenge(&self, public_key: &str) -> ServiceResult<ChallengeResponse> {
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(ServiceError::bad_request("publicKey is required"));
        }
        verifying_key(public_key)?;

        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let challenge = format!("subfy-auth:{}:{}", public_key, hex::encode(nonce));
        let now = Utc::now();
        let expires_at = now + self.challenge_ttl;

        let mut challenges = self.challenges.lock().await;
        challenges.retain(|_, pending| pending.expires_at > now);
        challenges.insert(
            public_key.to_string(),
            PendingChallenge {
                challenge: challenge.clone(),
                expires_at,
            },
        );
        debug!("Issued challenge for {}", public_key);

        Ok(ChallengeResponse {
            challenge,
            network_passphrase: self.network_passphrase.clone(),
            expires_at,
        })
    }

    /// Check the signature over the pending challenge and issue a JWT.
    /// The challenge is consumed whatever the outcome.
    pub async fn verify_signature(
        &self,
        public_key: &str,
        signature_b64: &str,
    ) -> ServiceResult<TokenResponse> {
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(ServiceError::bad_request("publicKey is required"));
        }

        let pending = self
            .challenges
            .lock()
            .await
            .remove(public_key)
            .ok_or_else(|| {
                ServiceError::unauthorized(
                    "No pending challenge for this public key. Request a new one.",
                )
            })?;
        if Utc::now() > pending.expires_at {
            return Err(ServiceError::unauthorized("Challenge has expired"));
        }

        let key = verifying_key(public_key)
            .map_err(|_| ServiceError::unauthorized("Invalid Stellar public key"))?;
        let signature = STANDARD
            .decode(signature_b64.trim())
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
            .ok_or_else(|| ServiceError::unauthorized("Invalid message signature"))?;
        key.verify(pending.challenge.as_bytes(), &signature)
            .map_err(|_| ServiceError::unauthorized("Invalid message signature"))?;

        info!("Wallet {} authenticated", public_key);
        Ok(TokenResponse {
            token: self.issue_token(public_key)?,
            public_key: public_key.to_string(),
        })
    }
}

/// Authenticated owner public key, taken from the bearer JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity(pub String);

impl FromRequestParts<Arc<AppState>> for OwnerIdentity {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ServiceError::unauthorized("Missing authentication token"))?;

        let claims = state.auth.verify_token(token)?;
        Ok(OwnerIdentity(claims.sub))
    }
}

/// Require `Authorization: Bearer <expected>` when a token is configured.
pub fn check_internal_token(
    headers: &HeaderMap,
    expected: Option<&str>,
    message: &str,
) -> ServiceResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if provided != Some(format!("Bearer {}", expected).as_str()) {
        return Err(ServiceError::unauthorized(message));
    }
    Ok(())
}
