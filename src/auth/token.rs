// Bearer token issuance, validation and refresh (HS256 JWT)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::core::errors::TokenError;
use crate::core::models::{HouseholdId, Role, User, UserId};

pub const ISSUER: &str = "choreme";
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Identity carried by every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub household_id: HouseholdId,
    pub role: Role,
    pub email: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    pub ttl: Duration,
    /// Refresh is only allowed once remaining validity drops under this window
    pub refresh_window: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            refresh_window: Duration::hours(1),
        }
    }
}

/// Signs and verifies tokens with a symmetric secret fixed at construction
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    settings: TokenSettings,
}

impl TokenService {
    pub fn new(secret: &SecretString, settings: TokenSettings) -> Self {
        let bytes = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked before the signature, see `validate_at`
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);

        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            validation,
            settings,
        }
    }

    pub fn settings(&self) -> TokenSettings {
        self.settings
    }

    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        self.issue_at(user, Utc::now())
    }

    /// Issue a token as if the current time were `issued_at`
    pub fn issue_at(&self, user: &User, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            user_id: user.id,
            household_id: user.household_id,
            role: user.role,
            email: user.email.clone(),
            iss: ISSUER.to_string(),
            sub: user.id.to_string(),
            iat: 0,
            exp: 0,
        };
        self.sign(claims, issued_at)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Decode and verify a token.
    ///
    /// Checks run in order: header and algorithm, expiry, then signature and
    /// issuer. An expired token is reported as `Expired` whatever its signature.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != ALGORITHM {
            return Err(TokenError::InvalidSignature);
        }

        let unverified = peek_claims(token)?;
        if now.timestamp() >= unverified.exp {
            return Err(TokenError::Expired);
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    pub fn refresh(&self, token: &str) -> Result<String, TokenError> {
        self.refresh_at(token, Utc::now())
    }

    /// Re-sign the same claims with a fresh validity window.
    /// Only allowed once less than the refresh window remains.
    pub fn refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = self.validate_at(token, now)?;
        let remaining = claims.exp - now.timestamp();
        if remaining > self.settings.refresh_window.num_seconds() {
            return Err(TokenError::NotEligible);
        }
        self.sign(claims, now)
    }

    fn sign(&self, mut claims: Claims, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        claims.iat = issued_at.timestamp();
        claims.exp = (issued_at + self.settings.ttl).timestamp();
        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Read the payload without verifying the signature
fn peek_claims(token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(TokenError::Malformed("expected three segments".to_string())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload encoding: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("payload: {}", e)))
}
