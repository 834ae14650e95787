//! Bearer token validation for tokens issued by the external auth provider

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience the provider stamps on signed-in user tokens
pub const AUTHENTICATED_AUDIENCE: &str = "authenticated";

/// Claims we read from a Supabase access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id; the owner of every client and invoice they create
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default)]
    pub aud: Option<String>,
}

#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn with_supabase_secret(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUTHENTICATED_AUDIENCE]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, sub: Uuid, exp: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub,
        exp,
        aud: Some(AUTHENTICATED_AUDIENCE.to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "super-secret-jwt-key";

    fn future() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp() + 3600
    }

    #[test]
    fn test_valid_token_yields_owner() {
        let owner = Uuid::new_v4();
        let token = issue_test_token(SECRET, owner, future());
        let claims = JwtManager::with_supabase_secret(SECRET)
            .validate_access_token(&token)
            .unwrap();
        assert_eq!(claims.sub, owner);
    }

    #[test]
    fn test_wrong_secret_and_expired_rejected() {
        let manager = JwtManager::with_supabase_secret(SECRET);
        let forged = issue_test_token("other-secret", Uuid::new_v4(), future());
        assert!(manager.validate_access_token(&forged).is_err());

        let expired = issue_test_token(SECRET, Uuid::new_v4(), 1_000_000);
        assert!(manager.validate_access_token(&expired).is_err());
    }

    #[test]
    fn test_provider_claims_beyond_owner_are_ignored() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let owner = Uuid::new_v4();
        let provider_claims = serde_json::json!({
            "sub": owner,
            "email": "owner@example.com",
            "role": "authenticated",
            "exp": future(),
            "aud": AUTHENTICATED_AUDIENCE,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &provider_claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let claims = JwtManager::with_supabase_secret(SECRET)
            .validate_access_token(&token)
            .unwrap();
        assert_eq!(claims.sub, owner);
    }
}
