// Access token service
// Mints and validates short-lived EdDSA-signed tokens. Signing uses a
// process-local Ed25519 private key; anything holding the public key can
// verify. Callers still consult the blacklist and session store before
// trusting validated claims.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::AccessTokenClaims;
use crate::models::user::UserRole;

#[derive(Error, Debug)]
pub enum AccessTokenError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("Token is not an access token")]
    WrongTokenType,
}

impl From<jsonwebtoken::errors::Error> for AccessTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AccessTokenError::Expired,
            ErrorKind::ImmatureSignature => AccessTokenError::Invalid,
            _ => AccessTokenError::Invalid,
        }
    }
}

#[derive(Clone)]
pub struct AccessTokenConfig {
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
    /// Lifetime in seconds.
    pub ttl: u64,
    pub audience: String,
    pub issuer: String,
}

impl std::fmt::Debug for AccessTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenConfig")
            .field("encoding_key", &"<redacted>")
            .field("decoding_key", &"<redacted>")
            .field("ttl", &self.ttl)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl AccessTokenConfig {
    /// Build from PEM key material in the app configuration.
    pub fn from_settings(
        settings: &crate::app_config::JwtSettings,
    ) -> Result<Self, AccessTokenError> {
        let encoding_key = EncodingKey::from_ed_pem(settings.private_key_pem.as_bytes())
            .map_err(|e| AccessTokenError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_ed_pem(settings.public_key_pem.as_bytes())
            .map_err(|e| AccessTokenError::InvalidKey(e.to_string()))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            ttl: settings.access_ttl,
            audience: settings.audience.clone(),
            issuer: settings.issuer.clone(),
        })
    }

    /// Generate a throwaway Ed25519 keypair. For tests.
    pub fn ephemeral(ttl: u64) -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
            .expect("ed25519 keypair generation");
        let keypair = ring::signature::Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .expect("ed25519 keypair parse");

        use ring::signature::KeyPair;
        Self {
            encoding_key: EncodingKey::from_ed_der(pkcs8.as_ref()),
            decoding_key: DecodingKey::from_ed_der(keypair.public_key().as_ref()),
            ttl,
            audience: "lumina-test".to_string(),
            issuer: "lumina-test".to_string(),
        }
    }
}

pub struct AccessTokenService {
    config: AccessTokenConfig,
}

impl AccessTokenService {
    pub fn new(config: AccessTokenConfig) -> Self {
        Self { config }
    }

    pub fn ttl(&self) -> u64 {
        self.config.ttl
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Mint a signed access token for an authenticated user.
    pub fn generate(
        &self,
        user_id: Uuid,
        email: &str,
        role: UserRole,
        session_id: Uuid,
    ) -> Result<(String, AccessTokenClaims), AccessTokenError> {
        let now = Self::now();

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.as_str().to_string(),
            sid: session_id.to_string(),
            token_type: "access".to_string(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now + self.config.ttl,
        };

        let header = Header::new(Algorithm::EdDSA);
        let token = encode(&header, &claims, &self.config.encoding_key)
            .map_err(|e| AccessTokenError::Encoding(e.to_string()))?;

        Ok((token, claims))
    }

    /// Full validation: signature, issuer, audience, expiry, not-before,
    /// and the token-type discriminator.
    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims, AccessTokenError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<AccessTokenClaims>(token, &self.config.decoding_key, &validation)?;

        if data.claims.token_type != "access" {
            return Err(AccessTokenError::WrongTokenType);
        }

        Ok(data.claims)
    }

    /// Parse a token's JTI without validating it. Used on logout, where an
    /// expired-but-well-formed token must still be blacklistable.
    pub fn extract_token_id(&self, token: &str) -> Result<String, AccessTokenError> {
        Ok(self.decode_unverified(token)?.jti)
    }

    /// Parse a token's session id without validating it.
    pub fn extract_session_id(&self, token: &str) -> Result<String, AccessTokenError> {
        Ok(self.decode_unverified(token)?.sid)
    }

    /// Parse a token's expiry without validating it.
    pub fn token_expiration(
        &self,
        token: &str,
    ) -> Result<chrono::DateTime<chrono::Utc>, AccessTokenError> {
        let claims = self.decode_unverified(token)?;
        chrono::DateTime::from_timestamp(claims.exp as i64, 0).ok_or(AccessTokenError::Invalid)
    }

    fn decode_unverified(&self, token: &str) -> Result<AccessTokenClaims, AccessTokenError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = decode::<AccessTokenClaims>(token, &self.config.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AccessTokenService {
        AccessTokenService::new(AccessTokenConfig::ephemeral(900))
    }

    #[test]
    fn test_generate_and_validate() {
        let service = service();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let (token, minted) = service
            .generate(user_id, "alice@example.com", UserRole::User, session_id)
            .unwrap();

        let claims = service.validate(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.sid, session_id.to_string());
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.jti, minted.jti);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = service();
        let theirs = service();

        let (token, _) = theirs
            .generate(Uuid::new_v4(), "x@example.com", UserRole::User, Uuid::new_v4())
            .unwrap();

        assert!(matches!(
            ours.validate(&token),
            Err(AccessTokenError::Invalid)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(service().validate("not.a.token").is_err());
        assert!(service().validate("").is_err());
    }

    #[test]
    fn test_extract_without_validation() {
        let service = service();
        let (token, minted) = service
            .generate(Uuid::new_v4(), "a@example.com", UserRole::Admin, Uuid::new_v4())
            .unwrap();

        assert_eq!(service.extract_token_id(&token).unwrap(), minted.jti);

        let exp = service.token_expiration(&token).unwrap();
        assert_eq!(exp.timestamp() as u64, minted.exp);
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let mut config = AccessTokenConfig::ephemeral(900);
        let service = AccessTokenService::new(config.clone());
        let (token, _) = service
            .generate(Uuid::new_v4(), "a@example.com", UserRole::User, Uuid::new_v4())
            .unwrap();

        config.audience = "someone-else".to_string();
        let other = AccessTokenService::new(config);
        assert!(other.validate(&token).is_err());
    }
}
