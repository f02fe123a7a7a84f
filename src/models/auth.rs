// Access token claims

use serde::{Deserialize, Serialize};

/// Claims carried by every signed access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// User ID (subject)
    pub sub: String,

    /// JWT ID, the key used by the revocation blacklist
    pub jti: String,

    /// User email address
    pub email: String,

    /// User role (user, moderator, admin)
    pub role: String,

    /// Session this token belongs to
    pub sid: String,

    /// Token type discriminator; always "access" for this struct
    pub token_type: String,

    /// Audience
    pub aud: String,

    /// Issuer
    pub iss: String,

    /// Issued at (Unix epoch seconds)
    pub iat: u64,

    /// Not valid before (Unix epoch seconds)
    pub nbf: u64,

    /// Expires at (Unix epoch seconds)
    pub exp: u64,
}

impl AccessTokenClaims {
    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.exp < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_claims(iat: u64, exp: u64) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: Uuid::new_v4().to_string(),
            jti: Uuid::new_v4().to_string(),
            email: "alice@example.com".to_string(),
            role: "user".to_string(),
            sid: Uuid::new_v4().to_string(),
            token_type: "access".to_string(),
            aud: "lumina".to_string(),
            iss: "lumina".to_string(),
            iat,
            nbf: iat,
            exp,
        }
    }

    #[test]
    fn test_serialization_round_trip() {
        let claims = sample_claims(1_700_000_000, 1_700_000_900);
        let json = serde_json::to_string(&claims).unwrap();
        let back: AccessTokenClaims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims, back);
    }

    #[test]
    fn test_claim_fields_present() {
        let claims = sample_claims(0, 0);
        let value = serde_json::to_value(&claims).unwrap();
        let obj = value.as_object().unwrap();

        for field in [
            "sub",
            "jti",
            "email",
            "role",
            "sid",
            "token_type",
            "aud",
            "iss",
            "iat",
            "nbf",
            "exp",
        ] {
            assert!(obj.contains_key(field), "missing claim {}", field);
        }
    }

    #[test]
    fn test_expiry_check() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();

        assert!(sample_claims(now - 3600, now - 1).is_expired());
        assert!(!sample_claims(now, now + 900).is_expired());
    }
}
