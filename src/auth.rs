use anyhow::Result;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by actor tokens. Tokens are minted by the external
/// identity subsystem with the shared secret; this service only verifies
/// them and reads the actor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

/// Issue a token for an actor, valid for the given duration. Used by tests
/// and by deployments where this service doubles as the token minter.
pub fn issue_token(secret: &[u8], actor: Uuid, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims { sub: actor, exp };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a token and return its claims if valid and unexpired.
pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let actor = Uuid::new_v4();
        let token = issue_token(secret, actor, Duration::hours(1)).unwrap();
        let claims = verify_token(secret, &token).unwrap();
        assert_eq!(claims.sub, actor);
    }

    #[test]
    fn wrong_secret_and_garbage_fail() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_token(secret, Uuid::new_v4(), Duration::hours(1)).unwrap();
        assert!(verify_token(b"other-secret", &token).is_err());
        assert!(verify_token(secret, "not.a.token").is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_token(secret, Uuid::new_v4(), Duration::seconds(-90)).unwrap();
        assert!(verify_token(secret, &token).is_err());
    }
}
