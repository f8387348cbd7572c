//! Access-token inspection
//!
//! Upstream access tokens are opaque JWTs. The gateway never verifies
//! their signatures; it only reads the `exp` claim to decide whether a
//! session may be constructed and when the lifecycle worker must refresh.

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::BotError;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
}

/// Decode the token's `exp` claim without verifying the signature.
pub fn expiry(token: &str) -> Result<i64, BotError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(b""), &validation)
        .map_err(|_| BotError::AccessTokenInvalid)?;
    Ok(data.claims.exp)
}

/// Seconds until the token expires; negative when already expired.
pub fn remaining_seconds(token: &str) -> Result<i64, BotError> {
    Ok(expiry(token)? - Utc::now().timestamp())
}

/// Reject tokens that are malformed or already expired.
pub fn ensure_fresh(token: &str) -> Result<(), BotError> {
    if expiry(token)? < Utc::now().timestamp() {
        return Err(BotError::AccessTokenExpired);
    }
    Ok(())
}
