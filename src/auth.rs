//! JWT issuance/verification and password hashing.
//!
//! Grounded on the teacher's `api/auth.rs`: PBKDF2-HMAC-SHA256 password
//! hashing with a `pbkdf2:<iterations>:<hex_salt>:<hex_hash>` storage
//! format, and `jsonwebtoken` for HS256 tokens. Spec §1 treats identity
//! issuance as an external collaborator "specified only at its interface"
//! — this module is that interface's one concrete implementation, in the
//! absence of an actual external identity provider.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Subject: the user id, as a string (JWT convention).
    sub: String,
    user_id: i64,
    iat: i64,
    exp: i64,
}

/// Issue a JWT for `user_id`, valid for `ttl`.
pub fn generate_token(user_id: i64, secret: &str, ttl_hours: i64) -> anyhow::Result<String> {
    let now = Utc::now();
    let exp = now + Duration::hours(ttl_hours.max(1));
    let claims = Claims {
        sub: user_id.to_string(),
        user_id,
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok(token)
}

/// Verify a JWT and return the `user_id` it carries (spec §8's token
/// round-trip property: `ParseToken(GenerateToken(uid)).user_id == uid`).
pub fn parse_token(token: &str, secret: &str) -> anyhow::Result<i64> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims.user_id)
}

/// Hash a password using PBKDF2-HMAC-SHA256, 100,000 iterations.
pub fn hash_password(password: &str) -> String {
    use hmac::Hmac;
    use pbkdf2::pbkdf2;
    use rand::RngCore;
    use sha2::Sha256;

    let iterations = 100_000u32;
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, iterations, &mut hash)
        .expect("PBKDF2 does not fail for valid key lengths");

    format!("pbkdf2:{}:{}:{}", iterations, hex::encode(salt), hex::encode(hash))
}

/// Verify `password` against a hash produced by [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> bool {
    use hmac::Hmac;
    use pbkdf2::pbkdf2;
    use sha2::Sha256;

    let parts: Vec<&str> = stored.split(':').collect();
    if parts.len() != 4 || parts[0] != "pbkdf2" {
        return false;
    }

    let Ok(iterations) = parts[1].parse::<u32>() else { return false };
    let Ok(salt) = hex::decode(parts[2]) else { return false };
    let Ok(expected) = hex::decode(parts[3]) else { return false };

    let mut computed = vec![0u8; expected.len()];
    if pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, iterations, &mut computed).is_err() {
        return false;
    }

    constant_time_eq(&computed, &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_the_user_id() {
        let token = generate_token(42, "secret", 24).unwrap();
        let user_id = parse_token(&token, "secret").unwrap();
        assert_eq!(user_id, 42);
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = generate_token(42, "secret", 24).unwrap();
        assert!(parse_token(&token, "other-secret").is_err());
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }
}
