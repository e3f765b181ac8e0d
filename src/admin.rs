use std::num::NonZeroU32;

use chrono::Utc;
use data_encoding::BASE64;
use ring::{
    digest, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::models::AdminUser;

const ITERATIONS: NonZeroU32 = NonZeroU32::new(100_000).unwrap();
const SALT_LEN: usize = 16;
const HASH_LEN: usize = digest::SHA256_OUTPUT_LEN;
const SCHEME: &str = "pbkdf2-sha256";

/// Builds the seed account with its password hashed.
pub fn admin_user(password: &str, email: &str) -> Result<AdminUser, ring::error::Unspecified> {
    let now = Utc::now();
    Ok(AdminUser {
        name: "admin".to_owned(),
        password: hash_password(password)?,
        email: email.to_owned(),
        admin: true,
        disabled: false,
        created_at: now,
        updated_at: now,
    })
}

/// `pbkdf2-sha256$<iterations>$<salt>$<hash>`, salt and hash base64 encoded.
pub fn hash_password(password: &str) -> Result<String, ring::error::Unspecified> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new().fill(&mut salt)?;
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{SCHEME}${ITERATIONS}${}${}",
        BASE64.encode(&salt),
        BASE64.encode(&hash)
    ))
}

#[cfg(test)]
fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<NonZeroU32>() else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (BASE64.decode(salt.as_bytes()), BASE64.decode(hash.as_bytes()))
    else {
        return false;
    };
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}
