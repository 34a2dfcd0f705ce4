//! Credential generation
//!
//! Identifiers and passwords are base32 (RFC 4648, unpadded) encodings of bytes drawn from
//! the operating system's secure random source. The alphabet is `A-Z2-7`, so lower-cased
//! output can be embedded unescaped in SQL literals, ACL directives and URIs.

use data_encoding::BASE32_NOPAD;
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes behind a generated password
pub const PASSWORD_BYTES: usize = 16;

/// Encode `nbytes` random bytes as an unpadded base32 token.
///
/// Panics if the operating system cannot supply secure randomness; the broker has no
/// safe way to issue credentials without it.
pub fn random_token(nbytes: usize) -> String {
    let mut bytes = vec![0u8; nbytes];
    OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Generate a lower-case password from [`PASSWORD_BYTES`] random bytes
pub fn random_password() -> String {
    random_token(PASSWORD_BYTES).to_lowercase()
}
