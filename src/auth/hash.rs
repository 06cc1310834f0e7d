//! SHA-1 based credential primitives.
//!
//! SHA-1 is kept for compatibility with existing session databases; the
//! hex layout of `pwhash`, `pwsalt`, tokens, and session ids is part of
//! the on-disk contract.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::models::User;

/// 40 lowercase hex chars.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

pub fn rand20() -> [u8; 20] {
    rand::random()
}

pub fn new_salt() -> String {
    sha1_hex(&rand20())
}

pub fn new_token() -> String {
    sha1_hex(&rand20())
}

/// Hash a password with the per-user salt and the deployment-wide
/// confounder: `sha1_hex("{password}-{confounder}-{salt}")`.
pub fn password_hash(password: &str, confounder: &str, salt: &str) -> String {
    sha1_hex(format!("{password}-{confounder}-{salt}").as_bytes())
}

/// Constant-time hash comparison
pub fn hash_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

pub fn check_credentials(
    user: &User,
    password: &str,
    confounder: &str,
) -> bool {
    hash_eq(&password_hash(password, confounder, &user.pwsalt), &user.pwhash)
}

/// The admin identity is configured, never stored; its password hash is
/// bare sha1 with no salt, matching pre-existing deployments.
pub fn check_admin(username: &str, password: &str) -> bool {
    let config = crate::config::get();
    username == config.admin_user
        && hash_eq(
            &sha1_hex(password.as_bytes()),
            &config.admin_password_sha1,
        )
}
