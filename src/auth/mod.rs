use bitflags::bitflags;
use thiserror::Error;

use crate::models::User;
use crate::prelude::*;

pub mod hash;
pub mod hoops;
mod router;
pub mod session;

pub use hoops::{DepotAuthExt, RouterAuthExt};
pub use router::router;
pub use session::{SESSION_COOKIE_NAME, SessionId};

/// `users.verified` states.
pub const VERIFIED_NEW: i32 = 0;
pub const VERIFIED_MAIL_SENT: i32 = 1;
pub const VERIFIED_ACCEPTED: i32 = 100;

/// Window after a reset link is clicked during which the password may be
/// changed without the current one.
pub const FORGOT_GRACE_SECS: i64 = 300;

bitflags! {
    /// Capabilities of a caller, as exposed to page access rules and the
    /// `$lwsgs_auth` placeholder.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AuthLevel: u32 {
        const LOGGED_IN = 1;
        const ADMIN = 2;
        const VERIFIED = 4;
        const FORGOT_FLOW = 8;
    }
}

#[derive(Debug, Error, Clone, Copy, strum::IntoStaticStr)]
pub enum AuthError {
    #[error("No usable session")]
    NoSession,
    #[error("Page requires capabilities the caller does not have")]
    AccessDenied,
}

/// True while a consumed reset link still waives the current password.
pub fn within_forgot_grace(last_forgot_validated: i64, now: i64) -> bool {
    last_forgot_validated > now - FORGOT_GRACE_SECS
}

/// Compute the capability bitset for a caller. The admin identity is
/// synthetic and gets its bits without a `users` row.
pub fn auth_level(conn: &mut DbConn, username: &str) -> AppResult<AuthLevel> {
    let mut level = AuthLevel::empty();

    if !username.is_empty() {
        level |= AuthLevel::LOGGED_IN;
        if username == crate::config::get().admin_user {
            level |= AuthLevel::ADMIN | AuthLevel::VERIFIED;
        }
    }

    if let Some(user) = user_get(conn, username)? {
        if user.verified == VERIFIED_ACCEPTED {
            level |= AuthLevel::VERIFIED;
        }
        if within_forgot_grace(user.last_forgot_validated, now_secs()) {
            level |= AuthLevel::FORGOT_FLOW;
        }
    }

    Ok(level)
}

pub fn user_get(conn: &mut DbConn, name: &str) -> AppResult<Option<User>> {
    use crate::schema::users::dsl::*;

    Ok(users.filter(username.eq(name)).first(conn).optional()?)
}

pub fn user_get_by_email(
    conn: &mut DbConn,
    address: &str,
) -> AppResult<Option<User>> {
    use crate::schema::users::dsl::*;

    Ok(users.filter(email.eq(address)).first(conn).optional()?)
}

/// Look up a user by an outstanding token. `require_live_reset` narrows
/// the match to verified accounts whose reset token has not been consumed
/// or reaped, which is what the forgot flow needs.
pub fn user_get_by_token(
    conn: &mut DbConn,
    value: &str,
    require_live_reset: bool,
) -> AppResult<Option<User>> {
    use crate::schema::users::dsl::*;

    let query = users.filter(token.eq(value)).into_boxed();
    let query = if require_live_reset {
        query
            .filter(verified.eq(VERIFIED_ACCEPTED))
            .filter(token_time.ne(0))
    } else {
        query
    };
    Ok(query.first(conn).optional()?)
}
