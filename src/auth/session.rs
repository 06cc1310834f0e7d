use std::sync::atomic::{AtomicI64, Ordering};

use cookie::Cookie;
use thiserror::Error;

use crate::models::Session;
use crate::prelude::*;

use super::hash;

/// Name of the one cookie this subsystem issues and reads.
pub const SESSION_COOKIE_NAME: &str = "id";

/// Minimum spacing between expiry sweeps of the sessions table.
const SWEEP_INTERVAL_SECS: i64 = 5;

#[derive(Debug, Error)]
pub enum SidDecodeError {
    #[error("Invalid length: expected 40 chars, got {0}")]
    InvalidLength(usize),
    #[error("Invalid character in session id")]
    InvalidChar,
}

/// An opaque session identifier: exactly 40 lowercase hex chars.
///
/// Anything a client sends that does not parse into this type is treated
/// as "no session".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(hash::sha1_hex(&hash::rand20()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SidDecodeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.len() != 40 {
            return Err(SidDecodeError::InvalidLength(s.len()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(SidDecodeError::InvalidChar);
        }
        Ok(SessionId(s.to_owned()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the session id from the request cookie, if it carries a
/// well-formed one.
pub fn sid_from_request(req: &mut Request) -> Option<SessionId> {
    let cookie = req.cookie(SESSION_COOKIE_NAME)?;
    SessionId::try_from(cookie.value()).ok()
}

/// Build the session cookie: HttpOnly, host-wide, absolute expiry.
pub fn session_cookie(sid: &SessionId, expire: i64) -> Cookie<'static> {
    let max_age = (expire - now_secs()).max(0);
    Cookie::build((SESSION_COOKIE_NAME, sid.as_str().to_owned()))
        .path("/")
        .http_only(true)
        .max_age(cookie::time::Duration::seconds(max_age))
        .expires(
            cookie::time::OffsetDateTime::now_utc()
                + cookie::time::Duration::seconds(max_age),
        )
        .build()
}

/// A cookie that tells the browser to drop a dead session id.
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE_NAME, "");
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.make_removal();
    cookie
}

/// Absolute TTL for a session bound to `username` ("" = anonymous).
pub fn ttl_for(username: &str) -> i64 {
    let config = crate::config::get();
    if username.is_empty() {
        config.timeout_anon_absolute_secs
    } else {
        config.timeout_absolute_secs
    }
}

/// Insert a fresh session row and return its id alongside it.
pub fn create(
    conn: &mut DbConn,
    username: &str,
) -> AppResult<(SessionId, Session)> {
    use crate::schema::sessions::dsl::sessions;

    sweep(conn)?;

    let sid = SessionId::generate();
    let session = Session {
        name: sid.as_str().to_owned(),
        username: username.to_owned(),
        expire: now_secs() + ttl_for(username),
    };
    diesel::insert_into(sessions).values(&session).execute(conn)?;
    Ok((sid, session))
}

/// Find a live session; expired rows are never returned even if the
/// sweep has not reaped them yet.
pub fn lookup(conn: &mut DbConn, sid: &SessionId) -> AppResult<Option<Session>> {
    use crate::schema::sessions::dsl::*;

    sweep(conn)?;

    Ok(sessions
        .filter(name.eq(sid.as_str()))
        .filter(expire.gt(now_secs()))
        .first(conn)
        .optional()?)
}

/// Rebind an existing session row to `user` (or back to anonymous with
/// an empty string), restarting its absolute TTL.
pub fn rebind(
    conn: &mut DbConn,
    sid: &SessionId,
    user: &str,
) -> AppResult<Session> {
    use crate::schema::sessions::dsl as sessions_dsl;

    let new_expire = now_secs() + ttl_for(user);
    diesel::update(
        sessions_dsl::sessions.filter(sessions_dsl::name.eq(sid.as_str())),
    )
    .set((
        sessions_dsl::username.eq(user),
        sessions_dsl::expire.eq(new_expire),
    ))
    .execute(conn)?;

    Ok(Session {
        name: sid.as_str().to_owned(),
        username: user.to_owned(),
        expire: new_expire,
    })
}

pub fn delete(conn: &mut DbConn, sid: &SessionId) -> AppResult<()> {
    use crate::schema::sessions::dsl::*;

    diesel::delete(sessions.filter(name.eq(sid.as_str()))).execute(conn)?;
    Ok(())
}

static LAST_SWEEP: AtomicI64 = AtomicI64::new(0);

/// Lazy expiry sweep with hysteresis; called from every session-touching
/// operation. Races on the timestamp are benign, the delete is idempotent.
pub fn sweep(conn: &mut DbConn) -> AppResult<()> {
    let now = now_secs();
    let last = LAST_SWEEP.load(Ordering::Relaxed);
    if now - last < SWEEP_INTERVAL_SECS {
        return Ok(());
    }
    if LAST_SWEEP
        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return Ok(());
    }
    sweep_at(conn, now)
}

fn sweep_at(conn: &mut DbConn, now: i64) -> AppResult<()> {
    use crate::schema::sessions::dsl::*;

    diesel::delete(sessions.filter(expire.le(now))).execute(conn)?;
    Ok(())
}
