use salvo::http::header::{LOCATION, SET_COOKIE};
use salvo::{Depot, FlowCtrl, Handler, async_trait};

use crate::prelude::*;

use super::session::{self, SessionId};
use super::{AuthError, AuthLevel};

/// Who the current request is, as resolved from its session cookie.
/// `username` is empty for anonymous callers.
#[derive(Clone, Debug)]
pub struct Identity {
    pub sid: SessionId,
    pub username: String,
}

pub trait DepotAuthExt {
    fn identity(&self) -> &Identity;
}

impl DepotAuthExt for Depot {
    fn identity(&self) -> &Identity {
        self.get::<Identity>("identity")
            .expect("Needs session hoop")
    }
}

fn set_identity(depot: &mut Depot, identity: Identity) {
    depot.insert("identity", identity);
}

/// Resolve the caller's session, issuing an anonymous one when none is
/// presented. A presented-but-dead session id is answered with a 303 back
/// to the same URL carrying a removal cookie and a fresh anonymous one,
/// so the client retries with usable state.
#[handler]
pub async fn session_hoop(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
    ctrl: &mut FlowCtrl,
) {
    match resolve_session(req, res) {
        Ok(Some(identity)) => set_identity(depot, identity),
        Ok(None) => ctrl.skip_rest(),
        Err(err) => {
            err.render(res);
            ctrl.skip_rest();
        }
    }
}

fn resolve_session(
    req: &mut Request,
    res: &mut Response,
) -> AppResult<Option<Identity>> {
    let conn = &mut db::get()?;

    if let Some(sid) = session::sid_from_request(req) {
        if let Some(found) = session::lookup(conn, &sid)? {
            return Ok(Some(Identity {
                sid,
                username: found.username,
            }));
        }

        tracing::info!(%sid, "session lookup failed, probably expired");
        let (anon_sid, anon) = session::create(conn, "")?;
        res.status_code(StatusCode::SEE_OTHER);
        res.add_header(LOCATION, req.uri().to_string(), true)?;
        // stale cookie removal must precede the replacement
        res.add_header(
            SET_COOKIE,
            session::removal_cookie().to_string(),
            false,
        )?;
        res.add_header(
            SET_COOKIE,
            session::session_cookie(&anon_sid, anon.expire).to_string(),
            false,
        )?;
        return Ok(None);
    }

    let (sid, anon) = session::create(conn, "")?;
    res.add_header(
        SET_COOKIE,
        session::session_cookie(&sid, anon.expire).to_string(),
        false,
    )?;
    Ok(Some(Identity {
        sid,
        username: String::new(),
    }))
}

/// Page gate: grants access iff the caller holds every bit of the
/// required mask.
pub struct RequireAuth(pub AuthLevel);

#[async_trait]
impl Handler for RequireAuth {
    async fn handle(
        &self,
        _req: &mut Request,
        depot: &mut Depot,
        res: &mut Response,
        ctrl: &mut FlowCtrl,
    ) {
        let outcome = (|| -> AppResult<bool> {
            let conn = &mut db::get()?;
            let level =
                super::auth_level(conn, &depot.identity().username)?;
            Ok(level.contains(self.0))
        })();

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                ApiError::from(AuthError::AccessDenied).render(res);
                ctrl.skip_rest();
            }
            Err(err) => {
                err.render(res);
                ctrl.skip_rest();
            }
        }
    }
}

pub trait RouterAuthExt {
    /// see [session_hoop]
    fn with_session(self) -> Self;
    /// see [session_hoop] and [RequireAuth]
    fn require_auth(self, required: AuthLevel) -> Self;
}

impl RouterAuthExt for Router {
    fn with_session(self) -> Self {
        self.hoop(session_hoop)
    }

    fn require_auth(self, required: AuthLevel) -> Self {
        self.hoop(session_hoop).hoop(RequireAuth(required))
    }
}
