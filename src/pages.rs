//! Serves the host's pages with identity placeholders spliced in and
//! per-prefix capability rules enforced.

use std::path::{Component, Path, PathBuf};

use salvo::fs::NamedFile;

use crate::auth::hoops::Identity;
use crate::auth::{self, AuthLevel};
use crate::interp::{Interpolator, PageVars};
use crate::prelude::*;

pub fn router() -> Router {
    Router::with_path("{*path}").with_session().get(serve_page)
}

#[handler]
async fn serve_page(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> AppResult<()> {
    let config = crate::config::get();

    let rel = sanitize(req.uri().path())
        .ok_or(ApiError::BadInput("invalid page path"))?;
    let identity = depot.identity().clone();

    if let Some(required) = required_mask(req.uri().path()) {
        let conn = &mut db::get()?;
        let level = auth::auth_level(conn, &identity.username)?;
        if !level.contains(required) {
            return Err(auth::AuthError::AccessDenied.into());
        }
    }

    let full = Path::new(&config.serve_dir).join(&rel);
    if !full.is_file() {
        res.render(StatusError::not_found());
        return Ok(());
    }

    if full.extension().is_some_and(|ext| ext == "html") {
        let raw = tokio::fs::read(&full).await.map_err(salvo::Error::Io)?;
        let vars = page_vars(&identity)?;
        let mut interp = Interpolator::new();
        let mut body = Vec::with_capacity(raw.len() + 64);
        interp.substitute(&vars, &raw, &mut body);
        interp.finish(&mut body);
        res.render(Text::Html(String::from_utf8_lossy(&body).into_owned()));
    } else {
        NamedFile::builder(full).send(req.headers(), res).await;
    }
    Ok(())
}

/// Longest configured prefix rule matching this path, if any.
fn required_mask(path: &str) -> Option<AuthLevel> {
    crate::config::get()
        .protected
        .iter()
        .filter(|guard| path.starts_with(&guard.prefix))
        .max_by_key(|guard| guard.prefix.len())
        .map(|guard| AuthLevel::from_bits_truncate(guard.required))
}

/// Normalize a request path into a safe relative file path.
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() {
        "index.html"
    } else {
        trimmed
    };
    let rel = PathBuf::from(trimmed);
    if rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(rel)
    } else {
        None
    }
}

fn page_vars(identity: &Identity) -> AppResult<PageVars> {
    let conn = &mut db::get()?;
    let level = auth::auth_level(conn, &identity.username)?;
    let email = auth::user_get(conn, &identity.username)?
        .map(|user| user.email)
        .unwrap_or_default();
    Ok(PageVars {
        user: identity.username.clone(),
        auth: level.bits(),
        email,
    })
}
