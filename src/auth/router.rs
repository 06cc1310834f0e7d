use salvo::http::header::{LOCATION, SET_COOKIE};

use crate::mailer::{self, compose};
use crate::models::User;
use crate::prelude::*;

use super::session::{self, SessionId};
use super::{VERIFIED_ACCEPTED, VERIFIED_MAIL_SENT, VERIFIED_NEW, hash};
use super::{user_get, user_get_by_email, user_get_by_token};

pub fn router() -> Router {
    Router::new()
        .append(&mut vec![
            Router::with_path("login").post(login),
            Router::with_path("logout").post(logout),
            Router::with_path("confirm").get(confirm),
            Router::with_path("forgot").get(forgot),
            Router::with_path("change").post(change),
            Router::with_path("check").get(check),
        ])
        .oapi_tag("auth")
}

/// The full set of form fields any auth endpoint understands; unknown
/// fields are ignored. Which ones are required depends on the flow.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
struct AuthForm {
    username: Option<String>,
    password: Option<String>,
    #[allow(dead_code)]
    password2: Option<String>,
    email: Option<String>,
    register: Option<String>,
    good: Option<String>,
    bad: Option<String>,
    #[serde(rename = "reg-good")]
    reg_good: Option<String>,
    #[serde(rename = "reg-bad")]
    reg_bad: Option<String>,
    admin: Option<String>,
    forgot: Option<String>,
    #[serde(rename = "forgot-good")]
    forgot_good: Option<String>,
    #[serde(rename = "forgot-bad")]
    forgot_bad: Option<String>,
    #[serde(rename = "forgot-post-good")]
    forgot_post_good: Option<String>,
    #[serde(rename = "forgot-post-bad")]
    forgot_post_bad: Option<String>,
    #[allow(dead_code)]
    change: Option<String>,
    curpw: Option<String>,
}

#[derive(Debug, Validate)]
struct RegisterInput {
    #[validate(custom(function = "crate::validate::username"))]
    username: String,
    #[validate(custom(function = "crate::validate::password"))]
    password: String,
    #[validate(email, length(max = 99))]
    email: String,
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn required(value: Option<String>, what: &'static str) -> AppResult<String> {
    value.filter(|v| !v.is_empty()).ok_or(ApiError::BadInput(what))
}

fn client_ip(req: &Request) -> String {
    let mut ip = req
        .remote_addr()
        .to_owned()
        .into_std()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    ip.truncate(45);
    ip
}

/// Emit the standard completion: 303 with the onward target and the
/// session cookies, stale removal strictly before the replacement.
fn see_other(
    res: &mut Response,
    onward: &str,
    drop_stale: bool,
    install: Option<(&SessionId, i64)>,
) -> AppResult<()> {
    res.status_code(StatusCode::SEE_OTHER);
    res.add_header(LOCATION, onward, true)?;
    if drop_stale {
        res.add_header(
            SET_COOKIE,
            session::removal_cookie().to_string(),
            false,
        )?;
    }
    if let Some((sid, expire)) = install {
        res.add_header(
            SET_COOKIE,
            session::session_cookie(sid, expire).to_string(),
            false,
        )?;
    }
    Ok(())
}

/// Bind the caller to `username`: upgrade a presented live session in
/// place, otherwise replace whatever was presented with a fresh one.
fn grant(
    req: &mut Request,
    res: &mut Response,
    username: &str,
    onward: &str,
) -> AppResult<()> {
    let conn = &mut db::get()?;
    let presented = session::sid_from_request(req);
    if let Some(sid) = &presented {
        if session::lookup(conn, sid)?.is_some() {
            let updated = session::rebind(conn, sid, username)?;
            return see_other(res, onward, false, Some((sid, updated.expire)));
        }
    }
    let (sid, created) = session::create(conn, username)?;
    see_other(
        res,
        onward,
        presented.is_some(),
        Some((&sid, created.expire)),
    )
}

/// Drop any presented session and issue a fresh anonymous one.
fn reissue_anonymous(
    req: &mut Request,
    res: &mut Response,
    onward: &str,
) -> AppResult<()> {
    let conn = &mut db::get()?;
    let stale = session::sid_from_request(req);
    if let Some(sid) = &stale {
        session::delete(conn, sid)?;
    }
    let (sid, anon) = session::create(conn, "")?;
    see_other(res, onward, stale.is_some(), Some((&sid, anon.expire)))
}

/// Login, registration (`register=1`), or forgot-password initiation
/// (`forgot=1`), selected by the submitted fields.
#[handler]
async fn login(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let form: AuthForm = req.parse_form().await?;

    if is_set(&form.forgot) {
        return forgot_initiate(req, res, form);
    }

    let (Some(username), Some(password)) =
        (form.username.clone(), form.password.clone())
    else {
        return Err(ApiError::BadInput("username and password are required"));
    };

    if is_set(&form.register) {
        return register(req, res, form, username, password);
    }

    // admin is synthetic and checked before the user table
    if hash::check_admin(&username, &password) {
        let onward =
            required(form.admin.or(form.good), "admin or good target url")?;
        return grant(req, res, &username, &onward);
    }

    let conn = &mut db::get()?;
    let confounder = &crate::config::get().confounder;
    let accepted = user_get(conn, &username)?
        .is_some_and(|user| hash::check_credentials(&user, &password, confounder));

    if accepted {
        let onward = required(form.good, "good target url")?;
        grant(req, res, &username, &onward)
    } else {
        tracing::info!(%username, "credentials check failed");
        let onward = required(form.bad, "bad target url")?;
        see_other(res, &onward, false, None)
    }
}

fn register(
    req: &mut Request,
    res: &mut Response,
    form: AuthForm,
    username: String,
    password: String,
) -> AppResult<()> {
    let reg_good = required(form.reg_good, "reg-good and reg-bad targets")?;
    let reg_bad = required(form.reg_bad, "reg-good and reg-bad targets")?;

    let Some(email) = form.email.filter(|e| !e.is_empty()) else {
        return reissue_anonymous(req, res, &reg_bad);
    };
    let input = RegisterInput {
        username,
        password,
        email,
    };

    let config = crate::config::get();
    let conn = &mut db::get()?;
    let rejected = input.validate().is_err()
        || input.username == config.admin_user
        || user_get(conn, &input.username)?.is_some()
        || user_get_by_email(conn, &input.email)?.is_some();
    if rejected {
        tracing::info!(username = %input.username, "registration rejected");
        return reissue_anonymous(req, res, &reg_bad);
    }

    let now = now_secs();
    let ip = client_ip(req);
    let pwsalt = hash::new_salt();
    let pwhash = hash::password_hash(&input.password, &config.confounder, &pwsalt);
    let token = hash::new_token();

    let user = User {
        username: input.username.clone(),
        creation_time: now,
        ip: ip.clone(),
        email: input.email.clone(),
        pwhash,
        pwsalt,
        pwchange_time: 0,
        token: token.clone(),
        verified: VERIFIED_NEW,
        token_time: now,
        last_forgot_validated: 0,
    };
    {
        use crate::schema::users::dsl::users;
        diesel::insert_into(users).values(&user).execute(conn)?;
    }

    let content =
        compose::registration(&input.username, &input.email, &ip, &token);
    mailer::enqueue(conn, &input.username, &content)?;
    mailer::check();

    tracing::info!(username = %input.username, "registered new user");
    reissue_anonymous(req, res, &reg_good)
}

fn forgot_initiate(
    req: &mut Request,
    res: &mut Response,
    form: AuthForm,
) -> AppResult<()> {
    let forgot_good = required(form.forgot_good, "forgot targets")?;
    let forgot_bad = required(form.forgot_bad, "forgot targets")?;
    let post_good = required(form.forgot_post_good, "forgot targets")?;
    let post_bad = required(form.forgot_post_bad, "forgot targets")?;
    if !is_set(&form.username) && !is_set(&form.email) {
        return Err(ApiError::BadInput("username or email is required"));
    }

    let conn = &mut db::get()?;
    let user = if let Some(username) = form.username.filter(|v| !v.is_empty())
    {
        user_get(conn, &username)?
    } else if let Some(email) = form.email.filter(|v| !v.is_empty()) {
        user_get_by_email(conn, &email)?
    } else {
        None
    };
    let Some(user) = user else {
        return see_other(res, &forgot_bad, false, None);
    };

    let reset_token = hash::new_token();
    let content = compose::password_reset(
        &user.username,
        &user.email,
        &client_ip(req),
        &reset_token,
        &post_good,
        &post_bad,
    );
    mailer::enqueue(conn, &user.username, &content)?;

    {
        use crate::schema::users::dsl as users_dsl;
        diesel::update(
            users_dsl::users
                .filter(users_dsl::username.eq(&user.username)),
        )
        .set((
            users_dsl::token.eq(&reset_token),
            users_dsl::token_time.eq(now_secs()),
        ))
        .execute(conn)?;
    }

    mailer::check();
    tracing::info!(username = %user.username, "password reset initiated");
    see_other(res, &forgot_good, false, None)
}

/// Consume a registration token; repeat visits with the same token miss
/// because `verified` has already left the mail-sent state.
#[handler]
async fn confirm(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let confirm_url = &crate::config::get().email.confirm_url_base;
    let ok_onward = format!("{confirm_url}/post-verify-ok.html");
    let fail_onward = format!("{confirm_url}/post-verify-fail.html");

    let Some(token) = req.query::<String>("token") else {
        return reissue_anonymous(req, res, &fail_onward);
    };

    let conn = &mut db::get()?;
    let user = user_get_by_token(conn, &token, false)?
        .filter(|user| user.verified == VERIFIED_MAIL_SENT);
    let Some(user) = user else {
        tracing::info!("verify token does not map to an unverified user");
        return reissue_anonymous(req, res, &fail_onward);
    };

    {
        use crate::schema::users::dsl::*;
        diesel::update(users.filter(username.eq(&user.username)))
            .set(verified.eq(VERIFIED_ACCEPTED))
            .execute(conn)?;
    }
    tracing::info!(username = %user.username, "email verified");

    replace_with_authorized(req, res, &user.username, &ok_onward)
}

/// Consume a password-reset token, opening the change-password grace
/// window and logging the caller in.
#[handler]
async fn forgot(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let confirm_url = &crate::config::get().email.confirm_url_base;
    let good = req
        .query::<String>("good")
        .unwrap_or_else(|| "broken-forget-post-good-url".into());
    let bad = req
        .query::<String>("bad")
        .unwrap_or_else(|| "broken-forget-post-bad-url".into());
    let fail_onward = format!("{confirm_url}/{bad}");

    let Some(token) = req.query::<String>("token") else {
        return reissue_anonymous(req, res, &fail_onward);
    };

    let conn = &mut db::get()?;
    let Some(user) = user_get_by_token(conn, &token, true)? else {
        tracing::info!("forgot token does not map to a verified user");
        return reissue_anonymous(req, res, &fail_onward);
    };

    {
        use crate::schema::users::dsl::*;
        diesel::update(users.filter(username.eq(&user.username)))
            .set((token_time.eq(0), last_forgot_validated.eq(now_secs())))
            .execute(conn)?;
    }
    tracing::info!(username = %user.username, "forgot link validated");

    replace_with_authorized(
        req,
        res,
        &user.username,
        &format!("{confirm_url}/{good}"),
    )
}

/// Drop any presented session and install a fresh authorized one.
fn replace_with_authorized(
    req: &mut Request,
    res: &mut Response,
    username: &str,
    onward: &str,
) -> AppResult<()> {
    let conn = &mut db::get()?;
    let stale = session::sid_from_request(req);
    if let Some(sid) = &stale {
        session::delete(conn, sid)?;
    }
    let (sid, created) = session::create(conn, username)?;
    see_other(res, onward, stale.is_some(), Some((&sid, created.expire)))
}

/// Change password. Within the forgot grace window a live authorized
/// session stands in for the current password; otherwise the caller must
/// present working credentials.
#[handler]
async fn change(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let form: AuthForm = req.parse_form().await?;
    let good = required(form.good, "good target url")?;
    let bad = required(form.bad, "bad target url")?;
    let Some(password) = form.password.filter(|v| !v.is_empty()) else {
        return see_other(res, &bad, false, None);
    };

    let config = crate::config::get();
    let conn = &mut db::get()?;

    let mut grace_user = None;
    if let Some(sid) = session::sid_from_request(req) {
        if let Some(found) = session::lookup(conn, &sid)? {
            if !found.username.is_empty() {
                grace_user = user_get(conn, &found.username)?.filter(|user| {
                    super::within_forgot_grace(
                        user.last_forgot_validated,
                        now_secs(),
                    )
                });
            }
        }
    }

    let user = match grace_user {
        Some(user) => user,
        None => {
            let credentials = form
                .username
                .filter(|v| !v.is_empty())
                .zip(form.curpw.filter(|v| !v.is_empty()));
            let Some((username, curpw)) = credentials else {
                return see_other(res, &bad, false, None);
            };
            let user = user_get(conn, &username)?.filter(|user| {
                hash::check_credentials(user, &curpw, &config.confounder)
            });
            let Some(user) = user else {
                tracing::info!(%username, "password change refused");
                return see_other(res, &bad, false, None);
            };
            user
        }
    };

    let new_salt = hash::new_salt();
    let new_hash = hash::password_hash(&password, &config.confounder, &new_salt);
    {
        use crate::schema::users::dsl::*;
        diesel::update(users.filter(username.eq(&user.username)))
            .set((
                pwhash.eq(&new_hash),
                pwsalt.eq(&new_salt),
                pwchange_time.eq(now_secs()),
                last_forgot_validated.eq(0),
            ))
            .execute(conn)?;
    }
    tracing::info!(username = %user.username, "password changed");

    see_other(res, &good, false, None)
}

/// Demote the caller's session to anonymous.
#[handler]
async fn logout(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let form: AuthForm = req.parse_form().await?;
    let good = required(form.good, "good target url")?;

    let sid = session::sid_from_request(req)
        .ok_or(super::AuthError::NoSession)?;

    let conn = &mut db::get()?;
    let demoted = session::rebind(conn, &sid, "")?;
    see_other(res, &good, false, Some((&sid, demoted.expire)))
}

/// Uniqueness probe: `?username=x` or `?email=x`, answered with a
/// one-byte `0` (free) or `1` (taken).
#[handler]
async fn check(req: &mut Request, res: &mut Response) -> AppResult<()> {
    let conn = &mut db::get()?;

    let taken = if let Some(username) = req.query::<String>("username") {
        user_get(conn, &username)?.is_some()
    } else if let Some(email) = req.query::<String>("email") {
        user_get_by_email(conn, &email)?.is_some()
    } else {
        false
    };

    res.render(Text::Plain(if taken { "1" } else { "0" }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use salvo::test::{ResponseExt, TestClient};

    use super::*;
    use crate::mailer::StubMailer;
    use crate::testing;

    fn service() -> Service {
        testing::init();
        Service::new(super::router())
    }

    fn location(res: &salvo::http::Response) -> String {
        res.headers()
            .get(LOCATION)
            .expect("response should carry Location")
            .to_str()
            .expect("Location should be ascii")
            .to_owned()
    }

    fn set_cookies(res: &salvo::http::Response) -> Vec<String> {
        res.headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().expect("cookie should be ascii").to_owned())
            .collect()
    }

    /// The freshly installed session id: value of the last `id=` cookie.
    fn installed_sid(res: &salvo::http::Response) -> String {
        set_cookies(res)
            .iter()
            .rev()
            .filter_map(|c| c.strip_prefix("id="))
            .map(|rest| {
                rest.split(';').next().unwrap_or_default().to_owned()
            })
            .find(|v| v.len() == 40)
            .expect("a 40-hex session cookie should be installed")
    }

    fn session_user(conn: &mut DbConn, sid: &str) -> Option<String> {
        use crate::schema::sessions::dsl::*;
        sessions
            .filter(name.eq(sid))
            .select(username)
            .first(conn)
            .optional()
            .expect("session lookup")
    }

    #[tokio::test]
    async fn register_then_confirm_flow() {
        let service = service();
        let _mail = testing::mail_lock();

        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form(
                "register=1&username=alice&password=hunter2\
                 &email=alice%40example.com&reg-good=/ok&reg-bad=/bad",
            )
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::SEE_OTHER));
        assert_eq!(location(&res), "/ok");
        // response installs a fresh anonymous session
        let anon_sid = installed_sid(&res);

        let conn = &mut db::get().unwrap();
        assert_eq!(session_user(conn, &anon_sid).as_deref(), Some(""));
        let user = user_get(conn, "alice").unwrap().unwrap();
        assert_eq!(user.verified, VERIFIED_NEW);
        assert_eq!(user.token.len(), 40);
        assert_ne!(user.token_time, 0);
        assert_eq!(
            user.pwhash,
            hash::password_hash(
                "hunter2",
                &crate::config::get().confounder,
                &user.pwsalt
            )
        );

        // worker delivers the queued verification mail
        let stub = StubMailer::default();
        testing::drain_all(&stub);
        {
            let sent = stub.sent.lock().unwrap();
            let link = format!("/confirm?token={}", user.token);
            assert!(sent.iter().any(|(_, body)| body.contains(&link)));
        }
        let conn = &mut db::get().unwrap();
        let user = user_get(conn, "alice").unwrap().unwrap();
        assert_eq!(user.verified, VERIFIED_MAIL_SENT);

        // duplicate username and duplicate email both bounce to reg-bad
        for dup in [
            "register=1&username=alice&password=x&email=fresh%40example.com\
             &reg-good=/ok&reg-bad=/bad",
            "register=1&username=fresh&password=x&email=alice%40example.com\
             &reg-good=/ok&reg-bad=/bad",
        ] {
            let res = TestClient::post("http://127.0.0.1/login")
                .raw_form(dup)
                .send(&service)
                .await;
            assert_eq!(location(&res), "/bad");
        }
        let conn = &mut db::get().unwrap();
        assert!(user_get(conn, "fresh").unwrap().is_none());

        // the admin username can never be registered
        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form(
                "register=1&username=root&password=x&email=r%40example.com\
                 &reg-good=/ok&reg-bad=/bad",
            )
            .send(&service)
            .await;
        assert_eq!(location(&res), "/bad");

        // consuming the token verifies the account and logs alice in
        let confirm_url = format!(
            "http://127.0.0.1/confirm?token={}",
            user.token
        );
        let res = TestClient::get(confirm_url.as_str()).send(&service).await;
        assert_eq!(
            location(&res),
            "https://gatehouse.test/post-verify-ok.html"
        );
        let sid = installed_sid(&res);
        let conn = &mut db::get().unwrap();
        assert_eq!(session_user(conn, &sid).as_deref(), Some("alice"));
        let user = user_get(conn, "alice").unwrap().unwrap();
        assert_eq!(user.verified, VERIFIED_ACCEPTED);

        // the same token cannot verify twice
        let res = TestClient::get(confirm_url.as_str()).send(&service).await;
        assert_eq!(
            location(&res),
            "https://gatehouse.test/post-verify-fail.html"
        );
    }

    #[tokio::test]
    async fn login_installs_session_and_check_reports_usage() {
        let service = service();
        {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "bob",
                "bob@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
        }

        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form("username=bob&password=hunter2&good=/home&bad=/bad")
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::SEE_OTHER));
        assert_eq!(location(&res), "/home");
        let sid = installed_sid(&res);

        let conn = &mut db::get().unwrap();
        assert_eq!(session_user(conn, &sid).as_deref(), Some("bob"));

        for (query, expected) in [
            ("username=bob", "1"),
            ("username=nobody-here", "0"),
            ("email=bob%40example.com", "1"),
            ("email=unused%40example.com", "0"),
        ] {
            let mut res =
                TestClient::get(format!("http://127.0.0.1/check?{query}"))
                    .send(&service)
                    .await;
            assert_eq!(res.status_code, Some(StatusCode::OK));
            assert_eq!(res.take_string().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn login_upgrades_a_presented_live_session() {
        let service = service();
        let sid = {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "carl",
                "carl@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
            session::create(conn, "").unwrap().0
        };

        let res = TestClient::post("http://127.0.0.1/login")
            .add_header("cookie", format!("id={sid}"), true)
            .raw_form("username=carl&password=hunter2&good=/home&bad=/bad")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/home");
        assert_eq!(installed_sid(&res), sid.as_str());

        let conn = &mut db::get().unwrap();
        assert_eq!(
            session_user(conn, sid.as_str()).as_deref(),
            Some("carl")
        );
    }

    #[tokio::test]
    async fn admin_login_prefers_the_admin_target() {
        let service = service();

        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form("username=root&password=secret&admin=/dash&good=/home")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/dash");
        let sid = installed_sid(&res);

        let conn = &mut db::get().unwrap();
        assert_eq!(session_user(conn, &sid).as_deref(), Some("root"));
        let level = crate::auth::auth_level(conn, "root").unwrap();
        assert_eq!(level.bits(), 7);

        // wrong admin password falls through to the (empty) user table
        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form("username=root&password=wrong&admin=/dash&good=/home&bad=/no")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/no");
    }

    #[tokio::test]
    async fn wrong_password_redirects_bad_and_changes_nothing() {
        let service = service();
        let before = {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "dave",
                "dave@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
            user_get(conn, "dave").unwrap().unwrap().pwhash
        };

        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form("username=dave&password=wrong&good=/h&bad=/no")
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::SEE_OTHER));
        assert_eq!(location(&res), "/no");

        let conn = &mut db::get().unwrap();
        assert_eq!(user_get(conn, "dave").unwrap().unwrap().pwhash, before);
    }

    #[tokio::test]
    async fn forgot_flow_grants_a_grace_window() {
        let service = service();
        let _mail = testing::mail_lock();
        {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "carol",
                "carol@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
        }

        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form(
                "forgot=1&email=carol%40example.com&forgot-good=/sent\
                 &forgot-bad=/bad&forgot-post-good=reset_ok\
                 &forgot-post-bad=reset_bad",
            )
            .send(&service)
            .await;
        assert_eq!(location(&res), "/sent");

        let token = {
            let conn = &mut db::get().unwrap();
            let user = user_get(conn, "carol").unwrap().unwrap();
            assert_ne!(user.token_time, 0);
            user.token
        };

        let stub = StubMailer::default();
        testing::drain_all(&stub);
        {
            let sent = stub.sent.lock().unwrap();
            let link = format!(
                "/forgot?token={token}&good=reset_ok&bad=reset_bad"
            );
            assert!(sent.iter().any(|(_, body)| body.contains(&link)));
        }

        // a wrong token bounces to the bad page
        let res = TestClient::get(
            "http://127.0.0.1/forgot?token=ffffffffffffffffffffffffffffffffffffffff&good=reset_ok&bad=reset_bad",
        )
        .send(&service)
        .await;
        assert_eq!(location(&res), "https://gatehouse.test/reset_bad");

        let res = TestClient::get(format!(
            "http://127.0.0.1/forgot?token={token}&good=reset_ok&bad=reset_bad"
        ))
        .send(&service)
        .await;
        assert_eq!(location(&res), "https://gatehouse.test/reset_ok");
        let sid = installed_sid(&res);

        {
            let conn = &mut db::get().unwrap();
            assert_eq!(session_user(conn, &sid).as_deref(), Some("carol"));
            let user = user_get(conn, "carol").unwrap().unwrap();
            assert_eq!(user.token_time, 0);
            assert!(user.last_forgot_validated > now_secs() - 5);
        }

        // outside the grace window the old password is still required
        // (the exact 299/301 boundary is covered in the auth unit tests)
        {
            let conn = &mut db::get().unwrap();
            use crate::schema::users::dsl::*;
            diesel::update(users.filter(username.eq("carol")))
                .set(last_forgot_validated.eq(now_secs() - 350))
                .execute(conn)
                .unwrap();
        }
        let res = TestClient::post("http://127.0.0.1/change")
            .add_header("cookie", format!("id={sid}"), true)
            .raw_form("password=newpw&good=/done&bad=/nope")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/nope");

        // inside the window the change goes through without curpw
        {
            let conn = &mut db::get().unwrap();
            use crate::schema::users::dsl::*;
            diesel::update(users.filter(username.eq("carol")))
                .set(last_forgot_validated.eq(now_secs() - 250))
                .execute(conn)
                .unwrap();
        }
        let res = TestClient::post("http://127.0.0.1/change")
            .add_header("cookie", format!("id={sid}"), true)
            .raw_form("password=newpw&good=/done&bad=/nope")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/done");

        let conn = &mut db::get().unwrap();
        let user = user_get(conn, "carol").unwrap().unwrap();
        assert_eq!(user.last_forgot_validated, 0);
        assert!(hash::check_credentials(
            &user,
            "newpw",
            &crate::config::get().confounder
        ));
    }

    #[tokio::test]
    async fn change_with_current_password_needs_no_session() {
        let service = service();
        {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "erin",
                "erin@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
        }

        // wrong current password is refused
        let res = TestClient::post("http://127.0.0.1/change")
            .raw_form(
                "username=erin&curpw=wrong&password=next&good=/done&bad=/nope",
            )
            .send(&service)
            .await;
        assert_eq!(location(&res), "/nope");

        let res = TestClient::post("http://127.0.0.1/change")
            .raw_form(
                "username=erin&curpw=hunter2&password=next&good=/done&bad=/nope",
            )
            .send(&service)
            .await;
        assert_eq!(location(&res), "/done");

        let conn = &mut db::get().unwrap();
        let user = user_get(conn, "erin").unwrap().unwrap();
        assert!(user.pwchange_time > 0);
        assert!(hash::check_credentials(
            &user,
            "next",
            &crate::config::get().confounder
        ));
    }

    #[tokio::test]
    async fn logout_demotes_the_session_in_place() {
        let service = service();
        let sid = {
            let conn = &mut db::get().unwrap();
            testing::insert_user(
                conn,
                "frank",
                "frank@example.com",
                VERIFIED_ACCEPTED,
                now_secs(),
            );
            session::create(conn, "frank").unwrap().0
        };

        let res = TestClient::post("http://127.0.0.1/logout")
            .add_header("cookie", format!("id={sid}"), true)
            .raw_form("good=/out")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/out");
        assert_eq!(installed_sid(&res), sid.as_str());

        let conn = &mut db::get().unwrap();
        assert_eq!(session_user(conn, sid.as_str()).as_deref(), Some(""));

        // logging out without a session is refused
        let res = TestClient::post("http://127.0.0.1/logout")
            .raw_form("good=/out")
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn malformed_login_forms_are_rejected() {
        let service = service();

        // no username/password at all
        let res = TestClient::post("http://127.0.0.1/login")
            .raw_form("good=/home&bad=/bad")
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

        // a mangled cookie is treated as "no session", not an error
        let res = TestClient::post("http://127.0.0.1/login")
            .add_header("cookie", "id=NOT-A-SESSION", true)
            .raw_form("username=ghost&password=x&good=/home&bad=/no")
            .send(&service)
            .await;
        assert_eq!(location(&res), "/no");
    }
}
