//! Shared test bootstrap: process-wide config, a throwaway sqlite file,
//! and small fixtures the endpoint tests lean on.

use std::sync::{Mutex, MutexGuard, Once};

use crate::config::{EmailConfig, LogConfig, PageGuard, ServerConfig};
use crate::models::User;
use crate::prelude::*;

static INIT: Once = Once::new();

/// Idempotent per-process setup. Every test shares one database, so
/// fixtures must use distinct usernames.
pub fn init() {
    INIT.call_once(|| {
        let tmp = std::env::temp_dir();
        let db_path =
            tmp.join(format!("gatehouse-test-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        let serve_dir =
            tmp.join(format!("gatehouse-test-pages-{}", std::process::id()));
        let members = serve_dir.join("members");
        std::fs::create_dir_all(&members).expect("create test serve dir");
        std::fs::write(
            serve_dir.join("hello.html"),
            "<p>Hello $lwsgs_user auth=$lwsgs_auth email=$lwsgs_email</p>",
        )
        .expect("write test page");
        std::fs::write(serve_dir.join("plain.html"), "<p>static</p>")
            .expect("write test page");
        std::fs::write(members.join("lounge.html"), "<p>members only</p>")
            .expect("write test page");

        let config = ServerConfig {
            listen_addr: "127.0.0.1".into(),
            listen_port: 0,
            database_url: db_path.to_string_lossy().into_owned(),
            admin_user: "root".into(),
            admin_password_sha1: crate::auth::hash::sha1_hex(b"secret"),
            confounder: "test-pepper".into(),
            timeout_absolute_secs: 36000,
            timeout_anon_absolute_secs: 1200,
            email_expire_secs: 3600,
            email: EmailConfig {
                from: "noreply@gatehouse.test".into(),
                helo: "gatehouse.test".into(),
                server_ip: "stub".into(),
                title: "Please verify your account".into(),
                contact_person: "a-real-person@gatehouse.test".into(),
                confirm_url_base: "https://gatehouse.test".into(),
            },
            log: LogConfig::default(),
            serve_dir: serve_dir.to_string_lossy().into_owned(),
            protected: vec![PageGuard {
                prefix: "/members/".into(),
                required: crate::auth::AuthLevel::LOGGED_IN.bits(),
            }],
        };
        crate::config::CONFIG
            .set(config)
            .expect("test config should be set once");

        db::init();
    });
}

static MAIL_LOCK: Mutex<()> = Mutex::new(());

/// Tests that enqueue or drain outbound mail take this to keep the
/// shared queue to themselves.
pub fn mail_lock() -> MutexGuard<'static, ()> {
    MAIL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn drain_all(mailer: &dyn crate::mailer::Mailer) {
    while crate::mailer::drain_once(mailer).unwrap_or(false) {}
}

/// Insert a user whose password is `hunter2`.
pub fn insert_user(
    conn: &mut DbConn,
    name: &str,
    email: &str,
    verified_state: i32,
    created: i64,
) {
    let pwsalt = crate::auth::hash::new_salt();
    let pwhash = crate::auth::hash::password_hash(
        "hunter2",
        &crate::config::get().confounder,
        &pwsalt,
    );
    diesel::insert_into(crate::schema::users::dsl::users)
        .values(User {
            username: name.to_owned(),
            creation_time: created,
            ip: "127.0.0.1".into(),
            email: email.to_owned(),
            pwhash,
            pwsalt,
            pwchange_time: 0,
            token: String::new(),
            verified: verified_state,
            token_time: 0,
            last_forgot_validated: 0,
        })
        .execute(conn)
        .expect("insert test user");
}

pub fn session_names(conn: &mut DbConn) -> Vec<String> {
    use crate::schema::sessions::dsl::*;

    let mut all: Vec<String> =
        sessions.select(name).load(conn).expect("load session names");
    all.sort();
    all
}
