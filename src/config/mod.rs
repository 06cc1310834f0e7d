use std::sync::OnceLock;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<ServerConfig> = OnceLock::new();

pub fn init() {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::raw().only(&["database_url"]))
        .merge(Env::prefixed("APP_").global());

    let config = match raw_config.extract::<ServerConfig>() {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    };
    // these three have no workable default; refuse to start without them
    if config.database_url.is_empty() {
        eprintln!("DATABASE_URL is not set");
        std::process::exit(1);
    }
    if config.admin_user.is_empty() || config.admin_password_sha1.len() != 40 {
        eprintln!(
            "admin_user and admin_password_sha1 (40 hex chars) must be set"
        );
        std::process::exit(1);
    }
    crate::config::CONFIG
        .set(config)
        .expect("config should be set");
}

pub fn get() -> &'static ServerConfig {
    CONFIG.get().expect("config should be set")
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Path to the sqlite session database.
    pub database_url: String,
    /// Admin identity; never stored in the users table.
    pub admin_user: String,
    /// sha1 hex of the admin password, compared without salt.
    pub admin_password_sha1: String,
    /// Per-deployment pepper mixed into every password hash.
    #[serde(default)]
    pub confounder: String,
    #[serde(default = "default_timeout_absolute_secs")]
    pub timeout_absolute_secs: i64,
    #[serde(default = "default_timeout_anon_absolute_secs")]
    pub timeout_anon_absolute_secs: i64,
    /// Unverified accounts and stale tokens older than this are reaped.
    #[serde(default = "default_email_expire_secs")]
    pub email_expire_secs: i64,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_serve_dir")]
    pub serve_dir: String,
    /// Pages under `prefix` require the capability mask `required`.
    #[serde(default)]
    pub protected: Vec<PageGuard>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct EmailConfig {
    #[serde(default = "default_email_from")]
    pub from: String,
    #[serde(default = "default_email_helo")]
    pub helo: String,
    #[serde(default = "default_email_server_ip")]
    pub server_ip: String,
    #[serde(default = "default_email_title")]
    pub title: String,
    #[serde(default)]
    pub contact_person: String,
    /// Base URL prefixed to /confirm and /forgot links in outbound mail.
    #[serde(default)]
    pub confirm_url_base: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: default_email_from(),
            helo: default_email_helo(),
            server_ip: default_email_server_ip(),
            title: default_email_title(),
            contact_person: String::new(),
            confirm_url_base: String::new(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct PageGuard {
    pub prefix: String,
    pub required: u32,
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_serve_dir() -> String {
    "/www".into()
}

fn default_timeout_absolute_secs() -> i64 {
    36000
}

fn default_timeout_anon_absolute_secs() -> i64 {
    1200
}

fn default_email_expire_secs() -> i64 {
    24 * 3600
}

fn default_email_from() -> String {
    "noreply@unconfigured.com".into()
}

fn default_email_helo() -> String {
    "unconfigured.com".into()
}

fn default_email_server_ip() -> String {
    "127.0.0.1".into()
}

fn default_email_title() -> String {
    "Registration Email from unconfigured".into()
}
