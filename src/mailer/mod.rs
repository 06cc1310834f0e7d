//! Outbound mail: a durable per-user queue in the store and a single
//! drainer task that owns the one in-flight message slot.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::Context;
use lettre::address::Envelope;
use lettre::transport::smtp::extension::ClientId;
use lettre::{Address, SmtpTransport, Transport};
use tokio::sync::Notify;

use crate::models::EmailQueueEntry;
use crate::prelude::*;

pub mod compose;

/// Upper bound on one queued message, headers included.
pub const EMAIL_CONTENT_SIZE: usize = 16 * 1024;

/// How long the worker sleeps before re-probing the queue when nobody
/// wakes it; failed sends are retried on this cadence.
const RETRY_INTERVAL_SECS: u64 = 60;

/// The SMTP collaborator: deliver one raw RFC-822 message.
pub trait Mailer: Send + Sync + 'static {
    fn send_raw(
        &self,
        envelope: &Envelope,
        content: &[u8],
    ) -> anyhow::Result<()>;
}

/// Plain SMTP to the configured relay ip, announcing the configured HELO
/// domain. No TLS; the relay is expected to be local.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn from_config(config: &crate::config::EmailConfig) -> Self {
        let transport = SmtpTransport::builder_dangerous(&config.server_ip)
            .hello_name(ClientId::Domain(config.helo.clone()))
            .build();
        Self { transport }
    }
}

impl Mailer for SmtpMailer {
    fn send_raw(
        &self,
        envelope: &Envelope,
        content: &[u8],
    ) -> anyhow::Result<()> {
        self.transport
            .send_raw(envelope, content)
            .context("smtp send failed")?;
        Ok(())
    }
}

/// In-memory transport used by tests and `server_ip = "stub"` deployments.
#[derive(Default)]
pub struct StubMailer {
    pub sent: Mutex<Vec<(Envelope, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl Mailer for StubMailer {
    fn send_raw(
        &self,
        envelope: &Envelope,
        content: &[u8],
    ) -> anyhow::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            anyhow::bail!("stub transport down");
        }
        self.sent
            .lock()
            .expect("stub mailbox poisoned")
            .push((envelope.clone(), String::from_utf8_lossy(content).into()));
        Ok(())
    }
}

struct EmailWorker {
    notify: Arc<Notify>,
}

static WORKER: OnceLock<EmailWorker> = OnceLock::new();

/// Spawn the drainer task. Must be called at most once.
pub fn init(mailer: Arc<dyn Mailer>) {
    let notify = Arc::new(Notify::new());
    tokio::spawn(run(mailer, Arc::clone(&notify)));
    WORKER
        .set(EmailWorker { notify })
        .unwrap_or_else(|_| panic!("mail worker already running"));
}

/// Wake the worker to look at the queue. Idempotent; calling while it is
/// already draining is a no-op.
pub fn check() {
    if let Some(worker) = WORKER.get() {
        worker.notify.notify_one();
    }
}

async fn run(mailer: Arc<dyn Mailer>, notify: Arc<Notify>) {
    let mut tick =
        tokio::time::interval(Duration::from_secs(RETRY_INTERVAL_SECS));
    loop {
        loop {
            match drain_once(mailer.as_ref()) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    // message stays queued, retried on the next wake
                    tracing::error!(error = ?err, "outbound mail delivery failed");
                    break;
                }
            }
        }
        tokio::select! {
            _ = notify.notified() => {}
            _ = tick.tick() => {}
        }
    }
}

/// One pass of the drain loop: reap stale accounts and tokens, then try
/// to deliver a single queued message. Returns whether anything was
/// delivered (so the caller keeps draining).
pub fn drain_once(mailer: &dyn Mailer) -> anyhow::Result<bool> {
    let conn = &mut db::get()?;
    gc(conn, now_secs())?;

    let Some(entry) = peek(conn)? else {
        return Ok(false);
    };

    let Some(user) = crate::auth::user_get(conn, &entry.username)? else {
        // account reaped while its mail was queued
        dequeue(conn, &entry.username)?;
        return Ok(true);
    };

    let envelope = match envelope_to(&user.email) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(username = %user.username, error = ?err,
                "dropping undeliverable queued mail");
            dequeue(conn, &entry.username)?;
            return Ok(true);
        }
    };

    mailer.send_raw(&envelope, entry.content.as_bytes())?;
    on_sent(conn, &user.username)?;
    Ok(true)
}

/// Delete unverified accounts and expire reset tokens older than the
/// configured email window.
pub fn gc(conn: &mut DbConn, now: i64) -> AppResult<()> {
    use crate::schema::users::dsl::*;

    let cutoff = now - crate::config::get().email_expire_secs;

    diesel::delete(
        users
            .filter(verified.ne(crate::auth::VERIFIED_ACCEPTED))
            .filter(creation_time.le(cutoff)),
    )
    .execute(conn)?;

    diesel::update(
        users.filter(token_time.ne(0)).filter(token_time.le(cutoff)),
    )
    .set(token_time.eq(0))
    .execute(conn)?;

    Ok(())
}

/// Queue a message for a user; a pending one for the same user is
/// superseded.
pub fn enqueue(
    conn: &mut DbConn,
    username: &str,
    content: &str,
) -> AppResult<()> {
    use crate::schema::email_queue::dsl::email_queue;

    if content.len() > EMAIL_CONTENT_SIZE {
        return Err(ApiError::BadInput("outbound message too large"));
    }

    diesel::replace_into(email_queue)
        .values(EmailQueueEntry {
            username: username.to_owned(),
            content: content.to_owned(),
        })
        .execute(conn)?;
    Ok(())
}

fn peek(conn: &mut DbConn) -> AppResult<Option<EmailQueueEntry>> {
    use crate::schema::email_queue::dsl::*;

    Ok(email_queue.first(conn).optional()?)
}

fn dequeue(conn: &mut DbConn, name: &str) -> AppResult<()> {
    use crate::schema::email_queue::dsl::*;

    diesel::delete(email_queue.filter(username.eq(name))).execute(conn)?;
    Ok(())
}

fn on_sent(conn: &mut DbConn, name: &str) -> AppResult<()> {
    use crate::schema::users::dsl::*;

    // a delivered verification mail moves the account from new to pending
    diesel::update(
        users
            .filter(username.eq(name))
            .filter(verified.eq(crate::auth::VERIFIED_NEW)),
    )
    .set(verified.eq(crate::auth::VERIFIED_MAIL_SENT))
    .execute(conn)?;

    dequeue(conn, name)
}

fn envelope_to(email: &str) -> anyhow::Result<Envelope> {
    let from = crate::config::get()
        .email
        .from
        .parse::<Address>()
        .context("invalid configured From address")?;
    let to = email.parse::<Address>().context("invalid recipient")?;
    Ok(Envelope::new(Some(from), vec![to])?)
}
