use diesel::prelude::*;

/// A registered account. `verified` walks 0 (new) -> 1 (verification mail
/// dispatched) -> 100 (confirmed); all times are unix seconds.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub username: String,
    pub creation_time: i64,
    pub ip: String,
    pub email: String,
    pub pwhash: String,
    pub pwsalt: String,
    pub pwchange_time: i64,
    pub token: String,
    pub verified: i32,
    pub token_time: i64,
    pub last_forgot_validated: i64,
}

/// A browser session. `username` is empty for anonymous sessions.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Session {
    pub name: String,
    pub username: String,
    pub expire: i64,
}

/// One queued outbound mail per user; re-enqueueing replaces the old row.
#[derive(Queryable, Selectable, Insertable, Debug)]
#[diesel(table_name = crate::schema::email_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EmailQueueEntry {
    pub username: String,
    pub content: String,
}
