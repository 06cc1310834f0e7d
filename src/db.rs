use std::sync::OnceLock;

use diesel::SqliteConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{
    EmbeddedMigrations, MigrationHarness, embed_migrations,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

static POOL: OnceLock<Pool<ConnectionManager<SqliteConnection>>> =
    OnceLock::new();

#[derive(Debug)]
struct ConnectionOptions;

impl
    diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionOptions
{
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<(), diesel::r2d2::Error> {
        use diesel::connection::SimpleConnection;

        // sqlite needs these per connection; without the busy timeout,
        // concurrent writers surface as SQLITE_BUSY errors
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; \
             PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Open (creating if needed) the session database and run pending
/// migrations. Must be called once before [`get`].
pub fn init() {
    let config = crate::config::get();
    let manager =
        ConnectionManager::<SqliteConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .expect("session db should open");

    {
        let conn = &mut pool.get().expect("db connect should work");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("migrate db should work");
    }

    POOL.set(pool).expect("db pool should be set only once");
}

pub fn get() -> Result<DbConn, diesel::r2d2::PoolError> {
    POOL.get().expect("db::init must be called first").get()
}
