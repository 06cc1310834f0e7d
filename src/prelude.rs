pub use diesel::prelude::*;
pub use salvo::oapi::{ToSchema, endpoint};
pub use salvo::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use validator::Validate;

pub use crate::auth::{DepotAuthExt as _, RouterAuthExt as _};
pub use crate::db::{self, DbConn};
pub use crate::error::ApiError;

pub type AppResult<T> = Result<T, ApiError>;

/// Current wall time in unix seconds; every expiry in the store is
/// compared against this.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
