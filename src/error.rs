use salvo::http::{StatusCode, StatusError};
use salvo::oapi::{self, EndpointOutRegister, ToSchema};
use salvo::prelude::*;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
#[error(transparent)]
pub enum ApiError {
    Validation(#[from] validator::ValidationErrors),
    DatabaseSQL(#[from] diesel::result::Error),
    DatabaseConnectionPool(#[from] diesel::r2d2::PoolError),
    HttpParse(#[from] salvo::http::ParseError),
    Http(#[from] salvo::Error),
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadInput(&'static str),
}

impl Scribe for ApiError {
    fn render(self, res: &mut Response) {
        let status_error = match self {
            // Validation errors -> 400 Bad Request with field details
            Self::Validation(errs) => {
                StatusError::bad_request().brief(errs.to_string())
            }
            // Diesel SQL errors
            Self::DatabaseSQL(err) => {
                use diesel::result::{DatabaseErrorKind, Error};
                match err {
                    Error::NotFound => {
                        StatusError::not_found().brief("Resource not found")
                    }
                    // SQLite message format: "UNIQUE constraint failed: users.email"
                    Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        info,
                    ) => {
                        let message = info.message().to_string();
                        let field = message
                            .strip_prefix("UNIQUE constraint failed: ")
                            .and_then(|s| s.split('.').next_back())
                            .unwrap_or("Value");
                        StatusError::conflict()
                            .brief(format!("{} already exists", field))
                    }
                    // Anything else is internal; log it, never leak it
                    err => {
                        tracing::error!(error = ?err, "Database error");
                        StatusError::internal_server_error()
                    }
                }
            }
            Self::DatabaseConnectionPool(err) => {
                tracing::error!(error = ?err, "Database connection pool error");
                StatusError::internal_server_error()
            }
            Self::HttpParse(err) => {
                StatusError::bad_request().brief(err.to_string())
            }
            Self::Http(err) => {
                tracing::error!(error = ?err, "Response assembly error");
                StatusError::internal_server_error()
            }
            Self::Auth(err) => match err {
                AuthError::NoSession => {
                    StatusError::unauthorized().brief(err.to_string())
                }
                AuthError::AccessDenied => {
                    StatusError::forbidden().brief(err.to_string())
                }
            },
            Self::BadInput(msg) => StatusError::bad_request().brief(msg),
        };

        res.render(status_error);
    }
}

impl EndpointOutRegister for ApiError {
    fn register(
        components: &mut oapi::Components,
        operation: &mut oapi::Operation,
    ) {
        let responses = [
            (StatusCode::BAD_REQUEST, "Bad request or validation error"),
            (StatusCode::UNAUTHORIZED, "No usable session"),
            (StatusCode::FORBIDDEN, "Insufficient capabilities"),
            (StatusCode::NOT_FOUND, "Resource not found"),
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        ];

        for (status, description) in responses {
            operation.responses.insert(
                status.as_str(),
                oapi::Response::new(description).add_content(
                    "text/plain",
                    StatusError::to_schema(components),
                ),
            );
        }
    }
}
