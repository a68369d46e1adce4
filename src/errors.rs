use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum GraclError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(gracl::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(gracl::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(gracl::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(gracl::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Bad request: {0}")]
    #[diagnostic(code(gracl::bad_request))]
    BadRequest(String),
}
