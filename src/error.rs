use thiserror::Error;

use crate::oracle::OracleError;

#[derive(Error, Debug)]
pub enum BankmailError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mail parse error: {0}")]
    Mail(#[from] mailparse::MailParseError),

    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BankmailError>;
