use thiserror::Error;

#[derive(Error, Debug)]
pub enum NestError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Reserved name: {0}")]
    ReservedName(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, NestError>;

// Helper conversions
impl From<rusqlite::Error> for NestError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<std::io::Error> for NestError {
    fn from(e: std::io::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<serde_json::Error> for NestError {
    fn from(e: serde_json::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for NestError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
