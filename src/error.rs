use thiserror::Error;

#[derive(Error, Debug)]
pub enum SanctclipError {
    #[error("Media operation failed: {0}")]
    Media(String),

    #[error("Object store error: {0}")]
    Store(String),

    #[error("Detection parsing failed: {0}")]
    Detections(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SanctclipError>;
