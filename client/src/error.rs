use thiserror::Error;

#[derive(Error, Debug)]
pub enum AhnlichError {
    #[error("Invalid URI {0}")]
    InvalidURI(#[from] http::uri::InvalidUri),
    #[error("Transport issues with tonic {0}")]
    Tonic(#[from] tonic::transport::Error),
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
}
