use thiserror::Error;

pub type Result<T> = std::result::Result<T, SideStreamError>;

#[derive(Debug, Error)]
pub enum SideStreamError {
    #[error("unable to send request: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("unable to decode pagination response: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for SideStreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for SideStreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
