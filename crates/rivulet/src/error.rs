use rivulet_net::NetError;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("invalid manifest source: {0}")]
    InvalidSource(String),

    #[error("no manifest parser configured for {0}")]
    MissingParser(Url),

    #[error("transport setup failed: {0}")]
    Net(#[from] NetError),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
