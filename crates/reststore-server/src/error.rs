use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("store error: {0}")]
    Store(#[from] reststore_store::StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for ServerError {
    fn from(err: toml::de::Error) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ServerError {
    fn from(err: toml::ser::Error) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
