use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Zone '{0}' has been destroyed")]
    ZoneDestroyed(String),

    #[error("Worker pool exhausted: no worker available for dispatch")]
    PoolExhausted,

    #[error("Worker {index} failed to initialize: {message}")]
    WorkerInit { index: usize, message: String },

    #[error("Builtin modules already installed")]
    BuiltinsInstalled,
}

pub type Result<T> = std::result::Result<T, Error>;
