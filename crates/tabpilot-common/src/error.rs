use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("{0}")]
    Tool(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Timeout(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
