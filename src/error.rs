use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("converter returned status {status}")]
    Converter { status: i32 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("writer error: {0}")]
    Writer(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, CapError>;
