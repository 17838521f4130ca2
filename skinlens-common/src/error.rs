//! Error type for the shared config and filesystem plumbing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Root folder creation or config file access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed or serialized
    #[error("Configuration error: {0}")]
    Config(String),
}
