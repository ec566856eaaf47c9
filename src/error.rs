//! Error types for wshub

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no transport server bound; call set_transport_server first")]
    TransportNotSet,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("client '{0}' not found")]
    ClientNotFound(String),

    #[error("the \"global\" channel is missing from the hub")]
    GlobalChannelMissing,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("config file not found")]
    ConfigNotFound,

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
