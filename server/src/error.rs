use shared::codec::CodecError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Handshake rejected because every player slot is taken.
    #[error("Server is full")]
    ServerFull,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}
