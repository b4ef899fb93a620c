use crate::network::SocketError;
use dhcproto::error::{DecodeError, EncodeError};
use std::{error::Error as StdError, io};
use thiserror::Error;

/// Failure value produced by an allocation policy.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Socket operation failed")]
    Socket(#[from] SocketError),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Failed to encode DHCP message")]
    Encode(#[from] EncodeError),

    #[error("Failed to decode DHCP message")]
    Decode(#[from] DecodeError),

    #[error("Allocation handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("Handler produced an invalid reply: {0}")]
    InvalidReply(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
