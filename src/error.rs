//! Error types for the wire codec, configuration and engine API.

use std::io;

use thiserror::Error;

/// Malformed wire input. The offending packet is dropped as a whole.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("packet length {declared} does not match buffer length {actual}")]
    PacketLength { declared: usize, actual: usize },

    #[error("message size {declared} invalid with {remaining} bytes remaining")]
    MessageSize { declared: usize, remaining: usize },

    #[error("link message size {declared} invalid with {remaining} bytes remaining")]
    LinkMessageSize { declared: usize, remaining: usize },

    #[error("{what} of {len} bytes is not a multiple of {width}")]
    Misaligned {
        what: &'static str,
        len: usize,
        width: usize,
    },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("willingness {0} outside 0..=7")]
    InvalidWillingness(u8),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    #[error("{what} of {size} bytes does not fit its length field")]
    TooLarge { what: &'static str, size: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("willingness {0} outside 0..=7")]
    InvalidWillingness(u8),

    #[error("no usable interfaces configured")]
    NoInterfaces,

    #[error("unknown interface {0}")]
    UnknownInterface(u32),

    #[error("interface {0} configured twice")]
    DuplicateInterface(u32),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`crate::OlsrNode`].
#[derive(Debug, Error)]
pub enum OlsrError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("interface {0} is excluded from protocol operation")]
    ExcludedInterface(u32),

    #[error("unknown interface {0}")]
    UnknownInterface(u32),
}
