//! Attribute Protocol ([Vol 3] Part F), client side.
//!
//! PDU encoding is left to the [`Link`] implementation. This module defines
//! the request/response model exchanged with a link, the protocol constants,
//! and the reference-counted [`Bearer`] shared by all users of one device
//! connection.

pub use {bearer::*, consts::*, handle::*, pdu::*};

mod bearer;
mod consts;
mod handle;
mod pdu;

/// Error type returned by the ATT layer.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}")]
    Connect(String),
    #[error(transparent)]
    Att(#[from] ErrorCode),
    #[error("timeout while waiting for {0} response")]
    Timeout(Opcode),
    #[error("disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response")]
    UnexpectedRsp,
}

/// Common ATT result type.
pub type Result<T> = std::result::Result<T, Error>;
