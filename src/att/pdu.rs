use structbuf::Unpack;

use crate::gap::{Uuid, Uuid16};
use crate::gatt::CharProps;

use super::*;

/// Characteristic declaration returned by characteristic discovery
/// ([Vol 3] Part G, Section 3.3.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharDecl {
    /// Declaration handle.
    pub hdl: Handle,
    pub props: CharProps,
    /// Characteristic value handle.
    pub val_hdl: Handle,
    pub uuid: Uuid,
}

/// Client request issued over a [`Link`]. Encoding into PDUs is the link's
/// concern.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Request {
    /// Discover all characteristics of a service
    /// ([Vol 3] Part G, Section 4.6.1).
    DiscoverChars(HandleRange),
    /// Discover all characteristic descriptors
    /// ([Vol 3] Part G, Section 4.7.1).
    FindInformation(HandleRange),
    /// Read characteristic value or descriptor
    /// ([Vol 3] Part G, Sections 4.8.1 and 4.12.1).
    Read(Handle),
    /// Write characteristic value or descriptor
    /// ([Vol 3] Part G, Sections 4.9.3 and 4.12.3).
    Write { hdl: Handle, val: Vec<u8> },
}

impl Request {
    /// Returns the opcode of the first PDU sent for this request.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match *self {
            Self::DiscoverChars(_) => Opcode::ReadByTypeReq,
            Self::FindInformation(_) => Opcode::FindInformationReq,
            Self::Read(_) => Opcode::ReadReq,
            Self::Write { .. } => Opcode::WriteReq,
        }
    }
}

/// Successful response to a [`Request`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Response {
    /// All characteristic declarations in the requested range, in handle
    /// order.
    Chars(Vec<CharDecl>),
    /// Descriptor handle/type pairs.
    Info(InfoData),
    /// Attribute value.
    Value(Vec<u8>),
    /// Write acknowledgment.
    Write,
}

/// `ATT_FIND_INFORMATION_RSP` information data
/// ([Vol 3] Part F, Section 3.4.3.2). A single response carries either
/// 16-bit or 128-bit UUIDs, never both.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InfoData {
    Uuid16(Vec<(Handle, Uuid16)>),
    Uuid128(Vec<(Handle, Uuid)>),
}

/// Outcome of one request. The error is the status byte of an
/// `ATT_ERROR_RSP`.
pub type RspResult = std::result::Result<Response, ErrorCode>;

/// Unsolicited `ATT_HANDLE_VALUE_NTF` or `ATT_HANDLE_VALUE_IND` PDU
/// ([Vol 3] Part F, Sections 3.4.7.1 and 3.4.7.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HandleValue<'a> {
    pub op: Opcode,
    pub hdl: Handle,
    pub val: &'a [u8],
}

impl<'a> HandleValue<'a> {
    /// Parses a raw notification or indication PDU. Returns [`None`] if the
    /// PDU is truncated, carries an invalid handle, or has any other opcode.
    #[must_use]
    pub fn parse(pdu: &'a [u8]) -> Option<Self> {
        if pdu.len() < 3 {
            return None;
        }
        let mut p = pdu.unpack();
        let op = Opcode::try_from(p.u8()).ok()?;
        if !matches!(op, Opcode::HandleValueNtf | Opcode::HandleValueInd) {
            return None;
        }
        let hdl = Handle::new(p.u16())?;
        Some(Self {
            op,
            hdl,
            val: &pdu[3..],
        })
    }

    /// Returns whether the PDU requires a confirmation.
    #[inline]
    #[must_use]
    pub fn is_ind(&self) -> bool {
        self.op == Opcode::HandleValueInd
    }
}
