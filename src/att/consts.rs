/// Attribute opcode ([Vol 3] Part F, Section 3.3.1 and
/// [Vol 3] Part F, Section 3.4.8).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[cfg_attr(test, derive(enum_iterator::Sequence))]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    ErrorRsp = 0x01,
    ExchangeMtuReq = 0x02,
    ExchangeMtuRsp = 0x03,
    FindInformationReq = 0x04,
    FindInformationRsp = 0x05,
    FindByTypeValueReq = 0x06,
    FindByTypeValueRsp = 0x07,
    ReadByTypeReq = 0x08,
    ReadByTypeRsp = 0x09,
    ReadReq = 0x0A,
    ReadRsp = 0x0B,
    ReadBlobReq = 0x0C,
    ReadBlobRsp = 0x0D,
    ReadMultipleReq = 0x0E,
    ReadMultipleRsp = 0x0F,
    ReadByGroupTypeReq = 0x10,
    ReadByGroupTypeRsp = 0x11,
    WriteReq = 0x12,
    WriteRsp = 0x13,
    WriteCmd = 0x52,
    PrepareWriteReq = 0x16,
    PrepareWriteRsp = 0x17,
    ExecuteWriteReq = 0x18,
    ExecuteWriteRsp = 0x19,
    ReadMultipleVariableReq = 0x20,
    ReadMultipleVariableRsp = 0x21,
    MultipleHandleValueNtf = 0x23,
    HandleValueNtf = 0x1B,
    HandleValueInd = 0x1D,
    HandleValueCfm = 0x1E,
    SignedWriteCmd = 0xD2,
}

/// ATT and Common Profile and Service error codes
/// ([Vol 3] Part F, Section 3.4.1.1 and \[CSS\] Part B, Section 1.2).
///
/// The `Display` form is the protocol error string reported to IPC callers.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    thiserror::Error,
)]
#[cfg_attr(test, derive(enum_iterator::Sequence))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// The attribute handle given was not valid on this server.
    #[error("Invalid handle")]
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    #[error("Attribute can't be read")]
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    #[error("Attribute can't be written")]
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    #[error("Attribute PDU was invalid")]
    InvalidPdu = 0x04,
    /// The attribute requires authentication before it can be read or written.
    #[error("Attribute requires authentication before read/write")]
    InsufficientAuthentication = 0x05,
    /// ATT Server does not support the request received from the client.
    #[error("Server doesn't support the request received")]
    RequestNotSupported = 0x06,
    /// Offset specified was past the end of the attribute.
    #[error("Offset past the end of the attribute")]
    InvalidOffset = 0x07,
    /// The attribute requires authorization before it can be read or written.
    #[error("Attribute requires authorization before read/write")]
    InsufficientAuthorization = 0x08,
    /// Too many prepare writes have been queued.
    #[error("Too many prepare writes have been queued")]
    PrepareQueueFull = 0x09,
    /// No attribute found within the given attribute handle range.
    #[error("No attribute found within the given range")]
    AttributeNotFound = 0x0A,
    /// The attribute cannot be read using the ATT_READ_BLOB_REQ PDU.
    #[error("Attribute can't be read/written using Read Blob Req")]
    AttributeNotLong = 0x0B,
    /// The Encryption Key Size used for encrypting this link is too short.
    #[error("Encryption Key Size is insufficient")]
    EncryptionKeySizeTooShort = 0x0C,
    /// The attribute value length is invalid for the operation.
    #[error("Attribute value length is invalid")]
    InvalidAttributeValueLength = 0x0D,
    /// The attribute request that was requested has encountered an error that
    /// was unlikely, and therefore could not be completed as requested.
    #[error("Request attribute has encountered an unlikely error")]
    UnlikelyError = 0x0E,
    /// The attribute requires encryption before it can be read or written.
    #[error("Encryption required before read/write")]
    InsufficientEncryption = 0x0F,
    /// The attribute type is not a supported grouping attribute as defined by a
    /// higher layer specification.
    #[error("Attribute type is not a supported grouping attribute")]
    UnsupportedGroupType = 0x10,
    /// Insufficient Resources to complete the request.
    #[error("Insufficient Resources to complete the request")]
    InsufficientResources = 0x11,
    /// The server requests the client to rediscover the database.
    #[error("Database out of sync")]
    DatabaseOutOfSync = 0x12,
    /// The attribute parameter value was not allowed.
    #[error("Value not allowed")]
    ValueNotAllowed = 0x13,
    /// Write operation cannot be fulfilled for reasons other than permissions.
    #[error("Write request rejected")]
    WriteRequestRejected = 0xFC,
    /// Client Characteristic Configuration descriptor is not configured
    /// according to the requirements of the profile or service.
    #[error("Client Characteristic Configuration Descriptor improperly configured")]
    CccdImproperlyConfigured = 0xFD,
    /// Request cannot be serviced because an operation that has been previously
    /// triggered is still in progress.
    #[error("Procedure already in progress")]
    ProcedureAlreadyInProgress = 0xFE,
    /// Attribute value is out of range.
    #[error("Out of range")]
    OutOfRange = 0xFF,
}

impl ErrorCode {
    /// Converts a raw status byte, mapping unknown codes to
    /// [`ErrorCode::UnlikelyError`]. Returns [`None`] for success (`0`).
    #[inline]
    #[must_use]
    pub fn from_status(v: u8) -> Option<Self> {
        (v != 0).then(|| Self::try_from(v).unwrap_or(Self::UnlikelyError))
    }

    /// Returns whether the request may succeed after raising the link
    /// security level.
    #[inline]
    #[must_use]
    pub const fn is_security(self) -> bool {
        matches!(
            self,
            Self::InsufficientEncryption | Self::InsufficientAuthentication
        )
    }
}

#[cfg(test)]
mod tests {
    use enum_iterator::all;

    use super::*;

    #[test]
    fn opcode() {
        for op in all::<Opcode>() {
            let raw = u8::from(op);
            assert_eq!(Opcode::try_from(raw).ok(), Some(op));
            assert_eq!(op.to_string(), format!("{op:?}"));
        }
        assert_eq!(Opcode::ReadByTypeReq.to_string(), "ReadByTypeReq");
    }

    #[test]
    fn error_code_status() {
        assert_eq!(ErrorCode::from_status(0), None);
        assert_eq!(ErrorCode::from_status(0x14), Some(ErrorCode::UnlikelyError));
        for ec in all::<ErrorCode>() {
            assert_eq!(ErrorCode::from_status(ec.into()), Some(ec));
            assert!(!ec.to_string().is_empty());
        }
        let sec: Vec<_> = all::<ErrorCode>().filter(|ec| ec.is_security()).collect();
        assert_eq!(
            sec,
            [
                ErrorCode::InsufficientAuthentication,
                ErrorCode::InsufficientEncryption
            ]
        );
    }
}
