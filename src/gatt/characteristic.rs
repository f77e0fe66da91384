use structbuf::Unpack;

use crate::att::Handle;
use crate::gap::Uuid;
use crate::ipc::ObjectPath;

use super::{CharProps, CharRecord, FmtType};

/// Discovered characteristic.
#[derive(Debug)]
pub struct Characteristic {
    pub(super) path: ObjectPath,
    /// Characteristic value handle.
    pub(super) hdl: Handle,
    /// Last handle of the characteristic definition.
    pub(super) end: Handle,
    pub(super) props: CharProps,
    pub(super) uuid: Uuid,
    pub(super) value: Option<Vec<u8>>,
    pub(super) desc: Descriptors,
    /// Set while a caller request (value read or write) is outstanding.
    pub(super) pending: bool,
}

impl Characteristic {
    /// Creates a characteristic from its persisted declaration.
    pub(super) fn new(svc: &ObjectPath, r: CharRecord) -> Self {
        Self {
            path: svc.child(format_args!("characteristic{:04x}", r.hdl.get())),
            hdl: r.hdl,
            end: r.end,
            props: r.props,
            uuid: r.uuid,
            value: None,
            desc: Descriptors::default(),
            pending: false,
        }
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Returns the value handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.hdl
    }

    /// Returns the last handle of the characteristic definition.
    #[inline(always)]
    #[must_use]
    pub const fn end(&self) -> Handle {
        self.end
    }

    /// Returns the cached value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Returns the descriptor record.
    #[inline(always)]
    #[must_use]
    pub const fn descriptors(&self) -> &Descriptors {
        &self.desc
    }

    /// Returns the persisted declaration.
    pub(super) const fn record(&self) -> CharRecord {
        CharRecord {
            hdl: self.hdl,
            props: self.props,
            end: self.end,
            uuid: self.uuid,
        }
    }

    /// Returns the `GetProperties` view.
    #[must_use]
    pub fn info(&self) -> CharInfo {
        CharInfo {
            uuid: self.uuid,
            name: String::new(),
            description: self.desc.user_desc.clone(),
            client_configuration: self.desc.ccc.unwrap_or_default(),
            properties: self.props.bits(),
            value: self.value.clone(),
            format: self.desc.format,
        }
    }
}

/// Characteristic descriptor values. Fields are [`None`] until discovered.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Descriptors {
    /// Client Characteristic Configuration descriptor handle.
    pub ccc_hdl: Option<Handle>,
    /// Client Characteristic Configuration descriptor value.
    pub ccc: Option<u16>,
    /// Characteristic User Description.
    pub user_desc: Option<String>,
    /// Characteristic Presentation Format.
    pub format: Option<Format>,
}

/// Characteristic Presentation Format descriptor value
/// ([Vol 3] Part G, Section 3.3.3.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Format {
    pub format: u8,
    pub exponent: i8,
    pub unit: u16,
    pub namespace: u8,
    pub description: u16,
}

impl Format {
    /// Encoded descriptor length.
    pub const LEN: usize = 7;

    /// Parses the descriptor value. Returns [`None`] if the value is too
    /// short. Trailing bytes are ignored.
    #[must_use]
    pub fn parse(v: &[u8]) -> Option<Self> {
        if v.len() < Self::LEN {
            return None;
        }
        let mut p = v.unpack();
        Some(Self {
            format: p.u8(),
            exponent: p.i8(),
            unit: p.u16(),
            namespace: p.u8(),
            description: p.u16(),
        })
    }

    /// Returns the encoded descriptor value.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [u0, u1] = self.unit.to_le_bytes();
        let [d0, d1] = self.description.to_le_bytes();
        #[allow(clippy::cast_sign_loss)]
        [self.format, self.exponent as u8, u0, u1, self.namespace, d0, d1]
    }

    /// Returns the value format type, if known.
    #[inline]
    #[must_use]
    pub fn typ(self) -> Option<FmtType> {
        FmtType::try_from(self.format).ok()
    }
}

/// Characteristic properties returned by `GetProperties`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct CharInfo {
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub client_configuration: u16,
    pub properties: u8,
    pub value: Option<Vec<u8>>,
    pub format: Option<Format>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parse() {
        let b = [0x06, 0xFE, 0x2F, 0x27, 0x01, 0x00, 0x01];
        let f = Format::parse(&b).unwrap();
        assert_eq!(
            f,
            Format {
                format: 0x06,
                exponent: -2,
                unit: 0x272F,
                namespace: 0x01,
                description: 0x0100,
            }
        );
        assert_eq!(f.typ(), Some(FmtType::U16));
        assert_eq!(f.to_bytes(), b);
        assert_eq!(Format::parse(&b[..6]), None);
    }
}
