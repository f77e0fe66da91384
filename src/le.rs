//! LE-specific types.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Bluetooth device address ([Vol 6] Part B, Section 1.3).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Addr {
    Public(RawAddr),
    Random(RawAddr),
}

impl Addr {
    /// Constructs a peer address from type and raw components. Returns
    /// [`None`] for an unknown address type.
    #[inline]
    #[must_use]
    pub const fn peer(typ: u8, raw: RawAddr) -> Option<Self> {
        // [Vol 4] Part E, Sections 7.7.65.1 and 7.7.65.10
        match typ {
            // Public Device Address or Public Identity Address
            0x00 | 0x02 => Some(Self::Public(raw)),
            // Random Device Address or Random (Static) Identity Address
            0x01 | 0x03 => Some(Self::Random(raw)),
            _ => None,
        }
    }

    /// Returns the raw 48-bit address.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> RawAddr {
        match self {
            Self::Public(addr) | Self::Random(addr) => addr,
        }
    }

    /// Returns whether this is a public address.
    #[inline]
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public(_))
    }
}

impl Default for Addr {
    #[inline]
    fn default() -> Self {
        Self::Public(RawAddr::default())
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Public(ref raw) => write!(f, "{raw}"),
            Self::Random(ref raw) => write!(f, "{raw} (random)"),
        }
    }
}

// 48-bit untyped device address stored in little-endian byte order.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Creates an address from little-endian bytes.
    #[inline(always)]
    #[must_use]
    pub const fn from_le_bytes(v: [u8; 6]) -> Self {
        Self(v)
    }

    /// Returns the address as little-endian bytes.
    #[inline(always)]
    #[must_use]
    pub const fn as_le_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for RawAddr {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [Vol 3] Part C, Section 3.2.1.3
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Error returned when parsing an address string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid device address")]
pub struct ParseAddrError;

impl FromStr for RawAddr {
    type Err = ParseAddrError;

    /// Parses the `XX:XX:XX:XX:XX:XX` form with the most significant byte
    /// first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut v = [0; 6];
        let mut it = s.split(':');
        for b in v.iter_mut().rev() {
            let part = it.next().ok_or(ParseAddrError)?;
            if part.len() != 2 {
                return Err(ParseAddrError);
            }
            *b = u8::from_str_radix(part, 16).map_err(|_| ParseAddrError)?;
        }
        if it.next().is_some() {
            return Err(ParseAddrError);
        }
        Ok(Self(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_addr_str() {
        let a: RawAddr = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(a.as_le_bytes(), &[0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
        assert_eq!(a.to_string(), "00:11:22:33:44:55");
        assert!("00:11:22:33:44".parse::<RawAddr>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<RawAddr>().is_err());
        assert!("00:11:22:33:44:5G".parse::<RawAddr>().is_err());
    }

    #[test]
    fn peer_type() {
        let raw = RawAddr::from_le_bytes([1, 2, 3, 4, 5, 6]);
        assert_eq!(Addr::peer(0x00, raw), Some(Addr::Public(raw)));
        assert_eq!(Addr::peer(0x03, raw), Some(Addr::Random(raw)));
        assert_eq!(Addr::peer(0x04, raw), None);
        assert!(!Addr::Random(raw).is_public());
    }
}
