use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroU16;

use crate::name_of;

/// Attribute handle ([Vol 3] Part F, Section 3.2.2).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Handle(NonZeroU16);

impl Handle {
    /// Wraps a raw handle. Returns `None` if the handle is invalid.
    #[inline]
    #[must_use]
    pub const fn new(h: u16) -> Option<Self> {
        match NonZeroU16::new(h) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the next handle or `None` if the maximum handle was reached.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Self::new(self.0.get().wrapping_add(1))
    }

    /// Returns the raw handle value.
    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl Debug for Handle {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#06X})", name_of!(Handle), self.0.get())
    }
}

impl Display for Handle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Handle> for u16 {
    #[inline]
    fn from(h: Handle) -> Self {
        h.0.get()
    }
}

/// Inclusive range of attribute handles. This is a `Copy` version of
/// `RangeInclusive<Handle>`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub struct HandleRange {
    start: Handle,
    end: Handle,
}

impl HandleRange {
    /// Creates a new handle range `start..=end` from raw handles. Returns
    /// [`None`] if either handle is invalid or the range is empty.
    #[inline]
    #[must_use]
    pub const fn from_raw(start: u16, end: u16) -> Option<Self> {
        match (Handle::new(start), Handle::new(end)) {
            (Some(start), Some(end)) if start.0.get() <= end.0.get() => {
                Some(Self { start, end })
            }
            _ => None,
        }
    }

    /// Returns the starting handle.
    #[inline(always)]
    #[must_use]
    pub const fn start(self) -> Handle {
        self.start
    }

    /// Returns the ending handle.
    #[inline(always)]
    #[must_use]
    pub const fn end(self) -> Handle {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_size() {
        assert_eq!(std::mem::size_of::<Handle>(), 2);
        assert_eq!(std::mem::size_of::<Option<Handle>>(), 2);
        assert_eq!(std::mem::size_of::<HandleRange>(), 4);
    }

    #[test]
    fn range_from_raw() {
        let r = HandleRange::from_raw(0x10, 0x10).unwrap();
        assert_eq!((r.start().get(), r.end().get()), (0x10, 0x10));
        assert_eq!(HandleRange::from_raw(0x11, 0x10), None);
        assert_eq!(HandleRange::from_raw(0, 0x10), None);
        assert_eq!(Handle::new(0xFFFF).unwrap().next(), None);
        assert_eq!(format!("{}", Handle::new(1).unwrap()), "Handle(0x0001)");
    }
}
