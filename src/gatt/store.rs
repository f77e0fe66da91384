use std::collections::BTreeMap;
use std::fmt::{Debug, Write as _};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::att::Handle;
use crate::gap::Uuid;
use crate::le::Addr;

use super::CharProps;

/// Persistent storage of discovered characteristic metadata, keyed by the
/// local and remote device addresses.
pub trait Store: Debug + Send + Sync {
    /// Saves the encoded characteristic list of the service starting at
    /// `start`. Returns whether the write succeeded.
    fn write_characteristics(&self, local: Addr, remote: Addr, start: Handle, v: &str) -> bool;

    /// Returns the encoded characteristic list of the service starting at
    /// `start`.
    fn read_characteristics(&self, local: Addr, remote: Addr, start: Handle) -> Option<String>;

    /// Saves an encoded attribute value. Returns whether the write succeeded.
    fn write_attribute(&self, local: Addr, remote: Addr, hdl: Handle, v: &str) -> bool;
}

/// Persisted characteristic declaration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharRecord {
    /// Characteristic value handle.
    pub hdl: Handle,
    pub props: CharProps,
    /// Last handle of the characteristic definition.
    pub end: Handle,
    pub uuid: Uuid,
}

/// Encodes a characteristic list as space-terminated
/// `HANDLE#PROPERTIES#END#UUID` entries.
#[must_use]
pub fn encode_chars(recs: impl IntoIterator<Item = CharRecord>) -> String {
    let mut s = String::new();
    for r in recs {
        // Writing to a String never fails
        let _ = write!(
            s,
            "{:04X}#{:02X}#{:04X}#{} ",
            r.hdl.get(),
            r.props.bits(),
            r.end.get(),
            r.uuid.long()
        );
    }
    s
}

/// Decodes a characteristic list. Malformed entries are skipped.
#[must_use]
pub fn decode_chars(s: &str) -> Vec<CharRecord> {
    s.split(' ')
        .filter(|e| !e.is_empty())
        .filter_map(|e| {
            let r = decode_char(e);
            if r.is_none() {
                warn!("Discarding malformed characteristic record: {e:?}");
            }
            r
        })
        .collect()
}

fn decode_char(e: &str) -> Option<CharRecord> {
    let mut it = e.splitn(4, '#');
    let hdl = Handle::new(u16::from_str_radix(it.next()?, 16).ok()?)?;
    let props = CharProps::from_bits_retain(u8::from_str_radix(it.next()?, 16).ok()?);
    let end = Handle::new(u16::from_str_radix(it.next()?, 16).ok()?)?;
    let uuid = it.next()?.parse().ok()?;
    (hdl <= end).then_some(CharRecord {
        hdl,
        props,
        end,
        uuid,
    })
}

/// Encodes an attribute value as `UUID#HEXBYTES`.
#[must_use]
pub fn encode_attr(uuid: Uuid, v: &[u8]) -> String {
    let mut s = uuid.long().to_string();
    s.reserve(1 + v.len() * 2);
    s.push('#');
    for b in v {
        let _ = write!(s, "{b:02X}");
    }
    s
}

/// Decodes an attribute value encoded by [`encode_attr`].
#[must_use]
pub fn decode_attr(s: &str) -> Option<(Uuid, Vec<u8>)> {
    let (uuid, hex) = s.split_once('#')?;
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    let v = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some((uuid.parse().ok()?, v))
}

/// Volatile [`Store`] implementation.
#[derive(Debug, Default)]
pub struct MemStore {
    chars: Mutex<BTreeMap<(Addr, Addr, Handle), String>>,
    attrs: Mutex<BTreeMap<(Addr, Addr, Handle), String>>,
}

impl MemStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an attribute value saved by [`Store::write_attribute`].
    #[must_use]
    pub fn attribute(&self, local: Addr, remote: Addr, hdl: Handle) -> Option<String> {
        self.attrs.lock().get(&(local, remote, hdl)).cloned()
    }
}

impl Store for MemStore {
    fn write_characteristics(&self, local: Addr, remote: Addr, start: Handle, v: &str) -> bool {
        trace!("Characteristics for {remote} {start}: {v}");
        self.chars.lock().insert((local, remote, start), v.to_owned());
        true
    }

    fn read_characteristics(&self, local: Addr, remote: Addr, start: Handle) -> Option<String> {
        self.chars.lock().get(&(local, remote, start)).cloned()
    }

    fn write_attribute(&self, local: Addr, remote: Addr, hdl: Handle, v: &str) -> bool {
        trace!("Attribute for {remote} {hdl}: {v}");
        self.attrs.lock().insert((local, remote, hdl), v.to_owned());
        true
    }
}
