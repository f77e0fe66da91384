//! File system storage backend for the Bluetooth LE GATT client.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use burble_gattc::att::Handle;
use burble_gattc::gatt::Store;
use burble_gattc::le::Addr;

/// GATT client attribute cache stored in a file system directory. Each local
/// adapter has its own subdirectory with one file per remote device.
#[derive(Clone, Debug)]
pub struct GattStore(Dir);

impl GattStore {
    const NAME: &'static str = "gattc";

    /// Creates or opens an attribute cache in the specified root directory.
    #[inline(always)]
    #[must_use]
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self(Dir::open(root, Self::NAME))
    }

    /// Creates or opens an attribute cache in the current user's local data
    /// directory. Returns [`None`] if the user directory is not available.
    #[inline(always)]
    #[must_use]
    pub fn per_user(app: impl AsRef<Path>) -> Option<Self> {
        Dir::per_user(app, Self::NAME).map(Self)
    }

    /// Removes all cached data of a remote device.
    #[inline(always)]
    pub fn remove(&self, local: Addr, remote: Addr) {
        self.0.remove(local, remote);
    }

    /// Removes all cached data.
    #[inline(always)]
    pub fn clear(&self) {
        self.0.clear();
    }

    fn update(&self, local: Addr, remote: Addr, f: impl FnOnce(&mut Cache)) -> bool {
        let mut c = self.0.load(local, remote).unwrap_or_default();
        f(&mut c);
        self.0.save(local, remote, &c)
    }
}

impl Store for GattStore {
    fn write_characteristics(&self, local: Addr, remote: Addr, start: Handle, v: &str) -> bool {
        self.update(local, remote, |c| {
            c.characteristics.insert(start.get(), v.to_owned());
        })
    }

    fn read_characteristics(&self, local: Addr, remote: Addr, start: Handle) -> Option<String> {
        let mut c: Cache = self.0.load(local, remote)?;
        c.characteristics.remove(&start.get())
    }

    fn write_attribute(&self, local: Addr, remote: Addr, hdl: Handle, v: &str) -> bool {
        self.update(local, remote, |c| {
            c.attributes.insert(hdl.get(), v.to_owned());
        })
    }
}

/// Cached data of one remote device.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
struct Cache {
    /// Encoded characteristic lists keyed by service start handle.
    characteristics: BTreeMap<u16, String>,
    /// Encoded descriptor values keyed by attribute handle.
    attributes: BTreeMap<u16, String>,
}

/// Database in a file system directory.
#[derive(Clone, Debug)]
#[repr(transparent)]
struct Dir(PathBuf);

impl Dir {
    /// Creates or opens a database store in the specified root directory.
    #[inline(always)]
    #[must_use]
    fn open(root: impl AsRef<Path>, name: impl AsRef<Path>) -> Self {
        Self(root.as_ref().join(name))
    }

    /// Creates or opens a database store in the current user's local data
    /// directory.
    #[must_use]
    fn per_user(app: impl AsRef<Path>, name: impl AsRef<Path>) -> Option<Self> {
        let Some(dir) = dirs::data_local_dir() else {
            error!("User data directory not available");
            return None;
        };
        Some(Self(dir.join(app.as_ref()).join(name)))
    }

    /// Saves device data to the file system.
    fn save(&self, local: Addr, remote: Addr, v: &impl Serialize) -> bool {
        let s = match serde_json::to_string_pretty(v) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to serialize data of {remote} ({e})");
                return false;
            }
        };
        let path = self.path(local, remote);
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create database directory: {} ({e})", dir.display());
            }
        }
        match fs::File::create(&path)
            .and_then(|mut f| f.write_all(s.as_bytes()).and_then(|_| f.sync_data()))
        {
            Ok(_) => {
                debug!("Wrote: {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to write: {} ({e})", path.display());
                false
            }
        }
    }

    /// Loads device data from the file system.
    fn load<T: serde::de::DeserializeOwned>(&self, local: Addr, remote: Addr) -> Option<T> {
        let path = self.path(local, remote);
        let s = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => return None,
            Err(e) => {
                error!("Failed to read: {} ({e})", path.display());
                return None;
            }
        };
        serde_json::from_str(&s)
            .map_err(|e| error!("Invalid file contents: {} ({e})", path.display()))
            .ok()
    }

    /// Removes device data from the file system.
    fn remove(&self, local: Addr, remote: Addr) {
        let path = self.path(local, remote);
        match fs::remove_file(&path) {
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => {}
            Err(e) => error!("Failed to remove: {} ({e})", path.display()),
        }
    }

    /// Removes all data from the file system.
    fn clear(&self) {
        match fs::remove_dir_all(&self.0) {
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => {}
            Err(e) => error!("Failed to remove: {} ({e})", self.0.display()),
        }
    }

    /// Returns the file path for the specified device pair.
    fn path(&self, local: Addr, remote: Addr) -> PathBuf {
        (self.0).join(file_name(local)).join(file_name(remote))
    }
}

/// Returns the file name of an address in "P-001122334455" format.
fn file_name(addr: Addr) -> String {
    let typ = if addr.is_public() { 'P' } else { 'R' };
    let raw = addr.raw();
    let b = raw.as_le_bytes();
    format!(
        "{typ}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        b[5], b[4], b[3], b[2], b[1], b[0]
    )
}

#[cfg(test)]
mod tests {
    use tempfile::Builder;

    use burble_gattc::le::RawAddr;

    use super::*;

    const LOCAL: Addr =
        Addr::Public(RawAddr::from_le_bytes([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]));
    const REMOTE: Addr =
        Addr::Random(RawAddr::from_le_bytes([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6]));

    fn h(v: u16) -> Handle {
        Handle::new(v).unwrap()
    }

    #[test]
    fn save_load() {
        let tmp = (Builder::new().prefix("burble-test-")).tempdir().unwrap();
        let db = GattStore(Dir(tmp.path().to_path_buf()));
        assert_eq!(db.read_characteristics(LOCAL, REMOTE, h(0x10)), None);

        let chars = "0012#12#0015#00002a37-0000-1000-8000-00805f9b34fb ";
        assert!(db.write_characteristics(LOCAL, REMOTE, h(0x10), chars));
        let ccc = "00002902-0000-1000-8000-00805f9b34fb#0100";
        assert!(db.write_attribute(LOCAL, REMOTE, h(0x13), ccc));
        assert!(tmp.path().join("P-001122334455").join("R-C60504030201").exists());
        assert_eq!(
            db.read_characteristics(LOCAL, REMOTE, h(0x10)).as_deref(),
            Some(chars)
        );
        assert_eq!(db.read_characteristics(LOCAL, REMOTE, h(0x20)), None);
        assert_eq!(db.read_characteristics(REMOTE, LOCAL, h(0x10)), None);

        let c: Cache = db.0.load(LOCAL, REMOTE).unwrap();
        assert_eq!(c.attributes.len(), 1);

        db.remove(LOCAL, REMOTE);
        assert_eq!(db.read_characteristics(LOCAL, REMOTE, h(0x10)), None);
        db.clear();
        assert!(!tmp.path().join("P-001122334455").exists());
    }

    #[test]
    fn invalid_file() {
        let tmp = (Builder::new().prefix("burble-test-")).tempdir().unwrap();
        let db = GattStore(Dir(tmp.path().to_path_buf()));
        let path = db.0.path(LOCAL, REMOTE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert_eq!(db.read_characteristics(LOCAL, REMOTE, h(0x10)), None);
        assert!(db.write_attribute(LOCAL, REMOTE, h(0x13), "x"));
        let c: Cache = db.0.load(LOCAL, REMOTE).unwrap();
        assert_eq!(c.attributes.get(&0x13).map(String::as_str), Some("x"));
    }
}
