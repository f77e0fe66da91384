use tokio::time::Instant;

use crate::att::{Handle, HandleRange};
use crate::gap::Uuid;
use crate::ipc::{ObjectPath, Reply};

use super::{Characteristic, Watcher};

/// Primary service declaration discovered by the caller before registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServiceDecl {
    pub range: HandleRange,
    pub uuid: Uuid,
}

/// Discovered primary service.
#[derive(Debug)]
pub struct PrimaryService {
    pub(super) path: ObjectPath,
    pub(super) range: HandleRange,
    pub(super) uuid: Uuid,
    pub(super) chars: Vec<Characteristic>,
    pub(super) watchers: Vec<Watcher>,
    pub(super) disc: Option<Discovery>,
    /// Generation of the most recently started discovery.
    pub(super) disc_gen: u64,
}

impl PrimaryService {
    pub(super) fn new(dev: &ObjectPath, decl: ServiceDecl) -> Self {
        Self {
            path: dev.child(format_args!("service{:04x}", decl.range.start().get())),
            range: decl.range,
            uuid: decl.uuid,
            chars: Vec::new(),
            watchers: Vec::new(),
            disc: None,
            disc_gen: 0,
        }
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Returns the service handle range.
    #[inline(always)]
    pub const fn range(&self) -> HandleRange {
        self.range
    }

    /// Returns the service characteristics in discovery order.
    #[inline]
    #[must_use]
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.chars
    }

    /// Returns whether a discovery is in progress.
    #[inline]
    #[must_use]
    pub const fn is_discovering(&self) -> bool {
        self.disc.is_some()
    }

    /// Returns the number of registered watchers.
    #[inline]
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Returns the characteristic with the specified value handle.
    #[inline]
    pub(super) fn char_mut(&mut self, hdl: Handle) -> Option<&mut Characteristic> {
        self.chars.iter_mut().find(|c| c.hdl == hdl)
    }

    /// Returns the paths of all characteristics in discovery order.
    pub(super) fn char_paths(&self) -> Vec<ObjectPath> {
        self.chars.iter().map(|c| c.path.clone()).collect()
    }

    /// Returns the `GetProperties` view.
    #[must_use]
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            uuid: self.uuid,
            characteristics: self.char_paths(),
        }
    }
}

/// Service properties returned by `GetProperties`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<ObjectPath>,
}

/// In-progress characteristic discovery.
#[derive(Debug)]
pub(super) struct Discovery {
    pub gen: u64,
    pub reply: Reply<Vec<ObjectPath>>,
    /// Value fetch deadline. Unset while characteristic discovery is pending.
    pub deadline: Option<Instant>,
}
