//! Remote procedure surface used to expose services and characteristics to
//! other processes.
//!
//! The engine does not speak any particular IPC protocol. It registers
//! objects and emits events through the [`Ipc`] trait, and receives calls as
//! [`Method`] values carrying a one-shot [`Reply`].

use std::fmt::{Debug, Display, Formatter};

use tokio::sync::oneshot;
use tracing::trace;

use crate::att;
use crate::gatt::{CharInfo, ServiceInfo};

/// Error reported to an IPC caller.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}")]
    Failed(String),
    #[error("Invalid arguments in method call")]
    InvalidArguments,
    #[error("Operation Not Authorized")]
    NotAuthorized,
    #[error("Already Exists")]
    AlreadyExists,
    #[error("In Progress")]
    InProgress,
    #[error("Operation is not supported")]
    NotSupported,
    #[error("Does Not Exist")]
    DoesNotExist,
}

impl Error {
    /// Creates a [`Error::Failed`] error with the specified message.
    #[inline]
    #[must_use]
    pub fn failed(msg: impl Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

impl From<att::Error> for Error {
    #[inline]
    fn from(e: att::Error) -> Self {
        Self::failed(e)
    }
}

/// Common IPC result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Object path of an exported service or characteristic.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Creates an object path.
    #[inline]
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the path of a child object.
    #[inline]
    #[must_use]
    pub fn child(&self, name: impl Display) -> Self {
        Self(format!("{}/{name}", self.0))
    }

    /// Returns whether `self` is equal to `parent` or one of its descendants.
    #[must_use]
    pub fn is_under(&self, parent: &Self) -> bool {
        self.0
            .strip_prefix(parent.0.as_str())
            .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Returns the path as a string slice.
    #[inline(always)]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    #[inline]
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Interface implemented by an exported object.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Interface {
    /// `DiscoverCharacteristics`, `RegisterCharacteristicsWatcher`,
    /// `UnregisterCharacteristicsWatcher`, `GetProperties`, `Disconnect`.
    Service,
    /// `GetProperties`, `SetProperty`, `UpdateValue`.
    Characteristic,
}

/// Subscriber liveness watch identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct WatchId(pub u64);

/// IPC surface used by the engine.
pub trait Ipc: Debug + Send + Sync {
    /// Exports an object. Returns `false` if the object cannot be exported.
    fn register_object(&self, path: &ObjectPath, iface: Interface) -> bool;

    /// Removes an exported object.
    fn unregister_object(&self, path: &ObjectPath, iface: Interface);

    /// Starts monitoring the connection of the named subscriber. The
    /// returned ID is reported back when the subscriber disconnects.
    fn watch_name(&self, name: &str) -> Option<WatchId>;

    /// Stops monitoring a subscriber.
    fn unwatch(&self, id: WatchId);

    /// Sends a one-way `ValueChanged` event to a watcher.
    fn value_changed(&self, name: &str, path: &ObjectPath, chr: &ObjectPath, val: &[u8]);
}

/// Deferred method reply. Dropping a reply without sending it closes the
/// call without a result.
#[derive(Debug)]
#[must_use]
pub struct Reply<T>(oneshot::Sender<Result<T>>);

impl<T> Reply<T> {
    /// Creates a new reply and the receiver of its result.
    #[inline]
    pub fn new() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Sends the method result. The caller may have gone away, in which case
    /// the result is discarded.
    #[inline]
    pub fn send(self, r: Result<T>) {
        if self.0.send(r).is_err() {
            trace!("Method caller went away");
        }
    }

    /// Sends a successful result.
    #[inline(always)]
    pub fn ok(self, v: T) {
        self.send(Ok(v));
    }

    /// Sends an error.
    #[inline(always)]
    pub fn err(self, e: Error) {
        self.send(Err(e));
    }
}

/// Object properties returned by `GetProperties`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Properties {
    Service(ServiceInfo),
    Characteristic(CharInfo),
}

/// Dynamically typed `SetProperty` value.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Variant {
    Bytes(Vec<u8>),
    U16(u16),
    Str(String),
}

/// Writable characteristic property.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Property {
    /// Characteristic value.
    Value(Vec<u8>),
    /// Client Characteristic Configuration descriptor value.
    ClientConfiguration(u16),
}

impl Property {
    /// Validates a `SetProperty` name/value pair.
    pub fn parse(name: &str, v: Variant) -> Result<Self> {
        match (name, v) {
            ("Value", Variant::Bytes(b)) => Ok(Self::Value(b)),
            ("ClientConfiguration", Variant::U16(v)) => Ok(Self::ClientConfiguration(v)),
            ("ClientConfiguration", Variant::Bytes(b)) => match *b.as_slice() {
                [lo, hi] => Ok(Self::ClientConfiguration(u16::from_le_bytes([lo, hi]))),
                _ => Err(Error::InvalidArguments),
            },
            _ => Err(Error::InvalidArguments),
        }
    }
}

/// Method call addressed to an exported object.
#[derive(Debug)]
#[non_exhaustive]
pub enum Method {
    DiscoverCharacteristics(Reply<Vec<ObjectPath>>),
    RegisterCharacteristicsWatcher {
        sender: String,
        path: ObjectPath,
        reply: Reply<()>,
    },
    UnregisterCharacteristicsWatcher {
        sender: String,
        path: ObjectPath,
        reply: Reply<()>,
    },
    GetProperties(Reply<Properties>),
    Disconnect(Reply<()>),
    SetProperty {
        prop: Property,
        reply: Reply<()>,
    },
    UpdateValue(Reply<()>),
}

impl Method {
    /// Fails the call with the specified error.
    pub fn fail(self, e: Error) {
        match self {
            Self::DiscoverCharacteristics(r) => r.err(e),
            Self::GetProperties(r) => r.err(e),
            Self::RegisterCharacteristicsWatcher { reply, .. }
            | Self::UnregisterCharacteristicsWatcher { reply, .. }
            | Self::SetProperty { reply, .. } => reply.err(e),
            Self::Disconnect(r) | Self::UpdateValue(r) => r.err(e),
        }
    }
}
