use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::le::Addr;

use super::*;

/// Request identifier used to correlate a [`Link`] response with the request
/// that caused it.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ReqId(u64);

impl ReqId {
    /// Returns the first identifier of a new sequence.
    #[inline(always)]
    pub(crate) const fn first() -> Self {
        Self(1)
    }

    /// Returns the current identifier and advances `self`.
    #[inline]
    pub(crate) fn advance(&mut self) -> Self {
        let id = *self;
        self.0 = self.0.wrapping_add(1);
        id
    }
}

impl Debug for ReqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReqId({})", self.0)
    }
}

impl Display for ReqId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel carrying the attribute protocol.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Chan {
    /// Fixed ATT channel ([Vol 3] Part A, Section 2.1).
    #[default]
    Att,
    /// Connection-oriented channel with the specified PSM.
    Psm(u16),
}

impl From<Option<u16>> for Chan {
    #[inline]
    fn from(psm: Option<u16>) -> Self {
        psm.map_or(Self::Att, Self::Psm)
    }
}

/// Link security level.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SecLevel {
    /// No encryption.
    #[default]
    Low,
    /// Unauthenticated encryption.
    Medium,
    /// Authenticated encryption.
    High,
}

/// Factory of attribute protocol links.
pub trait Transport: Debug + Send + Sync {
    /// Opens a new link to `remote` at the specified security level.
    fn connect(&self, local: Addr, remote: Addr, ch: Chan, sec: SecLevel)
        -> Result<Box<dyn Link>>;
}

/// Established attribute protocol link. Responses to [`Link::send`] are
/// delivered back to the client with the same [`ReqId`].
pub trait Link: Debug + Send {
    /// Encodes and sends a request.
    fn send(&mut self, id: ReqId, req: &Request) -> Result<()>;

    /// Sends `ATT_HANDLE_VALUE_CFM` in response to an indication.
    fn confirm(&mut self) -> Result<()>;

    /// Requests a new link security level. Returns whether the change was
    /// initiated.
    fn set_security(&mut self, sec: SecLevel) -> bool;

    /// Closes the link. Called exactly once, when the last [`Lease`] is
    /// dropped.
    fn close(&mut self);
}

/// Shared link state.
#[derive(Debug)]
struct Inner {
    link: Box<dyn Link>,
    sec: SecLevel,
}

/// ATT bearer ([Vol 3] Part F, Section 3.2.11) shared by all outstanding
/// requests and watchers of one device.
#[derive(Debug)]
pub struct Bearer {
    inner: Mutex<Inner>,
    listen: AtomicBool,
}

impl Drop for Bearer {
    fn drop(&mut self) {
        debug!("Closing ATT bearer");
        self.inner.get_mut().link.close();
    }
}

/// Counted reference to a [`Bearer`]. The link is closed when the last lease
/// is dropped.
#[derive(Clone, Debug)]
#[must_use]
pub struct Lease(Arc<Bearer>);

impl Lease {
    /// Sends a request.
    #[inline]
    pub fn send(&self, id: ReqId, req: &Request) -> Result<()> {
        trace!("{id} {:?}", req.opcode());
        self.0.inner.lock().link.send(id, req)
    }

    /// Confirms receipt of an indication.
    #[inline]
    pub fn confirm(&self) -> Result<()> {
        self.0.inner.lock().link.confirm()
    }

    /// Raises link security to [`SecLevel::High`]. Returns `false` if the link
    /// is already at that level or the change was refused.
    pub fn raise_security(&self) -> bool {
        let mut inner = self.0.inner.lock();
        if inner.sec >= SecLevel::High {
            return false;
        }
        if !inner.link.set_security(SecLevel::High) {
            return false;
        }
        debug!("Raised security from {:?} to {:?}", inner.sec, SecLevel::High);
        inner.sec = SecLevel::High;
        true
    }

    /// Returns the current security level.
    #[inline]
    #[must_use]
    pub fn security(&self) -> SecLevel {
        self.0.inner.lock().sec
    }

    /// Returns whether unsolicited PDUs are delivered to the client.
    #[inline]
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.0.listen.load(Ordering::Acquire)
    }

    /// Returns the number of live leases for the bearer.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Enables delivery of unsolicited PDUs. Repeated calls have no effect.
    #[inline]
    fn listen(&self) {
        if !self.0.listen.swap(true, Ordering::AcqRel) {
            debug!("Listening for notifications and indications");
        }
    }
}

/// Device connection state. Holds a weak reference to the bearer so that
/// acquiring a lease while the bearer is alive never opens a second link.
#[derive(Debug)]
pub struct Conn {
    local: Addr,
    remote: Addr,
    ch: Chan,
    bearer: Weak<Bearer>,
}

impl Conn {
    /// Creates connection state without opening a link.
    #[inline]
    #[must_use]
    pub fn new(local: Addr, remote: Addr, ch: Chan) -> Self {
        Self {
            local,
            remote,
            ch,
            bearer: Weak::new(),
        }
    }

    /// Creates connection state around an already established link.
    #[must_use]
    pub fn with_link(local: Addr, remote: Addr, ch: Chan, link: Box<dyn Link>) -> (Self, Lease) {
        let mut this = Self::new(local, remote, ch);
        let lease = this.attach(link);
        (this, lease)
    }

    /// Returns a lease on the live bearer or opens a new link. If `listen` is
    /// set, the bearer also starts delivering unsolicited PDUs.
    pub fn acquire(&mut self, tr: &dyn Transport, listen: bool) -> Result<Lease> {
        let lease = match self.lease() {
            Some(lease) => lease,
            None => {
                debug!("Connecting to {} via {:?}", self.remote, self.ch);
                let link = tr.connect(self.local, self.remote, self.ch, SecLevel::Low)?;
                self.attach(link)
            }
        };
        if listen {
            lease.listen();
        }
        Ok(lease)
    }

    /// Returns a lease on the live bearer, if any.
    #[inline]
    pub fn lease(&self) -> Option<Lease> {
        self.bearer.upgrade().map(Lease)
    }

    /// Forgets the current bearer. Returns whether it was alive. Leases that
    /// are still held keep the link open until they are dropped.
    #[inline]
    pub fn invalidate(&mut self) -> bool {
        let live = self.bearer.strong_count() > 0;
        self.bearer = Weak::new();
        live
    }

    /// Returns the local device address.
    #[inline(always)]
    #[must_use]
    pub const fn local(&self) -> Addr {
        self.local
    }

    /// Returns the remote device address.
    #[inline(always)]
    #[must_use]
    pub const fn remote(&self) -> Addr {
        self.remote
    }

    fn attach(&mut self, link: Box<dyn Link>) -> Lease {
        let b = Arc::new(Bearer {
            inner: Mutex::new(Inner {
                link,
                sec: SecLevel::Low,
            }),
            listen: AtomicBool::new(false),
        });
        self.bearer = Arc::downgrade(&b);
        Lease(b)
    }
}
