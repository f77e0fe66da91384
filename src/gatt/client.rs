use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::att::{self, Chan, Conn, Handle, Lease, Link, Request, Response, Transport};
use crate::ipc::{self, Interface, Ipc, Method, ObjectPath, Properties, Property, Reply};
use crate::le::Addr;

use super::*;

/// External collaborators shared by all clients.
#[derive(Clone, Debug)]
pub struct Env {
    pub transport: Arc<dyn Transport>,
    pub ipc: Arc<dyn Ipc>,
    pub store: Arc<dyn Store>,
    pub cfg: Config,
}

/// Remote device identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub local: Addr,
    pub remote: Addr,
    /// Object path of the device. Service paths are created under it.
    pub path: ObjectPath,
}

/// GATT client session of one remote device.
#[derive(Debug)]
pub struct Client {
    pub(super) env: Env,
    pub(super) path: ObjectPath,
    pub(super) conn: Conn,
    /// Lease on the link supplied at registration.
    pub(super) lease: Option<Lease>,
    pub(super) svcs: Vec<PrimaryService>,
    pub(super) pending: Pending,
}

impl Client {
    /// Creates a client for the specified primary services. Characteristics
    /// saved by a previous discovery are loaded from the store, and all
    /// services and characteristics are exported.
    #[must_use]
    pub fn new(
        env: Env,
        dev: Device,
        ch: Chan,
        link: Option<Box<dyn Link>>,
        decls: &[ServiceDecl],
    ) -> Self {
        let (conn, lease) = match link {
            Some(link) => {
                let (conn, lease) = Conn::with_link(dev.local, dev.remote, ch, link);
                (conn, Some(lease))
            }
            None => (Conn::new(dev.local, dev.remote, ch), None),
        };
        let mut this = Self {
            env,
            path: dev.path,
            conn,
            lease,
            svcs: Vec::with_capacity(decls.len()),
            pending: Pending::new(),
        };
        for &decl in decls {
            let svc = this.load_service(decl);
            this.svcs.push(svc);
        }
        this
    }

    /// Returns the device object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Returns the remote device address.
    #[inline(always)]
    #[must_use]
    pub const fn remote(&self) -> Addr {
        self.conn.remote()
    }

    /// Returns the primary services.
    #[inline]
    #[must_use]
    pub fn services(&self) -> &[PrimaryService] {
        &self.svcs
    }

    /// Returns the service object paths.
    #[must_use]
    pub fn service_paths(&self) -> Vec<ObjectPath> {
        self.svcs.iter().map(|s| s.path.clone()).collect()
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns a lease on the live bearer, if any.
    #[inline]
    pub fn lease(&self) -> Option<Lease> {
        self.conn.lease()
    }

    /// Dispatches a method call addressed to one of the client's objects.
    pub fn call(&mut self, path: &ObjectPath, m: Method) {
        let target = self.svcs.iter().find_map(|s| {
            if s.path == *path {
                return Some((s.range.start(), None));
            }
            let c = s.chars.iter().find(|c| c.path == *path)?;
            Some((s.range.start(), Some(c.hdl)))
        });
        match target {
            Some((start, None)) => self.call_service(start, m),
            Some((start, Some(hdl))) => self.call_char(start, hdl, m),
            None => m.fail(ipc::Error::DoesNotExist),
        }
    }

    /// Handles link loss. Discoveries are abandoned without a reply, all
    /// outstanding requests fail, and all leases held by the client are
    /// released. Watchers stay registered, but a link re-acquired by
    /// `UpdateValue` or `SetProperty` does not listen for notifications.
    /// Their values are dropped until a watcher is registered or a discovery
    /// is started.
    pub fn handle_disconnect(&mut self) {
        if !self.conn.invalidate() {
            return debug!("Ignoring disconnect of an inactive link");
        }
        debug!("Disconnected from {}", self.conn.remote());
        for svc in &mut self.svcs {
            if svc.disc.take().is_some() {
                debug!("Abandoned discovery of {}", svc.path);
            }
        }
        self.release_watchers();
        self.abort_queries(&att::Error::Disconnected);
        self.lease = None;
    }

    /// Expires requests and discoveries whose deadline is at or before `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.expire_queries(now);
        self.expire_discoveries(now);
    }

    /// Returns the earliest request or discovery deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.pending.next_deadline(), self.discovery_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Removes all exported objects and subscriber watches, and drops all
    /// outstanding requests and leases.
    pub fn close(&mut self) {
        for svc in &mut self.svcs {
            svc.disc = None;
            for c in &svc.chars {
                self.env.ipc.unregister_object(&c.path, Interface::Characteristic);
            }
            self.env.ipc.unregister_object(&svc.path, Interface::Service);
        }
        self.remove_watchers();
        drop(self.pending.drain());
        self.lease = None;
        debug!("Closed client for {}", self.conn.remote());
    }

    /// Creates a primary service, loading characteristics saved by a previous
    /// discovery.
    fn load_service(&self, decl: ServiceDecl) -> PrimaryService {
        let mut svc = PrimaryService::new(&self.path, decl);
        if !self.env.ipc.register_object(&svc.path, Interface::Service) {
            warn!("Failed to register {}", svc.path);
        }
        let (local, remote) = (self.conn.local(), self.conn.remote());
        let start = decl.range.start();
        if let Some(s) = self.env.store.read_characteristics(local, remote, start) {
            let path = svc.path.clone();
            svc.chars = (decode_chars(&s).into_iter())
                .map(|r| Characteristic::new(&path, r))
                .collect();
            debug!("Loaded {} characteristics of {path}", svc.chars.len());
        }
        for c in &svc.chars {
            if !self.env.ipc.register_object(&c.path, Interface::Characteristic) {
                warn!("Failed to register {}", c.path);
            }
        }
        svc
    }

    fn call_service(&mut self, start: Handle, m: Method) {
        match m {
            Method::DiscoverCharacteristics(r) => self.discover(start, r),
            Method::RegisterCharacteristicsWatcher {
                sender,
                path,
                reply,
            } => self.register_watcher(start, sender, path, reply),
            Method::UnregisterCharacteristicsWatcher {
                sender,
                path,
                reply,
            } => self.unregister_watcher(start, &sender, &path, reply),
            Method::GetProperties(r) => match self.svc_index(start) {
                Some(i) => r.ok(Properties::Service(self.svcs[i].info())),
                None => r.err(ipc::Error::DoesNotExist),
            },
            Method::Disconnect(r) => self.disconnect_service(start, r),
            m => m.fail(ipc::Error::NotSupported),
        }
    }

    fn call_char(&mut self, start: Handle, hdl: Handle, m: Method) {
        match m {
            Method::GetProperties(r) => match self.char_mut(start, hdl) {
                Some(c) => r.ok(Properties::Characteristic(c.info())),
                None => r.err(ipc::Error::DoesNotExist),
            },
            Method::SetProperty { prop, reply } => self.set_property(start, hdl, prop, reply),
            Method::UpdateValue(r) => self.update_value(start, hdl, r),
            m => m.fail(ipc::Error::NotSupported),
        }
    }

    /// Cancels the discovery of the service and releases the lease taken at
    /// registration.
    fn disconnect_service(&mut self, start: Handle, reply: Reply<()>) {
        if let Some(i) = self.svc_index(start) {
            if let Some(d) = self.svcs[i].disc.take() {
                d.reply.err(ipc::Error::failed("Discovery cancelled"));
            }
        }
        if self.lease.take().is_some() {
            debug!("Released registration lease of {}", self.conn.remote());
        }
        reply.ok(());
    }

    /// Reads the characteristic value into the cache.
    fn update_value(&mut self, start: Handle, hdl: Handle, reply: Reply<()>) {
        let lease = match self.begin_request(start, hdl) {
            Ok(lease) => lease,
            Err(e) => return reply.err(e),
        };
        let op = Op::ReadValue(Origin::Caller(reply));
        self.submit(lease, start, Some(hdl), Request::Read(hdl), op);
    }

    /// Writes the characteristic value or its Client Characteristic
    /// Configuration descriptor.
    fn set_property(&mut self, start: Handle, hdl: Handle, prop: Property, reply: Reply<()>) {
        let (req, ccc) = match prop {
            Property::Value(val) => (Request::Write { hdl, val }, false),
            Property::ClientConfiguration(v) => {
                let ccc = self.char_mut(start, hdl).and_then(|c| c.desc.ccc_hdl);
                let Some(ccc) = ccc else {
                    return reply.err(ipc::Error::NotSupported);
                };
                let val = v.to_le_bytes().to_vec();
                (Request::Write { hdl: ccc, val }, true)
            }
        };
        let lease = match self.begin_request(start, hdl) {
            Ok(lease) => lease,
            Err(e) => return reply.err(e),
        };
        let op = if ccc {
            Op::WriteCcc(reply)
        } else {
            Op::WriteValue(reply)
        };
        self.submit(lease, start, Some(hdl), req, op);
    }

    /// Marks the characteristic as having an outstanding caller request and
    /// returns a lease for it.
    fn begin_request(&mut self, start: Handle, hdl: Handle) -> ipc::Result<Lease> {
        match self.char_mut(start, hdl) {
            None => return Err(ipc::Error::DoesNotExist),
            Some(c) if c.pending => return Err(ipc::Error::InProgress),
            Some(_) => {}
        }
        let lease = self.conn.acquire(self.env.transport.as_ref(), false)?;
        if let Some(c) = self.char_mut(start, hdl) {
            c.pending = true;
        }
        Ok(lease)
    }

    /// Handles a characteristic value read.
    pub(super) fn on_value(
        &mut self,
        start: Handle,
        chr: Option<Handle>,
        origin: Origin,
        r: att::Result<Response>,
    ) {
        let r = match r {
            Ok(Response::Value(v)) => Ok(v),
            Ok(_) => Err(att::Error::UnexpectedRsp),
            Err(e) => Err(e),
        };
        let c = chr.and_then(|hdl| self.char_mut(start, hdl));
        if let (Some(c), Ok(v)) = (c, &r) {
            c.value = Some(v.clone());
        }
        match origin {
            Origin::Discovery { gen, last } => match r {
                // Unanswered reads leave the outcome to the discovery timer
                Err(att::Error::Timeout(_)) => {
                    debug!("Discovery read of {chr:?} timed out");
                }
                Err(e) => {
                    debug!("Failed to read value of {chr:?}: {e}");
                    self.on_discovery_value(start, gen, last);
                }
                Ok(_) => self.on_discovery_value(start, gen, last),
            },
            Origin::Caller(reply) => {
                if let Some(c) = chr.and_then(|hdl| self.char_mut(start, hdl)) {
                    c.pending = false;
                }
                match r {
                    Ok(_) => reply.ok(()),
                    Err(e) => {
                        debug!("Failed to read value of {chr:?}: {e}");
                        reply.err(ipc::Error::failed("Update characteristic value failed"));
                    }
                }
            }
        }
    }

    /// Handles a characteristic value or configuration write.
    pub(super) fn on_write(
        &mut self,
        start: Handle,
        chr: Option<Handle>,
        req: Request,
        ccc: bool,
        reply: Reply<()>,
        r: att::Result<Response>,
    ) {
        let ok = matches!(r, Ok(Response::Write));
        if let Some(c) = chr.and_then(|hdl| self.char_mut(start, hdl)) {
            c.pending = false;
            if let (true, Request::Write { val, .. }) = (ok, req) {
                if !ccc {
                    c.value = Some(val);
                } else if let [lo, hi] = *val.as_slice() {
                    c.desc.ccc = Some(u16::from_le_bytes([lo, hi]));
                }
            }
        }
        match r {
            Ok(Response::Write) => reply.ok(()),
            Ok(_) => reply.err(att::Error::UnexpectedRsp.into()),
            Err(e) => reply.err(e.into()),
        }
    }

    /// Returns the index of the service starting at `start`.
    #[inline]
    pub(super) fn svc_index(&self, start: Handle) -> Option<usize> {
        self.svcs.iter().position(|s| s.range.start() == start)
    }

    /// Returns the characteristic with value handle `hdl` in the service
    /// starting at `start`.
    pub(super) fn char_mut(&mut self, start: Handle, hdl: Handle) -> Option<&mut Characteristic> {
        (self.svcs.iter_mut())
            .find(|s| s.range.start() == start)
            .and_then(|s| s.char_mut(hdl))
    }
}
