use tokio::time::Instant;
use tracing::{debug, warn};

use crate::att::{Chan, Link, ReqId, RspResult};
use crate::ipc::{self, Method, ObjectPath, WatchId};
use crate::le::Addr;

use super::{Client, Device, Env, ServiceDecl};

/// Collection of all GATT client sessions, at most one per remote device.
#[derive(Debug)]
pub struct Registry {
    env: Env,
    clients: Vec<Client>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub const fn new(env: Env) -> Self {
        Self {
            env,
            clients: Vec::new(),
        }
    }

    /// Registers the primary services of a remote device and returns their
    /// object paths. `psm` selects a connection-oriented channel instead of
    /// the fixed ATT channel. If `link` is specified, the client holds a
    /// lease on it until the services are disconnected.
    pub fn register(
        &mut self,
        dev: Device,
        psm: Option<u16>,
        link: Option<Box<dyn Link>>,
        decls: &[ServiceDecl],
    ) -> ipc::Result<Vec<ObjectPath>> {
        if self.get(dev.remote).is_some() {
            return Err(ipc::Error::AlreadyExists);
        }
        debug!("Registering {} services of {}", decls.len(), dev.remote);
        let c = Client::new(self.env.clone(), dev, Chan::from(psm), link, decls);
        let paths = c.service_paths();
        self.clients.push(c);
        Ok(paths)
    }

    /// Removes the client of a remote device. Returns whether it existed.
    pub fn unregister(&mut self, remote: Addr) -> bool {
        let Some(i) = self.clients.iter().position(|c| c.remote() == remote) else {
            return false;
        };
        let mut c = self.clients.remove(i);
        c.close();
        debug!("Unregistered {remote}");
        true
    }

    /// Returns the client of a remote device.
    #[must_use]
    pub fn get(&self, remote: Addr) -> Option<&Client> {
        self.clients.iter().find(|c| c.remote() == remote)
    }

    /// Returns the client of a remote device.
    pub fn get_mut(&mut self, remote: Addr) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.remote() == remote)
    }

    /// Dispatches a method call to the client that owns `path`.
    pub fn call(&mut self, path: &ObjectPath, m: Method) {
        match self.clients.iter_mut().find(|c| path.is_under(c.path())) {
            Some(c) => c.call(path, m),
            None => m.fail(ipc::Error::DoesNotExist),
        }
    }

    /// Delivers a link response.
    pub fn handle_rsp(&mut self, remote: Addr, id: ReqId, rsp: RspResult) {
        match self.get_mut(remote) {
            Some(c) => c.handle_rsp(id, rsp),
            None => warn!("Response {id} for unknown device {remote}"),
        }
    }

    /// Delivers an unsolicited PDU.
    pub fn handle_pdu(&mut self, remote: Addr, pdu: &[u8]) {
        match self.get_mut(remote) {
            Some(c) => c.handle_pdu(pdu),
            None => debug!("PDU for unknown device {remote}"),
        }
    }

    /// Handles link loss.
    pub fn handle_disconnect(&mut self, remote: Addr) {
        if let Some(c) = self.get_mut(remote) {
            c.handle_disconnect();
        }
    }

    /// Handles subscriber exit.
    pub fn handle_watch_exit(&mut self, id: WatchId) {
        if !self.clients.iter_mut().any(|c| c.handle_watch_exit(id)) {
            debug!("Exit of unknown watch {id:?}");
        }
    }

    /// Expires requests and discoveries of all clients.
    pub fn handle_timeout(&mut self, now: Instant) {
        for c in &mut self.clients {
            c.handle_timeout(now);
        }
    }

    /// Returns the earliest deadline of all clients.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.clients.iter().filter_map(Client::next_deadline).min()
    }

    /// Closes all clients.
    pub fn clear(&mut self) {
        for mut c in self.clients.drain(..) {
            c.close();
        }
    }
}
