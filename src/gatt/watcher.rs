use tracing::debug;

use crate::att::{Handle, Lease};
use crate::ipc::{self, ObjectPath, Reply, WatchId};

use super::Client;

/// Subscriber to the value changes of one primary service.
#[derive(Debug)]
pub struct Watcher {
    /// Subscriber IPC name.
    pub(super) name: String,
    /// Object path on which the subscriber receives events.
    pub(super) path: ObjectPath,
    pub(super) watch: WatchId,
    /// Lease taken at registration. Released on disconnect.
    pub(super) lease: Option<Lease>,
}

impl Watcher {
    #[inline]
    fn is(&self, name: &str, path: &ObjectPath) -> bool {
        self.name == name && self.path == *path
    }
}

impl Client {
    /// Registers a watcher for the service at `start`. The bearer is put into
    /// listen mode so that notifications and indications are delivered.
    pub(super) fn register_watcher(
        &mut self,
        start: Handle,
        name: String,
        path: ObjectPath,
        reply: Reply<()>,
    ) {
        let Some(i) = self.svc_index(start) else {
            return reply.err(ipc::Error::DoesNotExist);
        };
        if self.svcs[i].watchers.iter().any(|w| w.is(&name, &path)) {
            return reply.err(ipc::Error::AlreadyExists);
        }
        let lease = match self.conn.acquire(self.env.transport.as_ref(), true) {
            Ok(lease) => lease,
            Err(e) => return reply.err(e.into()),
        };
        let Some(watch) = self.env.ipc.watch_name(&name) else {
            return reply.err(ipc::Error::failed("Unable to watch subscriber"));
        };
        let svc = &mut self.svcs[i];
        debug!("Registered watcher {name} {path} for {}", svc.path);
        svc.watchers.push(Watcher {
            name,
            path,
            watch,
            lease: Some(lease),
        });
        reply.ok(());
    }

    /// Removes a watcher registered by the same subscriber.
    pub(super) fn unregister_watcher(
        &mut self,
        start: Handle,
        name: &str,
        path: &ObjectPath,
        reply: Reply<()>,
    ) {
        let Some(i) = self.svc_index(start) else {
            return reply.err(ipc::Error::DoesNotExist);
        };
        let svc = &mut self.svcs[i];
        let Some(j) = svc.watchers.iter().position(|w| w.is(name, path)) else {
            return reply.err(ipc::Error::NotAuthorized);
        };
        let w = svc.watchers.remove(j);
        self.env.ipc.unwatch(w.watch);
        debug!("Unregistered watcher {name} {path} from {}", svc.path);
        reply.ok(());
    }

    /// Removes the watcher whose subscriber went away. Returns whether the
    /// watcher belonged to this client.
    pub fn handle_watch_exit(&mut self, id: WatchId) -> bool {
        for svc in &mut self.svcs {
            if let Some(j) = svc.watchers.iter().position(|w| w.watch == id) {
                let w = svc.watchers.remove(j);
                debug!("Watcher {} {} exited", w.name, w.path);
                return true;
            }
        }
        false
    }

    /// Releases the leases of all watchers.
    pub(super) fn release_watchers(&mut self) {
        for w in self.svcs.iter_mut().flat_map(|s| s.watchers.iter_mut()) {
            w.lease = None;
        }
    }

    /// Removes all watchers and their liveness watches.
    pub(super) fn remove_watchers(&mut self) {
        for svc in &mut self.svcs {
            for w in svc.watchers.drain(..) {
                self.env.ipc.unwatch(w.watch);
            }
        }
    }
}
