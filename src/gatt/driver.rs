use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::att::{Link, ReqId, RspResult};
use crate::ipc::{self, Method, ObjectPath, Properties, Property, Reply, WatchId};
use crate::le::Addr;

use super::{Device, Env, Registry, ServiceDecl};

/// Driver input.
#[derive(Debug)]
#[non_exhaustive]
pub enum Input {
    Register {
        dev: Device,
        psm: Option<u16>,
        link: Option<Box<dyn Link>>,
        decls: Vec<ServiceDecl>,
        reply: Reply<Vec<ObjectPath>>,
    },
    Unregister {
        remote: Addr,
        reply: Reply<()>,
    },
    Call {
        path: ObjectPath,
        method: Method,
    },
    Response {
        remote: Addr,
        id: ReqId,
        rsp: RspResult,
    },
    Pdu {
        remote: Addr,
        pdu: Vec<u8>,
    },
    Disconnected(Addr),
    WatchExit(WatchId),
}

/// Runs a [`Registry`] on a single task. All inputs are processed in order.
#[derive(Debug)]
pub struct Driver {
    reg: Registry,
    rx: mpsc::UnboundedReceiver<Input>,
}

impl Driver {
    /// Creates a driver and its control handle.
    #[must_use]
    pub fn new(env: Env) -> (Self, Control) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Self {
            reg: Registry::new(env),
            rx,
        };
        (this, Control(tx))
    }

    /// Spawns the driver on the current runtime.
    #[must_use]
    pub fn spawn(self) -> DriverTask {
        let ct = CancellationToken::new();
        DriverTask {
            h: tokio::spawn(self.run(ct.clone())),
            ct: ct.clone(),
            _g: ct.drop_guard(),
        }
    }

    /// Processes inputs until cancellation or until all [`Control`] handles
    /// are dropped. All clients are closed on return.
    pub async fn run(mut self, ct: CancellationToken) {
        debug!("GATT client driver started");
        loop {
            let deadline = self.reg.next_deadline();
            let input = tokio::select! {
                biased;
                _ = ct.cancelled() => break,
                r = self.rx.recv() => match r {
                    Some(input) => input,
                    None => break,
                },
                _ = sleep_opt(deadline) => {
                    self.reg.handle_timeout(Instant::now());
                    continue;
                }
            };
            self.handle(input);
        }
        self.reg.clear();
        debug!("GATT client driver terminating");
    }

    /// Returns the registry.
    #[inline(always)]
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.reg
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Register {
                dev,
                psm,
                link,
                decls,
                reply,
            } => reply.send(self.reg.register(dev, psm, link, &decls)),
            Input::Unregister { remote, reply } => {
                if self.reg.unregister(remote) {
                    reply.ok(());
                } else {
                    reply.err(ipc::Error::DoesNotExist);
                }
            }
            Input::Call { path, method } => self.reg.call(&path, method),
            Input::Response { remote, id, rsp } => self.reg.handle_rsp(remote, id, rsp),
            Input::Pdu { remote, pdu } => self.reg.handle_pdu(remote, &pdu),
            Input::Disconnected(remote) => self.reg.handle_disconnect(remote),
            Input::WatchExit(id) => self.reg.handle_watch_exit(id),
        }
    }
}

async fn sleep_opt(t: Option<Instant>) {
    match t {
        Some(t) => sleep_until(t).await,
        None => std::future::pending().await,
    }
}

/// Spawned driver task.
#[derive(Debug)]
pub struct DriverTask {
    h: JoinHandle<()>,
    ct: CancellationToken,
    _g: DropGuard,
}

impl DriverTask {
    /// Stops the driver and waits for it to close all clients.
    pub async fn stop(self) {
        self.ct.cancel();
        if let Err(e) = self.h.await {
            debug!("GATT client driver task failed: {e}");
        }
    }
}

/// Cloneable driver control handle.
#[derive(Clone, Debug)]
pub struct Control(mpsc::UnboundedSender<Input>);

impl Control {
    /// Sends an input to the driver. Returns `false` if the driver is gone.
    #[inline]
    pub fn send(&self, input: Input) -> bool {
        self.0.send(input).is_ok()
    }

    /// Registers the primary services of a remote device.
    pub async fn register(
        &self,
        dev: Device,
        psm: Option<u16>,
        link: Option<Box<dyn Link>>,
        decls: Vec<ServiceDecl>,
    ) -> ipc::Result<Vec<ObjectPath>> {
        self.request(|reply| Input::Register {
            dev,
            psm,
            link,
            decls,
            reply,
        })
        .await
    }

    /// Unregisters a remote device.
    pub async fn unregister(&self, remote: Addr) -> ipc::Result<()> {
        self.request(|reply| Input::Unregister { remote, reply }).await
    }

    /// Delivers a link response.
    #[inline]
    pub fn response(&self, remote: Addr, id: ReqId, rsp: RspResult) -> bool {
        self.send(Input::Response { remote, id, rsp })
    }

    /// Delivers an unsolicited PDU.
    #[inline]
    pub fn pdu(&self, remote: Addr, pdu: Vec<u8>) -> bool {
        self.send(Input::Pdu { remote, pdu })
    }

    /// Reports link loss.
    #[inline]
    pub fn disconnected(&self, remote: Addr) -> bool {
        self.send(Input::Disconnected(remote))
    }

    /// Reports subscriber exit.
    #[inline]
    pub fn watch_exit(&self, id: WatchId) -> bool {
        self.send(Input::WatchExit(id))
    }

    /// Calls `DiscoverCharacteristics` on a service.
    pub async fn discover_characteristics(
        &self,
        svc: ObjectPath,
    ) -> ipc::Result<Vec<ObjectPath>> {
        self.call(svc, Method::DiscoverCharacteristics).await
    }

    /// Calls `RegisterCharacteristicsWatcher` on a service.
    pub async fn register_watcher(
        &self,
        svc: ObjectPath,
        sender: String,
        path: ObjectPath,
    ) -> ipc::Result<()> {
        let m = |reply| Method::RegisterCharacteristicsWatcher {
            sender,
            path,
            reply,
        };
        self.call(svc, m).await
    }

    /// Calls `UnregisterCharacteristicsWatcher` on a service.
    pub async fn unregister_watcher(
        &self,
        svc: ObjectPath,
        sender: String,
        path: ObjectPath,
    ) -> ipc::Result<()> {
        let m = |reply| Method::UnregisterCharacteristicsWatcher {
            sender,
            path,
            reply,
        };
        self.call(svc, m).await
    }

    /// Calls `GetProperties` on a service or characteristic.
    pub async fn get_properties(&self, path: ObjectPath) -> ipc::Result<Properties> {
        self.call(path, Method::GetProperties).await
    }

    /// Calls `Disconnect` on a service.
    pub async fn disconnect(&self, svc: ObjectPath) -> ipc::Result<()> {
        self.call(svc, Method::Disconnect).await
    }

    /// Calls `SetProperty` on a characteristic.
    pub async fn set_property(&self, chr: ObjectPath, prop: Property) -> ipc::Result<()> {
        self.call(chr, |reply| Method::SetProperty { prop, reply }).await
    }

    /// Calls `UpdateValue` on a characteristic.
    pub async fn update_value(&self, chr: ObjectPath) -> ipc::Result<()> {
        self.call(chr, Method::UpdateValue).await
    }

    async fn call<T>(
        &self,
        path: ObjectPath,
        f: impl FnOnce(Reply<T>) -> Method,
    ) -> ipc::Result<T> {
        self.request(|reply| Input::Call {
            path,
            method: f(reply),
        })
        .await
    }

    async fn request<T>(&self, f: impl FnOnce(Reply<T>) -> Input) -> ipc::Result<T> {
        let (reply, rx) = Reply::new();
        if !self.send(f(reply)) {
            return Err(ipc::Error::failed("GATT client stopped"));
        }
        rx.await.unwrap_or_else(|_| Err(ipc::Error::failed("No reply")))
    }
}
