use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot::{error::TryRecvError, Receiver};
use tokio::time::Instant;

use crate::att::{
    self, CharDecl, Chan, ErrorCode, Handle, HandleRange, InfoData, Link, Opcode, ReqId, Request,
    Response, RspResult, SecLevel, Transport,
};
use crate::gap::Uuid16;
use crate::ipc::{self, Interface, Ipc, Method, ObjectPath, Properties, Property, Reply, WatchId};
use crate::le::{Addr, RawAddr};

use super::*;

const SVC: &str = "/dev/service0010";
const CHR12: &str = "/dev/service0010/characteristic0012";
const CHR16: &str = "/dev/service0010/characteristic0016";
const CHR21: &str = "/dev/service0010/characteristic0021";

#[derive(Debug, Default)]
struct LinkLog {
    sent: Vec<(ReqId, Request)>,
    confirms: usize,
    security: Vec<SecLevel>,
    closed: usize,
}

/// Transport that records everything sent over its links.
#[derive(Debug, Default)]
pub(super) struct MockTransport {
    log: Arc<Mutex<LinkLog>>,
    connects: AtomicUsize,
    refuse_connect: AtomicBool,
    refuse_security: Arc<AtomicBool>,
}

impl MockTransport {
    fn sent(&self) -> Vec<Request> {
        self.log.lock().sent.iter().map(|(_, r)| r.clone()).collect()
    }

    fn ids(&self, req: &Request) -> Vec<ReqId> {
        (self.log.lock().sent.iter())
            .filter_map(|(id, r)| (r == req).then_some(*id))
            .collect()
    }

    fn id(&self, req: &Request) -> ReqId {
        *self.ids(req).last().unwrap()
    }

    fn connects(&self) -> usize {
        self.connects.load(Relaxed)
    }

    fn confirms(&self) -> usize {
        self.log.lock().confirms
    }

    fn security(&self) -> Vec<SecLevel> {
        self.log.lock().security.clone()
    }

    fn closed(&self) -> usize {
        self.log.lock().closed
    }
}

impl Transport for MockTransport {
    fn connect(&self, _: Addr, _: Addr, _: Chan, _: SecLevel) -> att::Result<Box<dyn Link>> {
        if self.refuse_connect.load(Relaxed) {
            return Err(att::Error::Connect("Connection refused".to_owned()));
        }
        self.connects.fetch_add(1, Relaxed);
        Ok(Box::new(MockLink {
            log: Arc::clone(&self.log),
            refuse_security: Arc::clone(&self.refuse_security),
        }))
    }
}

#[derive(Debug)]
struct MockLink {
    log: Arc<Mutex<LinkLog>>,
    refuse_security: Arc<AtomicBool>,
}

impl Link for MockLink {
    fn send(&mut self, id: ReqId, req: &Request) -> att::Result<()> {
        self.log.lock().sent.push((id, req.clone()));
        Ok(())
    }

    fn confirm(&mut self) -> att::Result<()> {
        self.log.lock().confirms += 1;
        Ok(())
    }

    fn set_security(&mut self, sec: SecLevel) -> bool {
        self.log.lock().security.push(sec);
        !self.refuse_security.load(Relaxed)
    }

    fn close(&mut self) {
        self.log.lock().closed += 1;
    }
}

type Event = (String, ObjectPath, ObjectPath, Vec<u8>);

/// IPC surface that records exported objects, watches, and events.
#[derive(Debug, Default)]
pub(super) struct MockIpc {
    objects: Mutex<BTreeSet<ObjectPath>>,
    watches: Mutex<Vec<WatchId>>,
    next_watch: AtomicU64,
    refuse_watch: AtomicBool,
    events: Mutex<Vec<Event>>,
}

impl MockIpc {
    pub(super) fn objects(&self) -> Vec<ObjectPath> {
        self.objects.lock().iter().cloned().collect()
    }

    fn watches(&self) -> Vec<WatchId> {
        self.watches.lock().clone()
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl Ipc for MockIpc {
    fn register_object(&self, path: &ObjectPath, _: Interface) -> bool {
        self.objects.lock().insert(path.clone())
    }

    fn unregister_object(&self, path: &ObjectPath, _: Interface) {
        self.objects.lock().remove(path);
    }

    fn watch_name(&self, _: &str) -> Option<WatchId> {
        if self.refuse_watch.load(Relaxed) {
            return None;
        }
        let id = WatchId(self.next_watch.fetch_add(1, Relaxed) + 1);
        self.watches.lock().push(id);
        Some(id)
    }

    fn unwatch(&self, id: WatchId) {
        self.watches.lock().retain(|&w| w != id);
    }

    fn value_changed(&self, name: &str, path: &ObjectPath, chr: &ObjectPath, val: &[u8]) {
        let e = (name.to_owned(), path.clone(), chr.clone(), val.to_vec());
        self.events.lock().push(e);
    }
}

struct Test {
    tr: Arc<MockTransport>,
    ipc: Arc<MockIpc>,
    store: Arc<MemStore>,
    c: Client,
}

impl Test {
    fn new(recs: &[CharRecord]) -> Self {
        Self::with(Config::default(), recs, false)
    }

    fn with(cfg: Config, recs: &[CharRecord], link: bool) -> Self {
        let tr = Arc::new(MockTransport::default());
        let ipc = Arc::new(MockIpc::default());
        let store = Arc::new(MemStore::new());
        if !recs.is_empty() {
            let v = encode_chars(recs.iter().copied());
            assert!(store.write_characteristics(local(), remote(), h(0x10), &v));
        }
        let link = link.then(|| {
            (tr.connect(local(), remote(), Chan::Att, SecLevel::Low)).unwrap()
        });
        let env = Env {
            transport: tr.clone(),
            ipc: ipc.clone(),
            store: store.clone(),
            cfg,
        };
        let decl = ServiceDecl {
            range: range(0x10, 0x30),
            uuid: Uuid16::new(0x180D).unwrap().as_uuid(),
        };
        let c = Client::new(env, dev(), Chan::Att, link, &[decl]);
        Self { tr, ipc, store, c }
    }

    fn call<T>(
        &mut self,
        path: &str,
        f: impl FnOnce(Reply<T>) -> Method,
    ) -> Receiver<ipc::Result<T>> {
        let (reply, rx) = Reply::new();
        self.c.call(&ObjectPath::from(path), f(reply));
        rx
    }

    fn rsp(&mut self, req: Request, rsp: RspResult) {
        let id = self.tr.id(&req);
        self.c.handle_rsp(id, rsp);
    }

    fn chr(&self, hdl: u16) -> &Characteristic {
        (self.c.services()[0].characteristics().iter())
            .find(|c| c.handle() == h(hdl))
            .unwrap()
    }

    fn watch(&mut self, name: &str, path: &str) -> ipc::Result<()> {
        let (name, path) = (name.to_owned(), ObjectPath::from(path));
        let mut rx = self.call(SVC, |reply| Method::RegisterCharacteristicsWatcher {
            sender: name,
            path,
            reply,
        });
        rx.try_recv().unwrap()
    }

    fn unwatch(&mut self, name: &str, path: &str) -> ipc::Result<()> {
        let (name, path) = (name.to_owned(), ObjectPath::from(path));
        let mut rx = self.call(SVC, |reply| Method::UnregisterCharacteristicsWatcher {
            sender: name,
            path,
            reply,
        });
        rx.try_recv().unwrap()
    }
}

fn local() -> Addr {
    Addr::Public(RawAddr::from_le_bytes([0x11; 6]))
}

fn remote() -> Addr {
    Addr::Random(RawAddr::from_le_bytes([0xC2; 6]))
}

fn dev() -> Device {
    Device {
        local: local(),
        remote: remote(),
        path: ObjectPath::from("/dev"),
    }
}

fn h(v: u16) -> Handle {
    Handle::new(v).unwrap()
}

fn range(start: u16, end: u16) -> HandleRange {
    HandleRange::from_raw(start, end).unwrap()
}

fn rec(hdl: u16, props: CharProps, end: u16, uuid: u16) -> CharRecord {
    CharRecord {
        hdl: h(hdl),
        props,
        end: h(end),
        uuid: Uuid16::new(uuid).unwrap().as_uuid(),
    }
}

fn decl(hdl: u16, val_hdl: u16, props: CharProps, uuid: u16) -> CharDecl {
    CharDecl {
        hdl: h(hdl),
        props,
        val_hdl: h(val_hdl),
        uuid: Uuid16::new(uuid).unwrap().as_uuid(),
    }
}

fn paths(v: &[&str]) -> Vec<ObjectPath> {
    v.iter().map(|&p| ObjectPath::from(p)).collect()
}

fn update_failed<T>() -> std::result::Result<ipc::Result<T>, TryRecvError> {
    Ok(Err(ipc::Error::failed("Update characteristic value failed")))
}

#[test]
fn discover() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    assert_eq!(t.tr.connects(), 1);
    assert!(t.c.lease().unwrap().is_listening());
    assert!(t.c.services()[0].is_discovering());
    assert_eq!(t.tr.sent(), [Request::DiscoverChars(range(0x10, 0x30))]);

    let chars = vec![
        decl(0x11, 0x12, CharProps::READ | CharProps::NOTIFY, 0x2A37),
        decl(0x15, 0x16, CharProps::READ, 0x2A38),
        decl(0x20, 0x21, CharProps::READ | CharProps::WRITE, 0x2A39),
    ];
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Ok(Response::Chars(chars)));
    let ends: Vec<u16> = (t.c.services()[0].characteristics().iter())
        .map(|c| c.end().get())
        .collect();
    assert_eq!(ends, [0x15, 0x20, 0x30]);
    assert_eq!(
        t.tr.sent()[1..],
        [
            Request::FindInformation(range(0x13, 0x15)),
            Request::Read(h(0x12)),
            Request::FindInformation(range(0x17, 0x20)),
            Request::Read(h(0x16)),
            Request::FindInformation(range(0x22, 0x30)),
            Request::Read(h(0x21)),
        ]
    );
    let saved = (t.store.read_characteristics(local(), remote(), h(0x10))).unwrap();
    let recs = decode_chars(&saved);
    assert_eq!(recs.len(), 3);
    assert_eq!(recs[0], rec(0x12, CharProps::READ | CharProps::NOTIFY, 0x15, 0x2A37));
    assert_eq!(recs[2], rec(0x21, CharProps::READ | CharProps::WRITE, 0x30, 0x2A39));
    assert_eq!(t.ipc.objects(), paths(&[SVC, CHR12, CHR16, CHR21]));

    // Descriptors
    let ccc = Descriptor::ClientCharacteristicConfiguration;
    let info = InfoData::Uuid16(vec![
        (h(0x13), ccc.uuid16()),
        (h(0x14), Descriptor::CharacteristicUserDescription.uuid16()),
    ]);
    t.rsp(Request::FindInformation(range(0x13, 0x15)), Ok(Response::Info(info)));
    let info = InfoData::Uuid16(vec![
        (h(0x23), Descriptor::CharacteristicPresentationFormat.uuid16()),
        (h(0x24), Descriptor::CharacteristicAggregateFormat.uuid16()),
    ]);
    t.rsp(Request::FindInformation(range(0x22, 0x30)), Ok(Response::Info(info)));
    t.rsp(
        Request::FindInformation(range(0x17, 0x20)),
        Err(ErrorCode::AttributeNotFound),
    );
    assert_eq!(
        t.tr.sent()[7..],
        [
            Request::Read(h(0x13)),
            Request::Read(h(0x14)),
            Request::Read(h(0x23)),
        ]
    );

    // Values
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![72])));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    t.rsp(Request::Read(h(0x13)), Ok(Response::Value(vec![0x01, 0x00])));
    t.rsp(Request::Read(h(0x14)), Ok(Response::Value(b"Heart Rate".to_vec())));
    let fmt = [0x06, 0x00, 0xAD, 0x27, 0x01, 0x00, 0x00];
    t.rsp(Request::Read(h(0x23)), Ok(Response::Value(fmt.to_vec())));
    t.rsp(Request::Read(h(0x16)), Err(ErrorCode::ReadNotPermitted));
    t.rsp(Request::Read(h(0x21)), Ok(Response::Value(vec![2])));
    assert_eq!(rx.try_recv(), Ok(Ok(paths(&[CHR12, CHR16, CHR21]))));
    assert!(!t.c.services()[0].is_discovering());
    assert_eq!(t.c.pending(), 0);
    assert!(t.c.lease().is_none());
    assert_eq!(t.tr.closed(), 1);

    let c = t.chr(0x12);
    assert_eq!(c.value(), Some(&[72_u8][..]));
    assert_eq!(c.descriptors().ccc_hdl, Some(h(0x13)));
    assert_eq!(c.descriptors().ccc, Some(0x0001));
    assert_eq!(c.descriptors().user_desc.as_deref(), Some("Heart Rate"));
    assert_eq!(t.chr(0x16).value(), None);
    let f = t.chr(0x21).descriptors().format.unwrap();
    assert_eq!((f.typ(), f.unit, f.namespace), (Some(FmtType::U16), 0x27AD, 1));
    assert_eq!(
        t.store.attribute(local(), remote(), h(0x13)),
        Some(encode_attr(ccc.uuid(), &[0x01, 0x00]))
    );
    let (uuid, v) = decode_attr(&t.store.attribute(local(), remote(), h(0x14)).unwrap()).unwrap();
    assert_eq!(uuid, Descriptor::CharacteristicUserDescription.uuid());
    assert_eq!(v, b"Heart Rate");
    assert!(t.store.attribute(local(), remote(), h(0x24)).is_none());

    let mut rx = t.call(CHR12, Method::GetProperties);
    let Ok(Ok(Properties::Characteristic(info))) = rx.try_recv() else {
        panic!("no characteristic properties");
    };
    assert_eq!(info.uuid, Uuid16::new(0x2A37).unwrap().as_uuid());
    assert_eq!(info.description.as_deref(), Some("Heart Rate"));
    assert_eq!(info.client_configuration, 0x0001);
    assert_eq!(info.properties, 0x12);
    assert_eq!(info.value, Some(vec![72]));

    // Configuration write
    let mut rx = t.call(CHR12, |reply| Method::SetProperty {
        prop: Property::ClientConfiguration(0x0003),
        reply,
    });
    let req = Request::Write {
        hdl: h(0x13),
        val: vec![0x03, 0x00],
    };
    assert_eq!(t.tr.sent().last(), Some(&req));
    t.rsp(req, Ok(Response::Write));
    assert_eq!(rx.try_recv(), Ok(Ok(())));
    assert_eq!(t.chr(0x12).descriptors().ccc, Some(0x0003));
}

#[test]
fn discover_exclusive() {
    let mut t = Test::new(&[]);
    let mut rx1 = t.call(SVC, Method::DiscoverCharacteristics);
    let mut rx2 = t.call(SVC, Method::DiscoverCharacteristics);
    assert_eq!(
        rx2.try_recv(),
        Ok(Err(ipc::Error::failed("Discovery already in progress")))
    );
    assert_eq!(rx1.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(t.tr.sent().len(), 1);
}

#[test]
fn discover_empty() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    t.rsp(
        Request::DiscoverChars(range(0x10, 0x30)),
        Ok(Response::Chars(Vec::new())),
    );
    assert_eq!(rx.try_recv(), Ok(Ok(Vec::new())));
    assert!(!t.c.services()[0].is_discovering());
    assert_eq!(t.c.next_deadline(), None);
}

#[test]
fn discover_error() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let ec = ErrorCode::InsufficientAuthorization;
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Err(ec));
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::failed(ec))));
    assert!(t.tr.security().is_empty());
    assert!(!t.c.services()[0].is_discovering());

    t.tr.refuse_connect.store(true, Relaxed);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::failed("Connection refused"))));
    assert!(!t.c.services()[0].is_discovering());
}

#[test]
fn discover_known() {
    let recs = [rec(0x12, CharProps::READ, 0x30, 0x2A37)];
    let mut t = Test::new(&recs);
    assert_eq!(t.ipc.objects(), paths(&[SVC, CHR12]));
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let chars = vec![decl(0x11, 0x12, CharProps::READ, 0x2A37)];
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Ok(Response::Chars(chars)));
    assert_eq!(t.c.services()[0].characteristics().len(), 1);
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(rx.try_recv(), Ok(Ok(paths(&[CHR12]))));

    // Expiring leftover requests reports nothing further
    assert_eq!(t.c.pending(), 1);
    t.c.handle_timeout(Instant::now() + Duration::from_secs(31));
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.c.next_deadline(), None);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
}

#[test]
fn discover_descriptor_security() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let chars = vec![decl(0x11, 0x12, CharProps::READ | CharProps::NOTIFY, 0x2A37)];
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Ok(Response::Chars(chars)));
    let ccc = Descriptor::ClientCharacteristicConfiguration;
    let info = InfoData::Uuid16(vec![(h(0x13), ccc.uuid16())]);
    t.rsp(Request::FindInformation(range(0x13, 0x30)), Ok(Response::Info(info)));

    let req = Request::Read(h(0x13));
    t.rsp(req.clone(), Err(ErrorCode::InsufficientEncryption));
    assert_eq!(t.tr.security(), [SecLevel::High]);
    assert_eq!(t.tr.ids(&req).len(), 2);
    assert_eq!(t.chr(0x12).descriptors().ccc, None);

    t.rsp(req, Ok(Response::Value(vec![0x02, 0x00])));
    assert_eq!(t.chr(0x12).descriptors().ccc, Some(0x0002));
    assert_eq!(
        t.store.attribute(local(), remote(), h(0x13)),
        Some(encode_attr(ccc.uuid(), &[0x02, 0x00]))
    );
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(rx.try_recv(), Ok(Ok(paths(&[CHR12]))));
    assert_eq!(t.tr.connects(), 1);
}

#[test]
fn discover_silent_device() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let chars = vec![
        decl(0x11, 0x12, CharProps::READ, 0x2A37),
        decl(0x13, 0x14, CharProps::READ, 0x2A38),
    ];
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Ok(Response::Chars(chars)));

    // Step through deadlines the way the driver does
    let mut r = rx.try_recv();
    for _ in 0..8 {
        if r != Err(TryRecvError::Empty) {
            break;
        }
        let dl = t.c.next_deadline().unwrap();
        t.c.handle_timeout(dl);
        r = rx.try_recv();
    }
    assert_eq!(
        r,
        Ok(Err(ipc::Error::failed(
            "Discover characteristic values timed out"
        )))
    );
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.c.next_deadline(), None);
    assert!(!t.c.services()[0].is_discovering());
    assert_eq!(t.tr.closed(), 1);
}

#[test]
fn discover_timeout() {
    let cfg = Config {
        discovery_timeout: Duration::from_secs(5),
        ..Config::default()
    };
    let mut t = Test::with(cfg, &[], false);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let chars = vec![
        decl(0x11, 0x12, CharProps::READ, 0x2A37),
        decl(0x13, 0x14, CharProps::READ, 0x2A38),
    ];
    t.rsp(Request::DiscoverChars(range(0x10, 0x30)), Ok(Response::Chars(chars)));
    let dl = t.c.next_deadline().unwrap();
    assert!(dl <= Instant::now() + Duration::from_secs(5));

    // A value read restarts the timer
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert!(t.c.next_deadline().unwrap() >= dl);
    t.c.handle_timeout(Instant::now() + Duration::from_secs(1));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    t.c.handle_timeout(Instant::now() + Duration::from_secs(10));
    assert_eq!(
        rx.try_recv(),
        Ok(Err(ipc::Error::failed(
            "Discover characteristic values timed out"
        )))
    );
    assert_eq!(t.c.pending(), 3);

    // Late response still updates the cache
    t.rsp(Request::Read(h(0x14)), Ok(Response::Value(vec![2])));
    assert_eq!(t.chr(0x14).value(), Some(&[2_u8][..]));
    assert_eq!(t.c.pending(), 2);
}

#[test]
fn discover_request_timeout() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    assert!(t.c.next_deadline().is_some());
    t.c.handle_timeout(Instant::now() + Duration::from_secs(31));
    let e = att::Error::Timeout(Opcode::ReadByTypeReq);
    assert_eq!(rx.try_recv(), Ok(Err(e.into())));
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.tr.closed(), 1);
}

#[test]
fn discover_cancel() {
    let mut t = Test::new(&[]);
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    let mut r = t.call(SVC, Method::Disconnect);
    assert_eq!(r.try_recv(), Ok(Ok(())));
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::failed("Discovery cancelled"))));

    // Response to the cancelled discovery must not complete the new one
    let mut rx = t.call(SVC, Method::DiscoverCharacteristics);
    assert_eq!(t.tr.connects(), 1);
    let req = Request::DiscoverChars(range(0x10, 0x30));
    let ids = t.tr.ids(&req);
    assert_eq!(ids.len(), 2);
    let chars = vec![decl(0x11, 0x12, CharProps::READ, 0x2A37)];
    t.c.handle_rsp(ids[0], Ok(Response::Chars(chars.clone())));
    assert!(t.c.services()[0].characteristics().is_empty());
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    t.c.handle_rsp(ids[1], Ok(Response::Chars(chars)));
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(rx.try_recv(), Ok(Ok(paths(&[CHR12]))));
}

#[test]
fn security_retry() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ, 0x30, 0x2A37)]);
    let mut rx = t.call(CHR12, Method::UpdateValue);
    let keep = t.c.lease().unwrap();
    let req = Request::Read(h(0x12));
    t.rsp(req.clone(), Err(ErrorCode::InsufficientEncryption));
    assert_eq!(t.tr.security(), [SecLevel::High]);
    assert_eq!(keep.security(), SecLevel::High);
    assert_eq!(t.tr.ids(&req).len(), 2);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    // Retry limit
    t.rsp(req.clone(), Err(ErrorCode::InsufficientEncryption));
    assert_eq!(rx.try_recv(), update_failed());
    assert_eq!(t.tr.ids(&req).len(), 2);

    // Already at the highest level
    let mut rx = t.call(CHR12, Method::UpdateValue);
    t.rsp(req.clone(), Err(ErrorCode::InsufficientAuthentication));
    assert_eq!(rx.try_recv(), update_failed());
    assert_eq!(t.tr.security().len(), 1);
    assert_eq!(t.tr.ids(&req).len(), 3);
    assert_eq!(t.tr.connects(), 1);
}

#[test]
fn security_retry_write() {
    let mut t = Test::new(&[rec(0x12, CharProps::WRITE, 0x30, 0x2A37)]);
    let mut rx = t.call(CHR12, |reply| Method::SetProperty {
        prop: Property::Value(vec![5]),
        reply,
    });
    let req = Request::Write {
        hdl: h(0x12),
        val: vec![5],
    };
    t.rsp(req.clone(), Err(ErrorCode::InsufficientAuthentication));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    t.rsp(req, Ok(Response::Write));
    assert_eq!(rx.try_recv(), Ok(Ok(())));
    assert_eq!(t.chr(0x12).value(), Some(&[5_u8][..]));
}

#[test]
fn security_refused() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ, 0x30, 0x2A37)]);
    t.tr.refuse_security.store(true, Relaxed);
    let mut rx = t.call(CHR12, Method::UpdateValue);
    let req = Request::Read(h(0x12));
    t.rsp(req.clone(), Err(ErrorCode::InsufficientEncryption));
    assert_eq!(rx.try_recv(), update_failed());
    assert_eq!(t.tr.security(), [SecLevel::High]);
    assert_eq!(t.tr.ids(&req).len(), 1);
}

#[test]
fn security_no_retries() {
    let cfg = Config {
        security_retries: 0,
        ..Config::default()
    };
    let mut t = Test::with(cfg, &[rec(0x12, CharProps::READ, 0x30, 0x2A37)], false);
    let mut rx = t.call(CHR12, Method::UpdateValue);
    t.rsp(Request::Read(h(0x12)), Err(ErrorCode::InsufficientEncryption));
    assert_eq!(rx.try_recv(), update_failed());
    assert!(t.tr.security().is_empty());
}

#[test]
fn shared_bearer() {
    let recs = [
        rec(0x12, CharProps::READ, 0x15, 0x2A37),
        rec(0x16, CharProps::READ, 0x30, 0x2A38),
    ];
    let mut t = Test::new(&recs);
    assert!(t.c.lease().is_none());
    let mut rx1 = t.call(CHR12, Method::UpdateValue);
    let mut rx2 = t.call(CHR16, Method::UpdateValue);
    assert_eq!(t.tr.connects(), 1);
    assert_eq!(t.c.lease().unwrap().count(), 3);
    assert!(!t.c.lease().unwrap().is_listening());

    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(rx1.try_recv(), Ok(Ok(())));
    assert_eq!(t.tr.closed(), 0);
    t.rsp(Request::Read(h(0x16)), Ok(Response::Value(vec![2])));
    assert_eq!(rx2.try_recv(), Ok(Ok(())));
    assert!(t.c.lease().is_none());
    assert_eq!(t.tr.closed(), 1);

    // New request reconnects
    let _rx = t.call(CHR12, Method::UpdateValue);
    assert_eq!(t.tr.connects(), 2);
}

#[test]
fn registration_lease() {
    let recs = [rec(0x12, CharProps::READ, 0x30, 0x2A37)];
    let mut t = Test::with(Config::default(), &recs, true);
    assert_eq!(t.tr.connects(), 1);
    let mut rx = t.call(CHR12, Method::UpdateValue);
    assert_eq!(t.tr.connects(), 1);
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(rx.try_recv(), Ok(Ok(())));
    assert_eq!(t.c.lease().unwrap().count(), 2);

    let mut rx = t.call(SVC, Method::Disconnect);
    assert_eq!(rx.try_recv(), Ok(Ok(())));
    assert!(t.c.lease().is_none());
    assert_eq!(t.tr.closed(), 1);
}

#[test]
fn notifications() {
    let recs = [
        rec(0x12, CharProps::NOTIFY | CharProps::INDICATE, 0x15, 0x2A37),
        rec(0x16, CharProps::READ, 0x30, 0x2A38),
    ];
    let mut t = Test::new(&recs);
    t.c.handle_pdu(&[0x1B, 0x12, 0x00, 1]);
    assert!(t.ipc.events().is_empty());
    assert_eq!(t.chr(0x12).value(), None);

    assert_eq!(t.watch(":1.7", "/w1"), Ok(()));
    assert_eq!(t.watch(":1.9", "/w2"), Ok(()));
    assert_eq!(t.tr.connects(), 1);
    assert!(t.c.lease().unwrap().is_listening());

    t.c.handle_pdu(&[0x1B, 0x12, 0x00, 0xAA, 0xBB]);
    let ev = |name: &str, path: &str, chr: &str, v: &[u8]| {
        (name.to_owned(), ObjectPath::from(path), ObjectPath::from(chr), v.to_vec())
    };
    assert_eq!(
        t.ipc.events(),
        [
            ev(":1.7", "/w1", CHR12, &[0xAA, 0xBB]),
            ev(":1.9", "/w2", CHR12, &[0xAA, 0xBB]),
        ]
    );
    assert_eq!(t.chr(0x12).value(), Some(&[0xAA_u8, 0xBB][..]));

    // Unknown handle and malformed PDUs are dropped
    t.c.handle_pdu(&[0x1B, 0x99, 0x00, 1]);
    t.c.handle_pdu(&[0x1D, 0x99, 0x00, 1]);
    t.c.handle_pdu(&[0x1B, 0x12]);
    t.c.handle_pdu(&[0x0B, 0x12, 0x00, 1]);
    assert_eq!(t.ipc.events().len(), 2);
    assert_eq!(t.tr.confirms(), 0);

    t.c.handle_pdu(&[0x1D, 0x16, 0x00, 7]);
    assert_eq!(t.tr.confirms(), 1);
    assert_eq!(
        t.ipc.events()[2..],
        [
            ev(":1.7", "/w1", CHR16, &[7]),
            ev(":1.9", "/w2", CHR16, &[7]),
        ]
    );
    assert_eq!(t.chr(0x16).value(), Some(&[7_u8][..]));
}

#[test]
fn watchers() {
    let mut t = Test::new(&[rec(0x12, CharProps::NOTIFY, 0x30, 0x2A37)]);
    assert_eq!(t.watch(":1.7", "/w1"), Ok(()));
    assert_eq!(t.watch(":1.7", "/w1"), Err(ipc::Error::AlreadyExists));
    assert_eq!(t.watch(":1.7", "/w2"), Ok(()));
    assert_eq!(t.c.services()[0].watcher_count(), 2);
    assert_eq!(t.ipc.watches().len(), 2);

    assert_eq!(t.unwatch(":1.8", "/w1"), Err(ipc::Error::NotAuthorized));
    assert_eq!(t.unwatch(":1.7", "/w3"), Err(ipc::Error::NotAuthorized));
    assert_eq!(t.unwatch(":1.7", "/w1"), Ok(()));
    assert_eq!(t.c.services()[0].watcher_count(), 1);
    assert_eq!(t.ipc.watches().len(), 1);

    // Subscriber exit
    let id = t.ipc.watches()[0];
    assert!(t.c.handle_watch_exit(id));
    assert!(!t.c.handle_watch_exit(id));
    assert_eq!(t.c.services()[0].watcher_count(), 0);
    assert!(t.c.lease().is_none());
    assert_eq!(t.tr.closed(), 1);

    t.ipc.refuse_watch.store(true, Relaxed);
    assert_eq!(
        t.watch(":1.7", "/w1"),
        Err(ipc::Error::failed("Unable to watch subscriber"))
    );
    assert_eq!(t.c.services()[0].watcher_count(), 0);
}

#[test]
fn disconnect() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ | CharProps::NOTIFY, 0x30, 0x2A37)]);
    assert_eq!(t.watch(":1.7", "/w1"), Ok(()));
    let mut disc = t.call(SVC, Method::DiscoverCharacteristics);
    let mut upd = t.call(CHR12, Method::UpdateValue);
    assert_eq!(t.c.pending(), 2);

    t.c.handle_disconnect();
    assert_eq!(disc.try_recv(), Err(TryRecvError::Closed));
    assert_eq!(upd.try_recv(), update_failed());
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.c.services()[0].watcher_count(), 1);
    assert!(!t.c.services()[0].is_discovering());
    assert!(t.c.lease().is_none());
    assert_eq!(t.tr.closed(), 1);

    t.c.handle_disconnect();
    t.c.handle_pdu(&[0x1B, 0x12, 0x00, 1]);
    assert!(t.ipc.events().is_empty());

    // Reconnecting for a read does not resume notifications
    let mut upd = t.call(CHR12, Method::UpdateValue);
    assert_eq!(t.tr.connects(), 2);
    assert!(!t.c.lease().unwrap().is_listening());
    t.c.handle_pdu(&[0x1B, 0x12, 0x00, 1]);
    assert!(t.ipc.events().is_empty());
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![2])));
    assert_eq!(upd.try_recv(), Ok(Ok(())));

    let _rx = t.call(SVC, Method::DiscoverCharacteristics);
    assert_eq!(t.tr.connects(), 3);
    assert!(t.c.lease().unwrap().is_listening());
    t.c.handle_pdu(&[0x1B, 0x12, 0x00, 3]);
    assert_eq!(t.ipc.events().len(), 1);
}

#[test]
fn set_property() {
    let recs = [
        rec(0x12, CharProps::READ | CharProps::WRITE, 0x15, 0x2A37),
        rec(0x16, CharProps::WRITE, 0x30, 0x2A38),
    ];
    let mut t = Test::new(&recs);
    let write = |v: Vec<u8>| move |reply| Method::SetProperty {
        prop: Property::Value(v),
        reply,
    };
    let mut rx = t.call(CHR12, write(vec![1, 2]));
    let req = Request::Write {
        hdl: h(0x12),
        val: vec![1, 2],
    };
    t.rsp(req, Ok(Response::Write));
    assert_eq!(rx.try_recv(), Ok(Ok(())));
    assert_eq!(t.chr(0x12).value(), Some(&[1_u8, 2][..]));

    let mut rx = t.call(CHR12, write(vec![3]));
    let ec = ErrorCode::WriteNotPermitted;
    t.rsp(Request::Write { hdl: h(0x12), val: vec![3] }, Err(ec));
    assert_eq!(rx.try_recv(), Ok(Err(att::Error::Att(ec).into())));
    assert_eq!(t.chr(0x12).value(), Some(&[1_u8, 2][..]));

    // No configuration descriptor
    let n = t.tr.sent().len();
    let mut rx = t.call(CHR16, |reply| Method::SetProperty {
        prop: Property::ClientConfiguration(1),
        reply,
    });
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::NotSupported)));
    assert_eq!(t.tr.sent().len(), n);

    // One caller request at a time
    let mut rx1 = t.call(CHR16, Method::UpdateValue);
    let mut rx2 = t.call(CHR16, write(vec![4]));
    assert_eq!(rx2.try_recv(), Ok(Err(ipc::Error::InProgress)));
    assert_eq!(rx1.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn request_timeout() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ, 0x30, 0x2A37)]);
    let mut rx = t.call(CHR12, Method::UpdateValue);
    let dl = t.c.next_deadline().unwrap();
    t.c.handle_timeout(dl - Duration::from_secs(1));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    t.c.handle_timeout(dl);
    assert_eq!(rx.try_recv(), update_failed());
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.c.next_deadline(), None);

    // Late response is ignored
    t.rsp(Request::Read(h(0x12)), Ok(Response::Value(vec![1])));
    assert_eq!(t.chr(0x12).value(), None);

    let mut rx = t.call(CHR12, Method::UpdateValue);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn dispatch() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ, 0x30, 0x2A37)]);
    let mut rx = t.call(SVC, Method::UpdateValue);
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::NotSupported)));
    let mut rx = t.call(CHR12, Method::DiscoverCharacteristics);
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::NotSupported)));
    let mut rx = t.call("/dev/service0020", Method::GetProperties);
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::DoesNotExist)));
    let mut rx = t.call("/dev/service0010/characteristic0013", Method::UpdateValue);
    assert_eq!(rx.try_recv(), Ok(Err(ipc::Error::DoesNotExist)));

    let mut rx = t.call(SVC, Method::GetProperties);
    let Ok(Ok(Properties::Service(info))) = rx.try_recv() else {
        panic!("no service properties");
    };
    assert_eq!(info.uuid, Uuid16::new(0x180D).unwrap().as_uuid());
    assert_eq!(info.characteristics, paths(&[CHR12]));
    assert_eq!(t.tr.connects(), 0);
}

#[test]
fn close() {
    let mut t = Test::new(&[rec(0x12, CharProps::READ, 0x30, 0x2A37)]);
    assert_eq!(t.watch(":1.7", "/w1"), Ok(()));
    let mut rx = t.call(CHR12, Method::UpdateValue);
    t.c.close();
    assert!(t.ipc.objects().is_empty());
    assert!(t.ipc.watches().is_empty());
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    assert_eq!(t.c.pending(), 0);
    assert_eq!(t.tr.closed(), 1);
}

#[test]
fn registry() {
    let tr = Arc::new(MockTransport::default());
    let ipc = Arc::new(MockIpc::default());
    let env = Env {
        transport: tr,
        ipc: ipc.clone(),
        store: Arc::new(MemStore::new()),
        cfg: Config::default(),
    };
    let mut reg = Registry::new(env);
    let decl = ServiceDecl {
        range: range(0x10, 0x30),
        uuid: Uuid16::new(0x180F).unwrap().as_uuid(),
    };
    assert_eq!(reg.register(dev(), None, None, &[decl]), Ok(paths(&[SVC])));
    assert_eq!(
        reg.register(dev(), Some(0x1F), None, &[decl]),
        Err(ipc::Error::AlreadyExists)
    );
    assert!(reg.get(remote()).is_some());

    let (reply, mut rx) = Reply::new();
    reg.call(&ObjectPath::from(SVC), Method::DiscoverCharacteristics(reply));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert!(reg.next_deadline().is_some());
    let (reply, mut rx2) = Reply::new();
    reg.call(&ObjectPath::from("/other/service0010"), Method::GetProperties(reply));
    assert_eq!(rx2.try_recv(), Ok(Err(ipc::Error::DoesNotExist)));

    reg.handle_disconnect(remote());
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    assert!(reg.unregister(remote()));
    assert!(!reg.unregister(remote()));
    assert!(ipc.objects().is_empty());
}
