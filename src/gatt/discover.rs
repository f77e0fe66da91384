//! Characteristic discovery ([Vol 3] Part G, Sections 4.6.1 and 4.7.1).
//!
//! Discovery of one service proceeds in three steps: a single characteristic
//! discovery request for the service range, a descriptor discovery and value
//! read for every characteristic issued all at once, and reads of the
//! descriptors that the client understands. The caller is answered when the
//! read flagged as last completes or when the discovery timer expires,
//! whichever happens first. A value read that times out is not a completion,
//! so a silent device is always reported by the discovery timer.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::att::{self, Handle, HandleRange, InfoData, Lease, Request, Response};
use crate::ipc::{self, Interface, ObjectPath, Reply};

use super::*;

impl Client {
    /// Starts characteristic discovery of the service at `start`.
    pub(super) fn discover(&mut self, start: Handle, reply: Reply<Vec<ObjectPath>>) {
        let Some(i) = self.svc_index(start) else {
            return reply.err(ipc::Error::DoesNotExist);
        };
        if self.svcs[i].disc.is_some() {
            return reply.err(ipc::Error::failed("Discovery already in progress"));
        }
        let lease = match self.conn.acquire(self.env.transport.as_ref(), true) {
            Ok(lease) => lease,
            Err(e) => return reply.err(e.into()),
        };
        let svc = &mut self.svcs[i];
        svc.disc_gen += 1;
        let gen = svc.disc_gen;
        svc.disc = Some(Discovery {
            gen,
            reply,
            deadline: None,
        });
        debug!("Discovering characteristics of {}", svc.path);
        let req = Request::DiscoverChars(svc.range);
        self.submit(lease, start, None, req, Op::DiscoverChars { gen });
    }

    /// Handles the characteristic discovery response.
    pub(super) fn on_chars(
        &mut self,
        start: Handle,
        gen: u64,
        lease: Lease,
        r: att::Result<Response>,
    ) {
        let Some(i) = self.svc_index(start) else { return };
        if !matches!(self.svcs[i].disc, Some(ref d) if d.gen == gen) {
            debug!("Ignoring characteristics of a stale discovery");
            return;
        }
        let decls = match r {
            Ok(Response::Chars(v)) => v,
            Ok(_) => return self.fail_discovery(i, &att::Error::UnexpectedRsp),
            Err(e) => return self.fail_discovery(i, &e),
        };

        // Each new characteristic ends at the declaration of the next one.
        // The last one ends at the end of the service.
        let svc = &mut self.svcs[i];
        let first_new = svc.chars.len();
        let mut prev: Option<usize> = None;
        for d in decls {
            if svc.chars.iter().any(|c| c.hdl == d.val_hdl) {
                continue;
            }
            if let Some(p) = prev {
                svc.chars[p].end = d.hdl;
            }
            let rec = CharRecord {
                hdl: d.val_hdl,
                props: d.props,
                end: d.val_hdl,
                uuid: d.uuid,
            };
            svc.chars.push(Characteristic::new(&svc.path, rec));
            prev = Some(svc.chars.len() - 1);
        }
        if let Some(p) = prev {
            svc.chars[p].end = svc.range.end();
        }
        debug!(
            "Found {} new characteristics in {}",
            svc.chars.len() - first_new,
            svc.path
        );

        let enc = encode_chars(svc.chars.iter().map(Characteristic::record));
        let (local, remote) = (self.conn.local(), self.conn.remote());
        if !(self.env.store).write_characteristics(local, remote, start, &enc) {
            warn!("Failed to save characteristics of {}", svc.path);
        }
        for c in &svc.chars[first_new..] {
            if !self.env.ipc.register_object(&c.path, Interface::Characteristic) {
                warn!("Failed to register {}", c.path);
            }
        }

        let targets: Vec<(Handle, Option<HandleRange>)> = (svc.chars.iter())
            .map(|c| {
                let r = (c.hdl.next()).and_then(|s| HandleRange::from_raw(s.get(), c.end.get()));
                (c.hdl, r)
            })
            .collect();
        if targets.is_empty() {
            if let Some(d) = svc.disc.take() {
                debug!("Discovery of {} complete", svc.path);
                d.reply.ok(Vec::new());
            }
            return;
        }
        let n = targets.len();
        for (k, (hdl, range)) in targets.into_iter().enumerate() {
            if let Some(range) = range {
                let req = Request::FindInformation(range);
                self.submit(lease.clone(), start, Some(hdl), req, Op::FindDescriptors);
            }
            let origin = Origin::Discovery {
                gen,
                last: k + 1 == n,
            };
            let op = Op::ReadValue(origin);
            self.submit(lease.clone(), start, Some(hdl), Request::Read(hdl), op);
        }
        self.arm_discovery(start, gen);
    }

    /// Handles a characteristic value read issued by discovery.
    pub(super) fn on_discovery_value(&mut self, start: Handle, gen: u64, last: bool) {
        let Some(i) = self.svc_index(start) else { return };
        let svc = &mut self.svcs[i];
        if !matches!(svc.disc, Some(ref d) if d.gen == gen) {
            return;
        }
        if !last {
            return self.arm_discovery(start, gen);
        }
        if let Some(d) = svc.disc.take() {
            debug!("Discovery of {} complete", svc.path);
            d.reply.ok(svc.char_paths());
        }
    }

    /// Handles the descriptor discovery response of one characteristic.
    pub(super) fn on_descriptors(
        &mut self,
        start: Handle,
        chr: Option<Handle>,
        lease: Lease,
        r: att::Result<Response>,
    ) {
        let list = match r {
            Ok(Response::Info(InfoData::Uuid16(v))) => v,
            Ok(Response::Info(InfoData::Uuid128(_))) => return,
            Ok(_) => return warn!("Unexpected descriptor discovery response"),
            Err(att::Error::Att(att::ErrorCode::AttributeNotFound)) => return,
            Err(e) => return debug!("Descriptor discovery failed: {e}"),
        };
        let Some(hdl) = chr else { return };
        let Some(c) = self.char_mut(start, hdl) else { return };
        let mut reads = Vec::new();
        for (dh, uuid) in list {
            let Ok(d) = Descriptor::try_from(uuid) else { continue };
            match d {
                Descriptor::ClientCharacteristicConfiguration => {
                    c.desc.ccc_hdl = Some(dh);
                }
                Descriptor::CharacteristicUserDescription
                | Descriptor::CharacteristicPresentationFormat => {}
                _ => continue,
            }
            reads.push((dh, d));
        }
        for (dh, d) in reads {
            self.submit(
                lease.clone(),
                start,
                chr,
                Request::Read(dh),
                Op::ReadDescriptor(d),
            );
        }
    }

    /// Handles a descriptor value read. The value is cached and persisted.
    pub(super) fn on_descriptor(
        &mut self,
        start: Handle,
        chr: Option<Handle>,
        req: &Request,
        d: Descriptor,
        r: att::Result<Response>,
    ) {
        let v = match r {
            Ok(Response::Value(v)) => v,
            Ok(_) => return warn!("Unexpected {d} read response"),
            Err(e) => return debug!("Failed to read {d}: {e}"),
        };
        let Request::Read(dh) = *req else { return };
        let Some(c) = chr.and_then(|hdl| self.char_mut(start, hdl)) else {
            return;
        };
        let stored = match d {
            Descriptor::ClientCharacteristicConfiguration => {
                let [lo, hi] = *v.as_slice() else {
                    return warn!("Invalid {d} length: {}", v.len());
                };
                c.desc.ccc = Some(u16::from_le_bytes([lo, hi]));
                v
            }
            Descriptor::CharacteristicUserDescription => {
                c.desc.user_desc = Some(String::from_utf8_lossy(&v).into_owned());
                v
            }
            Descriptor::CharacteristicPresentationFormat => {
                let Some(f) = Format::parse(&v) else {
                    return warn!("Invalid {d} length: {}", v.len());
                };
                c.desc.format = Some(f);
                f.to_bytes().to_vec()
            }
            _ => return,
        };
        let (local, remote) = (self.conn.local(), self.conn.remote());
        let enc = encode_attr(d.uuid(), &stored);
        if !self.env.store.write_attribute(local, remote, dh, &enc) {
            warn!("Failed to save {d} {dh}");
        }
    }

    /// Fails expired discoveries.
    pub(super) fn expire_discoveries(&mut self, now: Instant) {
        for svc in &mut self.svcs {
            if !matches!(svc.disc, Some(Discovery { deadline: Some(t), .. }) if t <= now) {
                continue;
            }
            if let Some(d) = svc.disc.take() {
                warn!("Discovery of {} timed out", svc.path);
                d.reply.err(ipc::Error::failed("Discover characteristic values timed out"));
            }
        }
    }

    /// Returns the earliest discovery deadline.
    pub(super) fn discovery_deadline(&self) -> Option<Instant> {
        (self.svcs.iter())
            .filter_map(|s| s.disc.as_ref().and_then(|d| d.deadline))
            .min()
    }

    /// Restarts the discovery timer.
    fn arm_discovery(&mut self, start: Handle, gen: u64) {
        let t = Instant::now() + self.env.cfg.discovery_timeout;
        let Some(i) = self.svc_index(start) else { return };
        if let Some(d) = self.svcs[i].disc.as_mut().filter(|d| d.gen == gen) {
            d.deadline = Some(t);
        }
    }

    fn fail_discovery(&mut self, i: usize, e: &att::Error) {
        let svc = &mut self.svcs[i];
        if let Some(d) = svc.disc.take() {
            debug!("Discovery of {} failed: {e}", svc.path);
            d.reply.err(ipc::Error::failed(e));
        }
    }
}
