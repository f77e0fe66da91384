use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::att::{self, Handle, Lease, ReqId, Request, Response, RspResult};
use crate::ipc::Reply;

use super::{Client, Descriptor};

/// Outstanding request and the continuation to run on its response.
#[derive(Debug)]
pub(super) struct Query {
    /// Start handle of the owning service.
    pub svc: Handle,
    /// Value handle of the target characteristic.
    pub chr: Option<Handle>,
    /// Request, kept for reissuing after a security escalation.
    pub req: Request,
    pub op: Op,
    /// Security escalations performed so far.
    pub retries: u8,
    pub deadline: Instant,
    pub lease: Lease,
}

/// Continuation of a [`Query`].
#[derive(Debug)]
pub(super) enum Op {
    DiscoverChars { gen: u64 },
    FindDescriptors,
    ReadValue(Origin),
    ReadDescriptor(Descriptor),
    WriteValue(Reply<()>),
    WriteCcc(Reply<()>),
}

/// Initiator of a value read.
#[derive(Debug)]
pub(super) enum Origin {
    Discovery { gen: u64, last: bool },
    Caller(Reply<()>),
}

/// Outstanding queries keyed by request ID.
#[derive(Debug)]
pub(super) struct Pending {
    next: ReqId,
    map: HashMap<ReqId, Query>,
}

impl Pending {
    pub fn new() -> Self {
        Self {
            next: ReqId::first(),
            map: HashMap::new(),
        }
    }

    #[inline]
    pub fn next_id(&mut self) -> ReqId {
        self.next.advance()
    }

    #[inline]
    pub fn insert(&mut self, id: ReqId, q: Query) {
        self.map.insert(id, q);
    }

    #[inline]
    pub fn take(&mut self, id: ReqId) -> Option<Query> {
        self.map.remove(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Removes all queries whose deadline is at or before `now`.
    pub fn expired(&mut self, now: Instant) -> Vec<Query> {
        let mut ids: Vec<ReqId> = (self.map.iter())
            .filter_map(|(&id, q)| (q.deadline <= now).then_some(id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.map.remove(&id)).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.map.values().map(|q| q.deadline).min()
    }

    /// Removes all queries in issue order.
    pub fn drain(&mut self) -> Vec<Query> {
        let mut v: Vec<_> = self.map.drain().collect();
        v.sort_unstable_by_key(|&(id, _)| id);
        v.into_iter().map(|(_, q)| q).collect()
    }
}

impl Client {
    /// Issues a new request.
    pub(super) fn submit(
        &mut self,
        lease: Lease,
        svc: Handle,
        chr: Option<Handle>,
        req: Request,
        op: Op,
    ) {
        self.send(Query {
            svc,
            chr,
            req,
            op,
            retries: 0,
            deadline: Instant::now(),
            lease,
        });
    }

    /// Sends a query under a new request ID. A query that cannot be sent is
    /// completed immediately with the send error.
    fn send(&mut self, mut q: Query) {
        let id = self.pending.next_id();
        q.deadline = Instant::now() + self.env.cfg.request_timeout;
        match q.lease.send(id, &q.req) {
            Ok(()) => self.pending.insert(id, q),
            Err(e) => {
                warn!("Failed to send {:?}: {e}", q.req.opcode());
                self.complete(q, Err(e));
            }
        }
    }

    /// Handles a link response. Insufficient encryption or authentication
    /// errors raise link security and reissue the request, at most
    /// `security_retries` times.
    pub fn handle_rsp(&mut self, id: ReqId, rsp: RspResult) {
        let Some(q) = self.pending.take(id) else {
            warn!("Response for unknown request {id}");
            return;
        };
        match rsp {
            Err(ec) if ec.is_security() => {
                if q.retries < self.env.cfg.security_retries && q.lease.raise_security() {
                    debug!("Retrying {:?} after {ec}", q.req.opcode());
                    self.send(Query {
                        retries: q.retries + 1,
                        ..q
                    });
                } else {
                    self.complete(q, Err(att::Error::Att(ec)));
                }
            }
            rsp => self.complete(q, rsp.map_err(att::Error::Att)),
        }
    }

    /// Abandons queries whose response did not arrive in time.
    pub(super) fn expire_queries(&mut self, now: Instant) {
        for q in self.pending.expired(now) {
            let op = q.req.opcode();
            warn!("Request {op} timed out");
            self.complete(q, Err(att::Error::Timeout(op)));
        }
    }

    /// Fails all outstanding queries.
    pub(super) fn abort_queries(&mut self, e: &att::Error) {
        for q in self.pending.drain() {
            self.complete(q, Err(e.clone()));
        }
    }

    /// Runs the continuation of a query. Called exactly once per query.
    fn complete(&mut self, q: Query, r: att::Result<Response>) {
        let Query {
            svc,
            chr,
            req,
            op,
            lease,
            ..
        } = q;
        match op {
            Op::DiscoverChars { gen } => self.on_chars(svc, gen, lease, r),
            Op::FindDescriptors => self.on_descriptors(svc, chr, lease, r),
            Op::ReadValue(origin) => self.on_value(svc, chr, origin, r),
            Op::ReadDescriptor(d) => self.on_descriptor(svc, chr, &req, d, r),
            Op::WriteValue(reply) => self.on_write(svc, chr, req, false, reply, r),
            Op::WriteCcc(reply) => self.on_write(svc, chr, req, true, reply, r),
        }
    }
}
