//! Generic Attribute Profile client ([Vol 3] Part G).
//!
//! A [`Client`] represents the primary services of one remote device. It
//! discovers their characteristics and descriptors, caches values, reads and
//! writes on behalf of IPC callers, and forwards notifications and indications
//! to registered watchers. All protocol exchanges go through a shared
//! [`Lease`](crate::att::Lease) on the device bearer, which is closed when
//! the last request or watcher that needs it goes away.
//!
//! The client itself performs no I/O and never blocks. Link responses, PDUs,
//! and timer expirations are fed in by the caller, either directly or via the
//! [`Driver`] task.

pub use {
    characteristic::*, client::*, config::*, consts::*, driver::*, registry::*, service::*,
    store::*, watcher::*,
};

use query::*;

mod characteristic;
mod client;
mod config;
mod consts;
mod discover;
mod driver;
mod event;
mod query;
mod registry;
mod service;
mod store;
mod watcher;

#[cfg(test)]
mod tests;
