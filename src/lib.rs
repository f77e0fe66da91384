//! Blackrock Bluetooth LE GATT client engine.
//!
//! Drives the client side of the Generic Attribute Profile ([Vol 3] Part G)
//! for remote devices: characteristic and descriptor discovery, value reads
//! and writes, Client Characteristic Configuration tracking, and fan-out of
//! notifications/indications to registered watchers. Discovered metadata is
//! persisted through a [`gatt::Store`] so that re-discovery can be skipped on
//! reconnect.
//!
//! The engine is a single-threaded state machine. The attribute transport,
//! the IPC surface, and persistent storage are external collaborators reached
//! through the [`att::Transport`], [`ipc::Ipc`], and [`gatt::Store`] traits.
//! [`gatt::Driver`] runs the engine on a single tokio task.

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::empty_drop)]
#![warn(clippy::exit)]
#![warn(clippy::format_push_string)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::mod_module_files)]
#![warn(clippy::print_stdout)]
#![warn(clippy::str_to_string)]
#![warn(clippy::string_to_string)]
#![warn(clippy::todo)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod att;
pub mod gap;
pub mod gatt;
pub mod ipc;
pub mod le;
mod util;

pub(crate) use util::name_of;
