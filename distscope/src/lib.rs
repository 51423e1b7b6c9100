//! The distscope ranging log daemon.
//!
//! This library supports the distscope binary found elsewhere in this
//! project. It reads the text log of a channel-sounding ranging device, keeps
//! time-aligned rolling windows of the distance estimates it reports with
//! [`distscope_capture`], and hands snapshots of those windows to sinks.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod input;
pub mod server;
pub mod signals;
pub mod sink;
