//! kuang — an autonomous Internet reconnaissance daemon.
//!
//! kuang continuously draws random IPv4 addresses, attempts reverse DNS
//! resolution on them, expands any DNS zones it stumbles across via AXFR,
//! and probes a curated set of TCP ports on every host it discovers,
//! recording everything in a local relational store.

pub mod blacklist;
pub mod cache;
pub mod center;
pub mod comms;
pub mod log;
pub mod manager;
pub mod nexus;
pub mod units;
pub mod util;
pub mod web;

pub use center::Center;
pub use nexus::Nexus;
