//! The tracker protocol: the peer-side HTTP client and the service itself.
//!
//! Both sides speak the same JSON dialect: the `info_hash` travels
//! hex-encoded in query strings and JSON keys, announces return
//! `{interval, peers}`, and the catalog maps hex hashes to display metadata.

pub mod announce;
pub mod client;
pub mod response;
pub mod server;

pub use announce::{Announce, Event};
pub use client::Tracker;
pub use response::{AnnounceResponse, CatalogEntry, PeerEntry};
