use std::net::{IpAddr, SocketAddr};

use serde_derive::{Deserialize, Serialize};

/// One swarm member as the tracker reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
  pub ip: IpAddr,
  pub port: u16,
}

impl PeerEntry {
  pub fn addr(&self) -> SocketAddr {
    SocketAddr::new(self.ip, self.port)
  }
}

/// The tracker's answer to an announce.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceResponse {
  /// The number of seconds the client should wait before re-announcing.
  /// A hint, not a contract.
  pub interval: u64,

  /// The current swarm for the announced torrent.
  #[serde(default)]
  pub peers: Vec<PeerEntry>,
}

/// A catalog row as served by `GET /torrents`: the stored file's location is
/// redacted, only display metadata leaves the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub name: String,
  #[serde(default)]
  pub description: String,
}
