use std::net::IpAddr;

use crate::Sha1Hash;

/// Parameters for announcing to a tracker.
pub struct Announce {
  /// info_hash of the torrent the announce is about.
  pub info_hash: Sha1Hash,

  /// the port this peer's wire protocol listener is bound to.
  pub port: u16,

  /// An extra address to register alongside the one the tracker observes on
  /// the announce connection. Only useful when the peer sits behind a NAT
  /// and wants its LAN address advertised too.
  pub ip: Option<IpAddr>,

  /// Only set for the membership-changing announces defined in [`Event`].
  /// When absent the announce is a keep-alive swarm query and mutates
  /// nothing.
  pub event: Option<Event>,
}

/// The optional announce event.
pub enum Event {
  /// Registers the peer in the torrent's swarm. The first announce of a
  /// seeding or completed peer must carry this value.
  Started,
  /// Removes the peer from the swarm, sent on graceful shutdown.
  Stopped,
}

impl Event {
  pub fn as_str(&self) -> &'static str {
    match self {
      Event::Started => "started",
      Event::Stopped => "stopped",
    }
  }
}
