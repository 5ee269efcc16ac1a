//! This module defines types used to configure the peer engine and the
//! tracker service. Everything is programmatic with reasonable defaults; the
//! binaries map command line flags onto these structs.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Configuration for a peer process: one engine serving every seeded torrent
/// and downloading every leeched one.
#[derive(Debug, Clone)]
pub struct Conf {
  /// The tracker used when a seed request does not name its own trackers,
  /// and for catalog queries.
  pub tracker_url: Url,

  /// Where fetched `.torrent` files are placed.
  pub torrent_dir: PathBuf,

  /// The directory in which a torrent's files are placed upon download.
  pub download_dir: PathBuf,

  /// The port the wire protocol listener binds to. Zero lets the OS assign
  /// one.
  pub listen_port: u16,

  /// How long a leecher waits between tracker announces while a download
  /// is running.
  pub announce_interval: Duration,

  /// How long an outbound peer connect may take before the peer is given
  /// up on.
  pub connect_timeout: Duration,
}

impl Conf {
  /// Returns a peer configuration with defaults for everything but the
  /// directories, as guessing those for the user is not sensible.
  pub fn new(
    tracker_url: Url,
    torrent_dir: impl Into<PathBuf>,
    download_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      tracker_url,
      torrent_dir: torrent_dir.into(),
      download_dir: download_dir.into(),
      listen_port: 0,
      announce_interval: Duration::from_secs(30),
      connect_timeout: Duration::from_secs(5),
    }
  }
}

/// Configuration for the tracker service's persisted state.
#[derive(Debug, Clone)]
pub struct TrackerConf {
  /// Where uploaded torrent files are stored under opaque names.
  pub torrent_dir: PathBuf,

  /// The swarm membership snapshot, rewritten on every mutation.
  pub peers_file: PathBuf,

  /// The catalog snapshot, rewritten on every mutation and recovered on
  /// startup.
  pub torrents_file: PathBuf,
}

impl TrackerConf {
  /// Lays the tracker's files out under a single data directory.
  pub fn new(data_dir: impl Into<PathBuf>) -> Self {
    let data_dir = data_dir.into();
    Self {
      torrent_dir: data_dir.join("torrents"),
      peers_file: data_dir.join("peers.json"),
      torrents_file: data_dir.join("torrents.json"),
    }
  }
}
