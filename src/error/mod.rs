//! Set of module Error
pub mod metainfo;
pub mod peer;
pub mod torrent;
pub mod tracker;

pub use metainfo::MetainfoError;
pub use peer::{PeerError, Result as PeerResult};
pub use torrent::{Result as TorrentResult, TorrentError};
pub use tracker::{Result as TrackerResult, TrackerError};

pub type EngineResult<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by the engine's public operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  #[error("metainfo has no usable tracker url")]
  /// The metainfo carried no HTTP tracker to announce to.
  NoTracker,

  #[error("{0}")]
  /// An error in the metainfo codec.
  Metainfo(MetainfoError),

  #[error("{0}")]
  /// An error while talking to the tracker.
  Tracker(TrackerError),

  #[error("{0}")]
  /// An error in a download's piece bookkeeping or file placement.
  Torrent(TorrentError),

  #[error("{0}")]
  /// Holds global IO related errors.
  Io(std::io::Error),
}

impl From<MetainfoError> for Error {
  fn from(value: MetainfoError) -> Self {
    Self::Metainfo(value)
  }
}

impl From<TrackerError> for Error {
  fn from(value: TrackerError) -> Self {
    Self::Tracker(value)
  }
}

impl From<TorrentError> for Error {
  fn from(value: TorrentError) -> Self {
    Self::Torrent(value)
  }
}

impl From<std::io::Error> for Error {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}
