use crate::PieceIndex;

pub type Result<T, E = TorrentError> = std::result::Result<T, E>;

/// Errors raised by a download's piece bookkeeping and file placement.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
  #[error("piece {index} hash mismatch")]
  /// A received piece did not hash to the value recorded in the metainfo.
  /// Fatal to the connection that produced it, never to the download: the
  /// piece is returned to the empty state so another peer can serve it.
  HashMismatch { index: PieceIndex },

  #[error("invalid piece index {0}")]
  /// The piece index was outside the torrent's piece count.
  InvalidPieceIndex(PieceIndex),

  #[error("{0}")]
  Io(std::io::Error),
}

impl From<std::io::Error> for TorrentError {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}
