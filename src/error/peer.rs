use crate::error::torrent::TorrentError;

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

/// Errors that end a single peer connection.
///
/// These are fatal to the connection but never to the download or to the
/// seeding server: the owning task logs them and self-terminates.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
  #[error("connect attempt timed out")]
  /// The outbound TCP connect did not complete within the timeout.
  ConnectTimeout,

  #[error("connection closed by peer")]
  /// The remote side closed the stream mid-protocol.
  ConnectionClosed,

  #[error("invalid handshake")]
  /// The 68-byte handshake did not carry the exact protocol string.
  InvalidHandshake,

  #[error("peer's torrent info hash did not match ours")]
  /// The handshake named a torrent we are not serving or fetching.
  InvalidInfoHash,

  #[error("unexpected message from peer")]
  /// A well-formed frame arrived that the current state does not accept.
  UnexpectedMessage,

  #[error("{0}")]
  /// A piece failed validation or could not be placed on disk.
  Torrent(TorrentError),

  #[error("{0}")]
  /// An IO error occurred.
  Io(std::io::Error),
}

impl From<std::io::Error> for PeerError {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}

impl From<TorrentError> for PeerError {
  fn from(value: TorrentError) -> Self {
    Self::Torrent(value)
  }
}
