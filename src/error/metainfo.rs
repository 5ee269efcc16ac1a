use std::path::PathBuf;

pub use serde_bencode::Error as BencodeError;

pub(crate) type Result<T> = std::result::Result<T, MetainfoError>;

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
  #[error("{0}")]
  Bencode(BencodeError),

  #[error("invalid path {0:?}")]
  /// The input path given to torrent creation does not exist.
  InvalidPath(PathBuf),

  #[error("invalid metainfo")]
  /// The descriptor decoded but failed validation.
  InvalidMetainfo,

  #[error("metainfo carries neither `length` nor `files`")]
  /// The info dictionary describes neither a single file nor a directory.
  UnsupportedLayout,

  #[error("invalid tracker url")]
  InvalidTrackerUrl,

  #[error("{0}")]
  Io(std::io::Error),
}

impl From<BencodeError> for MetainfoError {
  fn from(error: BencodeError) -> Self {
    Self::Bencode(error)
  }
}

impl From<url::ParseError> for MetainfoError {
  fn from(_: url::ParseError) -> Self {
    Self::InvalidTrackerUrl
  }
}

impl From<std::io::Error> for MetainfoError {
  fn from(error: std::io::Error) -> Self {
    Self::Io(error)
  }
}
