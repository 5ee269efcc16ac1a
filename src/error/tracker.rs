use reqwest::Error as HttpError;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
  #[error("{0}")]
  Http(HttpError),

  #[error("tracker has no torrent {0}")]
  /// The tracker's catalog does not know the info hash.
  NotFound(String),

  #[error("{0}")]
  Io(std::io::Error),
}

impl From<HttpError> for TrackerError {
  fn from(value: HttpError) -> Self {
    Self::Http(value)
  }
}

impl From<std::io::Error> for TrackerError {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}
