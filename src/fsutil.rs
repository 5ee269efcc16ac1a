use std::path::{Path, PathBuf};

/// Returns `path` unchanged if nothing exists there, otherwise inserts `_1`,
/// `_2`, ... before the extension until a free name is found.
///
/// Both torrent creation and torrent fetching drop files into shared
/// directories, so colliding names must not overwrite existing content.
pub(crate) fn unique_path(path: &Path) -> PathBuf {
  if !path.exists() {
    return path.to_path_buf();
  }

  let stem = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

  let mut counter = 1;
  loop {
    let name = match &ext {
      Some(ext) => format!("{stem}_{counter}.{ext}"),
      None => format!("{stem}_{counter}"),
    };
    let candidate = path.with_file_name(name);
    if !candidate.exists() {
      return candidate;
    }
    counter += 1;
  }
}
