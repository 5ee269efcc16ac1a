use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use url::Url;

use crate::error::metainfo::MetainfoError;
use crate::fsutil;
use crate::storage_info::FileInfo;
use crate::Sha1Hash;

pub(crate) type Result<T> = std::result::Result<T, MetainfoError>;

/// The meta info from a torrent file.
#[derive(Clone)]
pub struct Metainfo {
  /// torrent name, the form for the download path.
  pub name: String,
  /// 20 bytes of SHA-1 over the re-encoded `info` dictionary.
  /// The content-addressed identity of the torrent.
  pub info_hash: Sha1Hash,
  /// contains a concatenation of each piece's SHA-1,
  /// length is a multiple of 20 bytes,
  /// formed ordered by the files in the files dictionary.
  pub pieces: Vec<u8>,
  /// the length of the pieces
  pub piece_len: u32,
  /// The torrent's files. For a single-file torrent this holds one entry
  /// whose path is just the torrent name; for an archive the paths are
  /// relative to the directory named by `name`.
  pub files: Vec<FileInfo>,
  /// Whether the descriptor used the `files` layout (directory download)
  /// rather than the single `length` layout.
  pub archive: bool,
  /// The trackers that we can announce to.
  pub trackers: Vec<Url>,
  /// Seconds since epoch at creation time, if recorded.
  pub creation_date: Option<i64>,
}

impl fmt::Debug for Metainfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Metainfo")
      .field("name", &self.name)
      .field("info_hash", &hex::encode(self.info_hash))
      .field("pieces", &"<pieces...>")
      .field("piece_len", &self.piece_len)
      .field("structure", &self.files)
      .finish()
  }
}

impl Metainfo {
  /// Parse a byte buffer into a [`Metainfo`] instance
  /// or return an error about the invalid format or syntax.
  ///
  /// Here are the rules:
  /// - the bencode format and syntax must be correct.
  /// - the length of pieces in info must be a multiple of 20.
  /// - it cannot contain both `length` (single file) and `files` (multi
  ///   files), and must contain one of them.
  /// - if having multi files, `files` must not be empty and each path must
  ///   be relative and non-empty.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    // parse the file and then do verification
    let metainfo: raw::Metainfo = serde_bencode::from_bytes(bytes)?;

    // the pieces field is a concatenation of 20 byte SHA-1 hashes, so it
    // must be a multiple of 20
    if metainfo.info.pieces.len() % 20 != 0 {
      return Err(MetainfoError::InvalidMetainfo);
    }

    // verify download structure and build up files metadata
    let mut files = Vec::new();
    let archive = metainfo.info.files.is_some();
    if let Some(len) = metainfo.info.len {
      if archive {
        log::warn!("Metainfo cannot contain both `length` and `files`");
        return Err(MetainfoError::InvalidMetainfo);
      }

      // the path of this file is just the torrent name
      files.push(FileInfo {
        path: metainfo.info.name.clone().into(),
        len,
        torrent_offset: 0,
      });
    } else if let Some(raw_files) = &metainfo.info.files {
      if raw_files.is_empty() {
        log::warn!("Metainfo files must not be empty");
        return Err(MetainfoError::InvalidMetainfo);
      }

      files.reserve_exact(raw_files.len());

      // the offset of the file within the logical concatenation
      let mut torrent_offset = 0;
      for file in raw_files.iter() {
        // verify that the path is not empty
        let path: PathBuf = file.path.iter().collect();
        if path.as_os_str().is_empty() {
          log::warn!("Path in metainfo is empty");
          return Err(MetainfoError::InvalidMetainfo);
        }

        // verify that the path is not absolute
        if path.is_absolute() {
          log::warn!("Path {:?} is absolute", path);
          return Err(MetainfoError::InvalidMetainfo);
        }

        // file is now verified, we can collect it
        files.push(FileInfo {
          path,
          torrent_offset,
          len: file.len,
        });

        // advance offset for next file
        torrent_offset += file.len;
      }
    } else {
      log::warn!("No `length` or `files` key present in metainfo");
      return Err(MetainfoError::UnsupportedLayout);
    }

    let mut trackers = Vec::new();
    if !metainfo.announce_list.is_empty() {
      for announce in metainfo.announce_list.iter() {
        for tracker in announce.iter() {
          let url = Url::parse(tracker)?;
          if url.scheme() == "http" || url.scheme() == "https" {
            trackers.push(url);
          }
        }
      }
    } else if let Some(tracker) = &metainfo.announce {
      let url = Url::parse(tracker)?;
      if url.scheme() == "http" || url.scheme() == "https" {
        trackers.push(url);
      }
    }

    if trackers.is_empty() {
      log::warn!("No HTTP trackers in metainfo");
    }

    // create the info hash
    let info_hash = metainfo.info_hash()?;

    Ok(Metainfo {
      name: metainfo.info.name,
      info_hash,
      pieces: metainfo.info.pieces,
      piece_len: metainfo.info.piece_len,
      files,
      archive,
      trackers,
      creation_date: metainfo.creation_date,
    })
  }

  /// Reads and parses the torrent file at `path`.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let bytes = fs::read(path)?;
    Self::from_bytes(&bytes)
  }

  /// Returns true if the download is a directory rather than a single file.
  pub fn is_archive(&self) -> bool {
    self.archive
  }

  /// The number of pieces in the torrent.
  pub fn piece_count(&self) -> usize {
    self.pieces.len() / 20
  }

  /// The length of the logical concatenation of the torrent's files.
  pub fn total_len(&self) -> u64 {
    self.files.iter().map(|f| f.len).sum()
  }

  /// The expected SHA-1 of the piece at `index`.
  ///
  /// # Panics
  ///
  /// Panics if the index is out of bounds.
  pub fn piece_hash(&self, index: usize) -> &[u8] {
    &self.pieces[index * 20..index * 20 + 20]
  }

  /// Builds the bencoded descriptor bytes for the file or directory at
  /// `input_path`.
  ///
  /// The pieces are SHA-1 hashes over `piece_len` sized chunks of the input.
  /// A directory is hashed as the concatenation of its files in a
  /// deterministic depth-first traversal with byte-sorted directory entries,
  /// so a piece may straddle file boundaries. `creation_date` is injectable
  /// so that re-running creation on the same inputs produces identical
  /// bytes.
  pub fn build(
    input_path: &Path,
    trackers: &[Vec<String>],
    piece_len: u32,
    creation_date: i64,
  ) -> Result<Vec<u8>> {
    if !input_path.exists() {
      return Err(MetainfoError::InvalidPath(input_path.to_path_buf()));
    }

    let name = input_path
      .file_name()
      .ok_or_else(|| MetainfoError::InvalidPath(input_path.to_path_buf()))?
      .to_string_lossy()
      .into_owned();

    let mut info = raw::Info {
      name,
      pieces: Vec::new(),
      piece_len,
      len: None,
      files: None,
      private: None,
    };

    if input_path.is_file() {
      info.len = Some(fs::metadata(input_path)?.len());
      info.pieces = hash_file_pieces(input_path, piece_len)?;
    } else {
      let (pieces, files) = hash_dir_pieces(input_path, piece_len)?;
      info.pieces = pieces;
      info.files = Some(
        files
          .into_iter()
          .map(|(path, len)| raw::File {
            path: path
              .components()
              .map(|c| c.as_os_str().to_string_lossy().into_owned())
              .collect(),
            len,
          })
          .collect(),
      );
    }

    let metainfo = raw::Metainfo {
      info,
      announce: trackers
        .first()
        .and_then(|group| group.first())
        .cloned(),
      announce_list: trackers.to_vec(),
      creation_date: Some(creation_date),
    };

    Ok(serde_bencode::to_bytes(&metainfo)?)
  }

  /// Creates a `.torrent` file for `input_path` and returns its path.
  ///
  /// The descriptor lands at `output_path` when given, otherwise next to the
  /// input as `<input>.torrent`; an existing file at the target is never
  /// overwritten, a numbered sibling is chosen instead.
  pub fn create_file(
    input_path: &Path,
    trackers: &[Vec<String>],
    piece_len: u32,
    output_path: Option<&Path>,
  ) -> Result<PathBuf> {
    let creation_date = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs() as i64)
      .unwrap_or(0);
    let bytes = Self::build(input_path, trackers, piece_len, creation_date)?;

    let output_path = match output_path {
      Some(path) => path.to_path_buf(),
      None => {
        let mut name = input_path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_default();
        name.push_str(".torrent");
        input_path.with_file_name(name)
      }
    };
    let output_path = fsutil::unique_path(&output_path);

    fs::write(&output_path, bytes)?;
    log::info!("Torrent file created: {:?}", output_path);
    Ok(output_path)
  }
}

/// Reads from `file` until `buf` is full or the file is exhausted and
/// returns the number of bytes read.
fn read_full(file: &mut fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    let n = file.read(&mut buf[filled..])?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  Ok(filled)
}

/// Streams a regular file in `piece_len` sized chunks, emitting the SHA-1 of
/// each. The final chunk is the remainder and may be short.
fn hash_file_pieces(path: &Path, piece_len: u32) -> Result<Vec<u8>> {
  let mut file = fs::File::open(path)?;
  let mut pieces = Vec::new();
  let mut chunk = vec![0u8; piece_len as usize];

  loop {
    let n = read_full(&mut file, &mut chunk)?;
    if n == 0 {
      break;
    }
    pieces.extend_from_slice(&Sha1::digest(&chunk[..n]));
    if n < chunk.len() {
      break;
    }
  }

  Ok(pieces)
}

/// Enumerates the regular files under `root` depth-first, recursing into
/// directories in byte-sorted order. Returned paths are relative to `root`.
fn walk_files(root: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
  fn visit(
    dir: &Path,
    rel: &Path,
    out: &mut Vec<(PathBuf, u64)>,
  ) -> std::io::Result<()> {
    let mut entries: Vec<_> =
      fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
      let path = entry.path();
      let rel = rel.join(entry.file_name());
      if path.is_dir() {
        visit(&path, &rel, out)?;
      } else {
        out.push((rel, entry.metadata()?.len()));
      }
    }
    Ok(())
  }

  let mut files = Vec::new();
  visit(root, Path::new(""), &mut files)?;
  Ok(files)
}

/// Hashes a directory tree as one logical byte stream.
///
/// Files are concatenated in traversal order and the stream is partitioned
/// into `piece_len` sized chunks; the carry buffer holds the tail of one
/// file so the next file's bytes complete the straddling piece.
fn hash_dir_pieces(
  root: &Path,
  piece_len: u32,
) -> Result<(Vec<u8>, Vec<(PathBuf, u64)>)> {
  let files = walk_files(root)?;
  let piece_len = piece_len as usize;

  let mut pieces = Vec::new();
  let mut carry = Vec::with_capacity(piece_len);

  for (rel, _) in &files {
    let mut file = fs::File::open(root.join(rel))?;
    loop {
      let want = piece_len - carry.len();
      let mut buf = vec![0u8; want];
      let n = read_full(&mut file, &mut buf)?;
      carry.extend_from_slice(&buf[..n]);

      if carry.len() == piece_len {
        pieces.extend_from_slice(&Sha1::digest(&carry));
        carry.clear();
      }
      if n < want {
        break;
      }
    }
  }

  if !carry.is_empty() {
    pieces.extend_from_slice(&Sha1::digest(&carry));
  }

  Ok((pieces, files))
}

mod raw {
  //! The serde mirror of the bencoded form. Only used to move between the
  //! wire bytes and the validated [`Metainfo`](super::Metainfo) record.
  use serde_derive::{Deserialize, Serialize};
  use sha1::Digest;

  use super::Result;
  use crate::Sha1Hash;

  /// Field meanings are per the
  /// [.torrent file](https://en.wikipedia.org/wiki/Torrent_file) format.
  #[derive(Debug, Serialize, Deserialize)]
  pub(super) struct Metainfo {
    /// maps to a dictionary whose keys are dependent on whether one or more
    /// files are being shared
    pub info: Info,
    /// the URL of the primary tracker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announce: Option<String>,
    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub announce_list: Vec<Vec<String>>,
    #[serde(default)]
    #[serde(rename = "creation date")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
  }

  impl Metainfo {
    /// Re-encodes the `info` sub-dictionary and hashes the result.
    ///
    /// The bencode encoder emits dictionary keys byte-sorted, which is the
    /// canonical form, so the digest is identical across writers. The hash
    /// is never taken over a substring of the original buffer.
    pub fn info_hash(&self) -> Result<Sha1Hash> {
      let info = serde_bencode::to_bytes(&self.info)?;
      let digest = sha1::Sha1::digest(&info);
      let mut info_hash = [0; 20];
      info_hash.copy_from_slice(&digest);
      Ok(info_hash)
    }
  }

  #[derive(Debug, Serialize, Deserialize)]
  pub(super) struct Info {
    /// suggested filename where the file is to be saved (if one file) /
    /// suggested directory name where the files are to be saved (if
    /// multiple files)
    pub name: String,
    /// a hash list: the concatenation of each piece's SHA-1 hash. As SHA-1
    /// returns a 160-bit hash, pieces will be a string whose length is a
    /// multiple of 20 bytes.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,
    /// number of bytes per piece
    #[serde(rename = "piece length")]
    pub piece_len: u32,
    /// size of the file in bytes (only when one file is being shared)
    #[serde(default)]
    #[serde(rename = "length")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
    /// a list of dictionaries each corresponding to a file (only when
    /// multiple files are being shared)
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<File>>,
    /// not used, but kept so that re-encoding a descriptor that carries it
    /// still produces the original info hash.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<u8>,
  }

  #[derive(Debug, Serialize, Deserialize)]
  pub(super) struct File {
    /// a list of strings corresponding to subdirectory names, the last of
    /// which is the actual file name
    pub path: Vec<String>,
    /// size of the file in bytes
    #[serde(rename = "length")]
    pub len: u64,
  }
}
