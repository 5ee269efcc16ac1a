use std::ops::Range;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::error::torrent::{Result, TorrentError};
use crate::metainfo::Metainfo;
use crate::{PieceIndex, Sha1Hash};

/// A window into a single file on disk, at `offset` within that file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSlice {
  pub offset: u64,
  pub len: u64,
}

/// One file of a torrent and its place in the logical concatenation.
#[derive(Debug, Clone)]
pub struct FileInfo {
  pub path: PathBuf,
  pub len: u64,
  pub torrent_offset: u64,
}

impl FileInfo {
  /// Returns the part of this file overlapped by the window starting at
  /// `torrent_offset`, at most `max_len` bytes long.
  ///
  /// # Panics
  ///
  /// Panics if the window starts before this file.
  pub fn get_slice(&self, torrent_offset: u64, max_len: u64) -> FileSlice {
    assert!(torrent_offset >= self.torrent_offset);
    let offset = torrent_offset - self.torrent_offset;
    FileSlice {
      offset,
      len: max_len.min(self.len - offset),
    }
  }
}

/// The resolved on-disk geometry of one torrent.
///
/// Built once from a [`Metainfo`] and a root path, then shared by everything
/// that touches the torrent's bytes: the seeding side reads pieces out of the
/// source tree, the leeching side writes pieces into the download target.
#[derive(Debug, Clone)]
pub struct StorageInfo {
  /// The content-addressed identity of the torrent this storage belongs to.
  pub info_hash: Sha1Hash,
  /// The number of pieces in the torrent.
  pub piece_count: usize,
  /// The nominal length of a piece.
  pub piece_len: u32,
  /// The length of the last piece, which may be shorter than the rest when
  /// the torrent's total length is not a piece length multiple.
  pub last_piece_len: u32,
  /// The sum of the lengths of all files in the torrent.
  pub total_len: u64,
  /// Files with their absolute target paths, in torrent order.
  pub files: Vec<FileInfo>,
}

impl StorageInfo {
  /// Resolves a metainfo against `root`.
  ///
  /// For a single-file torrent, `root` is the file itself; for an archive it
  /// is the directory under which the torrent's relative paths live. Both the
  /// seeded source tree and the leeched download target use the same shape.
  pub fn new(metainfo: &Metainfo, root: PathBuf) -> Self {
    let total_len = metainfo.total_len();
    let piece_count = metainfo.piece_count();
    let piece_len = metainfo.piece_len;
    let last_piece_len = if piece_count == 0 {
      0
    } else if total_len % piece_len as u64 == 0 {
      piece_len
    } else {
      (total_len % piece_len as u64) as u32
    };

    let files = if metainfo.is_archive() {
      metainfo
        .files
        .iter()
        .map(|f| FileInfo {
          path: root.join(&f.path),
          len: f.len,
          torrent_offset: f.torrent_offset,
        })
        .collect()
    } else {
      // the root itself is the single target file
      vec![FileInfo {
        path: root,
        len: total_len,
        torrent_offset: 0,
      }]
    };

    Self {
      info_hash: metainfo.info_hash,
      piece_count,
      piece_len,
      last_piece_len,
      total_len,
      files,
    }
  }

  /// The length of the piece at `index`.
  pub fn piece_len(&self, index: PieceIndex) -> u32 {
    if index + 1 == self.piece_count {
      self.last_piece_len
    } else {
      self.piece_len
    }
  }

  /// The absolute offset of the piece's first byte in the torrent.
  pub fn torrent_piece_offset(&self, index: PieceIndex) -> u64 {
    index as u64 * self.piece_len as u64
  }

  /// Returns the range of indices into `files` whose byte ranges intersect
  /// the window `[offset, offset + len)` of the logical concatenation.
  pub fn files_intersecting(&self, offset: u64, len: u64) -> Range<usize> {
    let end = offset + len;
    let first = self
      .files
      .iter()
      .position(|f| f.torrent_offset + f.len > offset)
      .unwrap_or(self.files.len());
    let mut last = first;
    while last < self.files.len() && self.files[last].torrent_offset < end {
      last += 1;
    }
    first..last
  }

  /// Creates every target file, along with its parent directories, and
  /// preallocates it to its declared length.
  ///
  /// Called once per download before any piece arrives; the per-piece writes
  /// then land inside the preallocated ranges.
  pub fn allocate(&self) -> std::io::Result<()> {
    for file in &self.files {
      if let Some(parent) = file.path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      let handle = std::fs::File::create(&file.path)?;
      handle.set_len(file.len)?;
    }
    Ok(())
  }

  /// Reads `len` bytes starting at `offset` within the piece at `index`,
  /// concatenating across file boundaries where the window spans them.
  ///
  /// Each file handle is opened, read and dropped before the next file is
  /// touched.
  pub async fn read_block(
    &self,
    index: PieceIndex,
    offset: u32,
    len: u32,
  ) -> Result<Vec<u8>> {
    self.check_block(index, offset, len)?;
    let mut torrent_offset =
      self.torrent_piece_offset(index) + offset as u64;
    let mut remaining = len as u64;
    let mut block = Vec::with_capacity(len as usize);

    for file in &self.files[self.files_intersecting(torrent_offset, remaining)]
    {
      let slice = file.get_slice(torrent_offset, remaining);
      let mut handle = tokio::fs::File::open(&file.path).await?;
      handle.seek(SeekFrom::Start(slice.offset)).await?;

      let mut buf = vec![0u8; slice.len as usize];
      handle.read_exact(&mut buf).await?;
      block.extend_from_slice(&buf);

      torrent_offset += slice.len;
      remaining -= slice.len;
    }

    debug_assert_eq!(block.len(), len as usize);
    Ok(block)
  }

  /// Writes `data` at `offset` within the piece at `index`, splitting the
  /// write across file boundaries where the window spans them.
  pub async fn write_block(
    &self,
    index: PieceIndex,
    offset: u32,
    data: &[u8],
  ) -> Result<()> {
    self.check_block(index, offset, data.len() as u32)?;
    let mut torrent_offset =
      self.torrent_piece_offset(index) + offset as u64;
    let range = self.files_intersecting(torrent_offset, data.len() as u64);
    let mut written = 0usize;

    for file in &self.files[range] {
      let slice =
        file.get_slice(torrent_offset, (data.len() - written) as u64);
      let mut handle =
        OpenOptions::new().write(true).open(&file.path).await?;
      handle.seek(SeekFrom::Start(slice.offset)).await?;
      handle
        .write_all(&data[written..written + slice.len as usize])
        .await?;
      handle.sync_all().await?;

      torrent_offset += slice.len;
      written += slice.len as usize;
    }

    debug_assert_eq!(written, data.len());
    Ok(())
  }

  /// Rejects windows that fall outside the piece at `index`.
  fn check_block(
    &self,
    index: PieceIndex,
    offset: u32,
    len: u32,
  ) -> Result<()> {
    if index >= self.piece_count {
      return Err(TorrentError::InvalidPieceIndex(index));
    }
    if offset as u64 + len as u64 > self.piece_len(index) as u64 {
      return Err(TorrentError::InvalidPieceIndex(index));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::metainfo::Metainfo;

  fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
  }

  fn tracker_groups() -> Vec<Vec<String>> {
    vec![vec!["http://127.0.0.1:8000".to_string()]]
  }

  /// Builds a two-file archive whose first piece straddles the file
  /// boundary: 10 000 + 10 000 bytes with a 16 384 byte piece length.
  fn straddling_archive() -> (tempfile::TempDir, Metainfo, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tree");
    std::fs::create_dir_all(&input).unwrap();
    let a = patterned(10_000);
    let b: Vec<u8> = patterned(10_000).into_iter().rev().collect();
    std::fs::write(input.join("a.bin"), &a).unwrap();
    std::fs::write(input.join("b.bin"), &b).unwrap();

    let bytes =
      Metainfo::build(&input, &tracker_groups(), 16_384, 0).unwrap();
    let metainfo = Metainfo::from_bytes(&bytes).unwrap();

    let mut logical = a;
    logical.extend_from_slice(&b);
    (dir, metainfo, logical)
  }

  #[test]
  fn test_piece_geometry() {
    let (dir, metainfo, _) = straddling_archive();
    let storage =
      StorageInfo::new(&metainfo, dir.path().join("tree"));

    assert_eq!(storage.piece_count, 2);
    assert_eq!(storage.total_len, 20_000);
    assert_eq!(storage.piece_len(0), 16_384);
    assert_eq!(storage.piece_len(1), 3_616);
    assert_eq!(storage.torrent_piece_offset(1), 16_384);
  }

  #[test]
  fn test_last_piece_len_of_exact_multiple() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("exact.bin");
    std::fs::write(&input, patterned(2 * 16_384)).unwrap();
    let bytes =
      Metainfo::build(&input, &tracker_groups(), 16_384, 0).unwrap();
    let metainfo = Metainfo::from_bytes(&bytes).unwrap();

    let storage = StorageInfo::new(&metainfo, input);
    assert_eq!(storage.piece_len(1), 16_384);
  }

  #[test]
  fn test_files_intersecting_straddling_piece() {
    let (dir, metainfo, _) = straddling_archive();
    let storage =
      StorageInfo::new(&metainfo, dir.path().join("tree"));

    // piece 0 spans both files, piece 1 only the second
    assert_eq!(storage.files_intersecting(0, 16_384), 0..2);
    assert_eq!(storage.files_intersecting(16_384, 3_616), 1..2);
  }

  #[test]
  fn test_get_slice_clamps_to_file() {
    let file = FileInfo {
      path: "a.bin".into(),
      len: 10_000,
      torrent_offset: 0,
    };
    assert_eq!(
      file.get_slice(0, 16_384),
      FileSlice {
        offset: 0,
        len: 10_000
      }
    );
    assert_eq!(
      file.get_slice(9_000, 100),
      FileSlice {
        offset: 9_000,
        len: 100
      }
    );
  }

  #[tokio::test]
  async fn test_read_block_across_boundary() {
    let (dir, metainfo, logical) = straddling_archive();
    let storage =
      StorageInfo::new(&metainfo, dir.path().join("tree"));

    let piece = storage.read_block(0, 0, 16_384).await.unwrap();
    assert_eq!(piece, &logical[..16_384]);

    let tail = storage.read_block(1, 0, 3_616).await.unwrap();
    assert_eq!(tail, &logical[16_384..]);
  }

  #[tokio::test]
  async fn test_write_block_across_boundary() {
    let (dir, metainfo, logical) = straddling_archive();
    let out_root = dir.path().join("out");
    let storage = StorageInfo::new(&metainfo, out_root.clone());
    storage.allocate().unwrap();

    storage.write_block(0, 0, &logical[..16_384]).await.unwrap();
    storage.write_block(1, 0, &logical[16_384..]).await.unwrap();

    assert_eq!(
      std::fs::read(out_root.join("a.bin")).unwrap(),
      &logical[..10_000]
    );
    assert_eq!(
      std::fs::read(out_root.join("b.bin")).unwrap(),
      &logical[10_000..]
    );
  }

  #[tokio::test]
  async fn test_out_of_range_block_is_rejected() {
    let (dir, metainfo, _) = straddling_archive();
    let storage =
      StorageInfo::new(&metainfo, dir.path().join("tree"));

    assert!(matches!(
      storage.read_block(2, 0, 1).await,
      Err(TorrentError::InvalidPieceIndex(2))
    ));
    assert!(matches!(
      storage.read_block(1, 0, 16_384).await,
      Err(TorrentError::InvalidPieceIndex(1))
    ));
  }
}
