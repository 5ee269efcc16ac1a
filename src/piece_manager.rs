use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use sha1::{Digest, Sha1};
use tokio::sync::Notify;

use crate::blockinfo::BlockInfo;
use crate::error::torrent::{Result, TorrentError};
use crate::metainfo::Metainfo;
use crate::storage_info::StorageInfo;
use crate::PieceIndex;

/// The download state of a single piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PieceStatus {
  /// Nobody is fetching the piece yet.
  Empty,
  /// Exactly one connection has an outstanding request for the piece.
  Pending,
  /// The piece was received, validated and written to disk.
  Downloaded,
}

/// Schedules and validates the pieces of one in-progress download.
///
/// A piece manager is owned by exactly one download and shared by every peer
/// connection fetching for it. Scheduling state lives under a sync mutex that
/// is locked only between suspension points, which makes [`Self::next_request`]
/// and the bookkeeping half of [`Self::receive_piece`] mutually atomic: two
/// concurrent calls can never hand out the same piece index. The disk write
/// itself happens outside the lock; distinct pieces land in distinct byte
/// ranges, so concurrent writers do not conflict.
pub struct PieceManager {
  /// The torrent's display name, as suggested by the metainfo.
  name: String,
  /// The resolved download target geometry.
  storage: StorageInfo,
  /// Concatenation of the 20-byte SHA-1 digests from the metainfo.
  piece_hashes: Vec<u8>,
  /// Status of every piece, indexed by piece index.
  status: Mutex<Vec<PieceStatus>>,
  /// Number of pieces in `Downloaded` state.
  downloaded: AtomicUsize,
  /// Set once every piece is downloaded.
  completed: AtomicBool,
  /// Wakes tasks blocked in [`Self::wait_complete`].
  completed_notify: Notify,
  /// The peers a connection task is currently running against.
  active_peers: Mutex<HashSet<SocketAddr>>,
}

impl PieceManager {
  /// Creates the manager for a download, preallocating the output target.
  ///
  /// For a single-file torrent `output_root` is created as a file truncated
  /// to the declared length; for an archive it is created as a directory and
  /// every nested file is preallocated to its declared length.
  pub fn new(metainfo: &Metainfo, output_root: PathBuf) -> Result<Self> {
    let storage = StorageInfo::new(metainfo, output_root);
    storage.allocate()?;

    let piece_count = storage.piece_count;
    Ok(Self {
      name: metainfo.name.clone(),
      storage,
      piece_hashes: metainfo.pieces.clone(),
      status: Mutex::new(vec![PieceStatus::Empty; piece_count]),
      downloaded: AtomicUsize::new(0),
      // an empty torrent has nothing left to fetch
      completed: AtomicBool::new(piece_count == 0),
      completed_notify: Notify::new(),
      active_peers: Mutex::new(HashSet::new()),
    })
  }

  /// The download target geometry.
  pub fn storage(&self) -> &StorageInfo {
    &self.storage
  }

  /// The torrent's display name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Picks the next piece to fetch and marks it pending.
  ///
  /// Returns a request for the lowest-indexed empty piece, or `None` when
  /// every piece is pending or downloaded. The final piece's request is
  /// shortened to the remainder of the torrent's length.
  pub fn next_request(&self) -> Option<BlockInfo> {
    let mut status = self.status.lock().expect("piece status lock poisoned");
    let index = status.iter().position(|s| *s == PieceStatus::Empty)?;
    status[index] = PieceStatus::Pending;
    Some(BlockInfo {
      piece_index: index,
      offset: 0,
      len: self.storage.piece_len(index),
    })
  }

  /// Validates a received piece payload and places it on disk.
  ///
  /// The data is hashed and compared to the metainfo's digest for `index`;
  /// on mismatch the piece is returned to the empty state and the error is
  /// fatal to the calling connection, which leaves other connections free to
  /// re-request the piece. On success the payload is written through the
  /// file layout mapping and the piece becomes downloaded.
  pub async fn receive_piece(
    &self,
    index: PieceIndex,
    data: &[u8],
  ) -> Result<()> {
    if index >= self.storage.piece_count {
      return Err(TorrentError::InvalidPieceIndex(index));
    }

    let digest = Sha1::digest(data);
    if digest.as_slice() != &self.piece_hashes[index * 20..index * 20 + 20] {
      log::warn!("Piece {} hash mismatch", index);
      self.reset_pending(index);
      return Err(TorrentError::HashMismatch { index });
    }

    // the piece is known good, place it before flipping the status so a
    // completed download implies fully written output
    self.storage.write_block(index, 0, data).await?;

    let is_complete = {
      let mut status = self.status.lock().expect("piece status lock poisoned");
      if status[index] != PieceStatus::Downloaded {
        status[index] = PieceStatus::Downloaded;
        let done = self.downloaded.fetch_add(1, Ordering::SeqCst) + 1;
        done == self.storage.piece_count
      } else {
        false
      }
    };

    if is_complete {
      self.completed.store(true, Ordering::SeqCst);
      self.completed_notify.notify_waiters();
    }
    Ok(())
  }

  /// Returns a pending piece to the empty state.
  ///
  /// Called by a connection that dies with an outstanding request, so the
  /// piece becomes schedulable for the remaining connections.
  pub fn reset_pending(&self, index: PieceIndex) {
    let mut status = self.status.lock().expect("piece status lock poisoned");
    if let Some(s) = status.get_mut(index) {
      if *s == PieceStatus::Pending {
        *s = PieceStatus::Empty;
      }
    }
  }

  /// True once every piece is downloaded.
  pub fn is_complete(&self) -> bool {
    self.completed.load(Ordering::SeqCst)
  }

  /// Suspends until the download completes.
  pub async fn wait_complete(&self) {
    loop {
      let notified = self.completed_notify.notified();
      if self.is_complete() {
        return;
      }
      notified.await;
    }
  }

  /// The number of pieces downloaded so far.
  pub fn downloaded_count(&self) -> usize {
    self.downloaded.load(Ordering::SeqCst)
  }

  /// Percentage of downloaded pieces, non-decreasing over the download.
  pub fn percent_complete(&self) -> f64 {
    if self.storage.piece_count == 0 {
      return 100.0;
    }
    self.downloaded_count() as f64 / self.storage.piece_count as f64 * 100.0
  }

  /// Registers a peer address as having an active connection task.
  ///
  /// Returns false if the peer is already active, in which case no second
  /// connection should be opened.
  pub fn register_peer(&self, addr: SocketAddr) -> bool {
    self
      .active_peers
      .lock()
      .expect("active peer lock poisoned")
      .insert(addr)
  }

  /// Removes a peer address from the active set, on any connection exit
  /// path.
  pub fn unregister_peer(&self, addr: SocketAddr) {
    self
      .active_peers
      .lock()
      .expect("active peer lock poisoned")
      .remove(&addr);
  }
}
