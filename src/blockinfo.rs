use std::fmt;

use crate::PieceIndex;

/// A block is the unit of a request on the wire: a `(piece, offset, length)`
/// window into the torrent's logical byte stream.
///
/// Because seeded torrents clamp their piece length to [`crate::MAX_PIECE_LEN`],
/// a block always covers a whole piece here and `offset` is zero; the field is
/// kept so the wire format stays compatible with sub-piece requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
  /// The index of the piece of which this is a block.
  pub piece_index: PieceIndex,
  /// The zero-based byte offset into the piece.
  pub offset: u32,
  /// The block's length in bytes.
  pub len: u32,
}

impl fmt::Display for BlockInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "(piece: {} offset: {} len: {})",
      self.piece_index, self.offset, self.len
    )
  }
}
