/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// The peer ID is an arbitrary 20 byte string.
///
/// This implementation zero-fills it, both in the handshake we send and in
/// the one we accept; peers are identified by their socket address instead.
pub type PeerId = [u8; 20];

/// The bitfield represents the piece availability of a peer.
///
/// It is a compact bool vector of most significant bits to least
/// significant bits, that is, where the highest bit represents the first
/// piece, the second highest bit the second piece, and so on. A truthy value
/// means the peer has the piece.
pub type Bitfield = bitvec::prelude::BitVec<u8, bitvec::prelude::Msb0>;

/// The largest piece length a seeded torrent may use, 16 KiB.
///
/// Seeding clamps to this value so that one request maps to one whole piece
/// and no sub-piece block bookkeeping is needed. The `begin` field of the
/// request message stays on the wire so sub-piece blocks can be added later.
pub const MAX_PIECE_LEN: u32 = 0x4000;

/// The type of a piece's index.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in
/// the source code we use `usize` to be consistent with other index types in
/// Rust.
pub type PieceIndex = usize;
