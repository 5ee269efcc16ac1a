use std::io::{self, Cursor};

use bytes::{Buf, BufMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::blockinfo::BlockInfo;
use crate::{Bitfield, PieceIndex};

/// The ID byte of a framed peer message, as assigned by the wire protocol.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageId {
  Choke = 0,
  Unchoke = 1,
  Interested = 2,
  NotInterested = 3,
  Have = 4,
  Bitfield = 5,
  Request = 6,
  Piece = 7,
  Cancel = 8,
}

impl TryFrom<u8> for MessageId {
  type Error = io::Error;

  fn try_from(value: u8) -> io::Result<Self> {
    use MessageId::*;
    match value {
      0 => Ok(Choke),
      1 => Ok(Unchoke),
      2 => Ok(Interested),
      3 => Ok(NotInterested),
      4 => Ok(Have),
      5 => Ok(Bitfield),
      6 => Ok(Request),
      7 => Ok(Piece),
      8 => Ok(Cancel),
      _ => Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unknown message id {value}"),
      )),
    }
  }
}

/// The actual message exchanged by peers.
///
/// All nine protocol messages are encodable and decodable so a peer stays
/// wire compatible with full clients; the baseline transfer only ever sends
/// `Request` and answers with `Piece`, with every seeder implicitly unchoked.
#[derive(Debug, PartialEq)]
#[cfg_attr(test, derive(Clone))]
pub enum Message {
  KeepAlive,
  Choke,
  Unchoke,
  Interested,
  NotInterested,
  Have {
    piece_index: PieceIndex,
  },
  Bitfield(Bitfield),
  Request(BlockInfo),
  Piece {
    piece_index: PieceIndex,
    offset: u32,
    data: Vec<u8>,
  },
  Cancel(BlockInfo),
}

impl Message {
  /// Returns the ID of the message, or `None` for a keep-alive, which has
  /// no ID on the wire.
  pub fn id(&self) -> Option<MessageId> {
    match self {
      Message::KeepAlive => None,
      Message::Choke => Some(MessageId::Choke),
      Message::Unchoke => Some(MessageId::Unchoke),
      Message::Interested => Some(MessageId::Interested),
      Message::NotInterested => Some(MessageId::NotInterested),
      Message::Have { .. } => Some(MessageId::Have),
      Message::Bitfield(_) => Some(MessageId::Bitfield),
      Message::Request(_) => Some(MessageId::Request),
      Message::Piece { .. } => Some(MessageId::Piece),
      Message::Cancel(_) => Some(MessageId::Cancel),
    }
  }
}

/// Codec for the framed messages that follow the handshake.
///
/// frame data format:
///
/// ```txt
/// <length prefix><message ID><payload>
///
/// |-- 4 bytes --|-- 1 byte -|-length - 1 bytes-|
/// ```
///
/// A length of 0 is a keep-alive: no ID, no payload. All integers are
/// big-endian.
pub struct PeerCodec;

/// Frames longer than this are treated as malformed rather than buffered.
/// The largest legitimate frame is a piece message one whole piece long,
/// so 1 MiB leaves ample headroom for large bitfields too.
const MAX_FRAME_LEN: usize = 0x10_0000;

impl Encoder<Message> for PeerCodec {
  type Error = io::Error;

  fn encode(
    &mut self,
    msg: Message,
    buf: &mut bytes::BytesMut,
  ) -> io::Result<()> {
    use Message::*;
    match msg {
      KeepAlive => {
        // a zero length prefix and nothing else
        buf.put_u32(0);
      }
      Choke | Unchoke | Interested | NotInterested => {
        // 1 byte message id
        buf.put_u32(1);
        buf.put_u8(msg.id().expect("flag message has an id") as u8);
      }
      Have { piece_index } => {
        let piece_index = piece_index
          .try_into()
          .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "piece index overflow"))?;
        // 1 byte message id and 4 byte piece index
        buf.put_u32(1 + 4);
        buf.put_u8(MessageId::Have as u8);
        buf.put_u32(piece_index);
      }
      Bitfield(bitfield) => {
        // 1 byte message id and n byte bitfield
        //
        // NOTE: `bitfield.len()` returns the number of _bits_
        let field = bitfield.as_raw_slice();
        buf.put_u32(1 + field.len() as u32);
        buf.put_u8(MessageId::Bitfield as u8);
        buf.extend_from_slice(field);
      }
      Request(block) => encode_block_info(buf, MessageId::Request, block)?,
      Cancel(block) => encode_block_info(buf, MessageId::Cancel, block)?,
      Piece {
        piece_index,
        offset,
        data,
      } => {
        let piece_index = piece_index
          .try_into()
          .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "piece index overflow"))?;
        // 1 byte message id, 4 byte piece index, 4 byte offset, and n byte
        // block
        buf.put_u32(1 + 4 + 4 + data.len() as u32);
        buf.put_u8(MessageId::Piece as u8);
        buf.put_u32(piece_index);
        buf.put_u32(offset);
        buf.extend_from_slice(&data);
      }
    }
    Ok(())
  }
}

impl Decoder for PeerCodec {
  type Item = Message;
  type Error = io::Error;

  fn decode(
    &mut self,
    buf: &mut bytes::BytesMut,
  ) -> io::Result<Option<Message>> {
    if buf.remaining() < 4 {
      return Ok(None);
    }

    // peek at the length prefix without advancing the buffer, as the rest
    // of the frame may not have arrived yet
    let mut tmp_buf = Cursor::new(&buf);
    let msg_len = tmp_buf.get_u32() as usize;
    if msg_len > MAX_FRAME_LEN {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame length {msg_len} exceeds maximum"),
      ));
    }
    if buf.remaining() < 4 + msg_len {
      return Ok(None);
    }
    buf.advance(4);

    // a length of 0 is a keep-alive with no id and no payload
    if msg_len == 0 {
      return Ok(Some(Message::KeepAlive));
    }

    let id = MessageId::try_from(buf.get_u8())?;
    let payload_len = msg_len - 1;

    let msg = match id {
      MessageId::Choke
      | MessageId::Unchoke
      | MessageId::Interested
      | MessageId::NotInterested => {
        // flag messages carry nothing; stray payload bytes would
        // desynchronize the frame stream
        if payload_len != 0 {
          return Err(invalid_payload(id, payload_len));
        }
        match id {
          MessageId::Choke => Message::Choke,
          MessageId::Unchoke => Message::Unchoke,
          MessageId::Interested => Message::Interested,
          _ => Message::NotInterested,
        }
      }
      MessageId::Have => {
        if payload_len != 4 {
          return Err(invalid_payload(id, payload_len));
        }
        Message::Have {
          piece_index: buf.get_u32() as PieceIndex,
        }
      }
      MessageId::Bitfield => {
        let mut field = vec![0u8; payload_len];
        buf.copy_to_slice(&mut field);
        Message::Bitfield(Bitfield::from_vec(field))
      }
      MessageId::Request | MessageId::Cancel => {
        if payload_len != 12 {
          return Err(invalid_payload(id, payload_len));
        }
        let block = BlockInfo {
          piece_index: buf.get_u32() as PieceIndex,
          offset: buf.get_u32(),
          len: buf.get_u32(),
        };
        if id == MessageId::Request {
          Message::Request(block)
        } else {
          Message::Cancel(block)
        }
      }
      MessageId::Piece => {
        if payload_len < 8 {
          return Err(invalid_payload(id, payload_len));
        }
        let piece_index = buf.get_u32() as PieceIndex;
        let offset = buf.get_u32();
        let mut data = vec![0u8; payload_len - 8];
        buf.copy_to_slice(&mut data);
        Message::Piece {
          piece_index,
          offset,
          data,
        }
      }
    };

    Ok(Some(msg))
  }
}

/// Helper used to encode 'request' and 'cancel' messages, which share the
/// same payload format.
fn encode_block_info(
  buf: &mut bytes::BytesMut,
  id: MessageId,
  block: BlockInfo,
) -> io::Result<()> {
  let piece_index = block.piece_index.try_into().map_err(|_| {
    io::Error::new(io::ErrorKind::InvalidInput, "piece index overflow")
  })?;
  // 1 byte message id, 4 byte piece index, 4 byte offset, 4 byte length
  buf.put_u32(1 + 4 + 4 + 4);
  buf.put_u8(id as u8);
  buf.put_u32(piece_index);
  buf.put_u32(block.offset);
  buf.put_u32(block.len);
  Ok(())
}

fn invalid_payload(id: MessageId, len: usize) -> io::Error {
  io::Error::new(
    io::ErrorKind::InvalidData,
    format!("invalid payload length {len} for message {id:?}"),
  )
}
