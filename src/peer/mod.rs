use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use self::codec::handshake::{Handshake, HandshakeCodec};
use self::codec::message::{Message, PeerCodec};
use crate::blockinfo::BlockInfo;
use crate::error::peer::{PeerError, Result};
use crate::piece_manager::PieceManager;
use crate::Sha1Hash;

pub mod codec;

/// One outbound leech connection to a seeder.
///
/// The session walks `CONNECTING -> HANDSHAKE_SENT -> HANDSHAKE_RECEIVED ->
/// (REQUEST_SENT -> PIECE_RECEIVED)* -> CLOSED` with at most one request
/// outstanding. Piece scheduling is borrowed from the shared
/// [`PieceManager`]; any error is fatal to the session only, and the piece
/// it was fetching is handed back for other sessions to pick up.
pub struct PeerSession {
  addr: SocketAddr,
  info_hash: Sha1Hash,
  piece_manager: Arc<PieceManager>,
  connect_timeout: Duration,
}

impl PeerSession {
  pub fn new(
    addr: SocketAddr,
    info_hash: Sha1Hash,
    piece_manager: Arc<PieceManager>,
    connect_timeout: Duration,
  ) -> Self {
    Self {
      addr,
      info_hash,
      piece_manager,
      connect_timeout,
    }
  }

  /// Connects, handshakes and fetches pieces until the download completes
  /// or no piece is left to schedule for this session.
  pub async fn run(&self) -> Result<()> {
    let stream = timeout(self.connect_timeout, TcpStream::connect(self.addr))
      .await
      .map_err(|_| PeerError::ConnectTimeout)??;
    log::debug!("Connected to peer {}", self.addr);

    let mut handshake_stream = Framed::new(stream, HandshakeCodec);
    handshake_stream.send(Handshake::new(self.info_hash)).await?;

    let peer_handshake = handshake_stream
      .next()
      .await
      .ok_or(PeerError::ConnectionClosed)??;
    if peer_handshake.info_hash != self.info_hash {
      return Err(PeerError::InvalidInfoHash);
    }
    log::debug!("Handshake with {} complete", self.addr);

    // handshake is done, switch to the framed message protocol
    let mut stream = handshake_stream.map_codec(|_| PeerCodec);

    while !self.piece_manager.is_complete() {
      let Some(block) = self.piece_manager.next_request() else {
        // every remaining piece is already assigned to another session
        break;
      };

      if let Err(e) = self.fetch_block(&mut stream, block).await {
        // hand the piece back so another connection can fetch it
        self.piece_manager.reset_pending(block.piece_index);
        return Err(e);
      }
    }

    Ok(())
  }

  /// Sends one request and consumes frames until its piece arrives and is
  /// accepted by the piece manager.
  async fn fetch_block(
    &self,
    stream: &mut Framed<TcpStream, PeerCodec>,
    block: BlockInfo,
  ) -> Result<()> {
    stream.send(Message::Request(block)).await?;

    loop {
      let msg = stream
        .next()
        .await
        .ok_or(PeerError::ConnectionClosed)??;

      match msg {
        Message::KeepAlive => continue,
        Message::Piece {
          piece_index,
          offset: _,
          data,
        } => {
          // a single request is outstanding, so the answer must be for it
          if piece_index != block.piece_index {
            return Err(PeerError::UnexpectedMessage);
          }
          self.piece_manager.receive_piece(piece_index, &data).await?;
          log::debug!(
            "Downloaded piece {} from {} ({:.1}%)",
            piece_index,
            self.addr,
            self.piece_manager.percent_complete()
          );
          return Ok(());
        }
        other => {
          log::warn!(
            "Peer {} sent unexpected message {:?} while a piece was pending",
            self.addr,
            other.id()
          );
          return Err(PeerError::UnexpectedMessage);
        }
      }
    }
  }
}
