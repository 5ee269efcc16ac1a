//! The engine is the top-level coordinator of a peer process: it runs the
//! wire protocol listener that serves every seeded torrent, drives the
//! concurrent downloads of every leeched torrent, and exposes the small
//! operation set the daemon maps to HTTP.
//!
//! Every TCP connection, inbound or outbound, is handled by an independent
//! spawned task. Connection tasks never propagate errors upwards; they log
//! and self-terminate, and the shared piece manager hands their unfinished
//! work to the remaining connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use indicatif::ProgressBar;
use serde_derive::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::conf::Conf;
use crate::error::{EngineResult, Error, PeerError, PeerResult};
use crate::fsutil;
use crate::metainfo::Metainfo;
use crate::peer::codec::handshake::{Handshake, HandshakeCodec};
use crate::peer::codec::message::{Message, PeerCodec};
use crate::peer::PeerSession;
use crate::piece_manager::PieceManager;
use crate::storage_info::StorageInfo;
use crate::tracker::{Announce, CatalogEntry, Event, Tracker};
use crate::{Sha1Hash, MAX_PIECE_LEN};

/// Parameters for seeding a file or directory.
pub struct SeedParams {
  /// The file or directory to serve.
  pub input_path: PathBuf,
  /// Tracker URL groups for the descriptor's announce-list. Empty means the
  /// engine's configured tracker.
  pub trackers: Vec<Vec<String>>,
  /// Whether to upload the torrent file to the tracker's catalog. A
  /// non-public seed only registers in the swarm, so the descriptor must
  /// reach other peers out of band.
  pub public: bool,
  /// Requested piece length; clamped to [`MAX_PIECE_LEN`].
  pub piece_length: Option<u32>,
  /// Where to put the created descriptor; next to the input by default.
  pub output_path: Option<PathBuf>,
  /// Display name for the tracker catalog.
  pub name: String,
  /// Display description for the tracker catalog.
  pub description: String,
}

/// A torrent this engine is currently serving.
#[derive(Clone)]
struct SeedEntry {
  metainfo_path: PathBuf,
  storage: StorageInfo,
  name: String,
}

/// A summary of everything the engine is doing, in the shape the daemon
/// serializes.
#[derive(Debug, Serialize)]
pub struct Status {
  pub seeding: Vec<SeedingStatus>,
  pub leeching: Vec<LeechingStatus>,
}

#[derive(Debug, Serialize)]
pub struct SeedingStatus {
  pub info_hash: String,
  pub name: String,
  pub metainfo_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct LeechingStatus {
  pub info_hash: String,
  pub name: String,
  pub percent: f64,
}

struct Inner {
  conf: Conf,
  /// The address the wire protocol listener actually bound; with a zero
  /// configured port this carries the OS assigned one.
  listen_addr: SocketAddr,
  /// info_hash -> serving state for every seeded torrent.
  seeding: RwLock<HashMap<Sha1Hash, SeedEntry>>,
  /// info_hash -> piece manager for every in-progress download.
  leeching: RwLock<HashMap<Sha1Hash, Arc<PieceManager>>>,
}

/// A handle to a running peer engine. Cheap to clone; all clones drive the
/// same process-wide state.
#[derive(Clone)]
pub struct PeerEngine {
  inner: Arc<Inner>,
}

impl PeerEngine {
  /// Binds the wire protocol listener and spawns the accept loop.
  pub async fn spawn(conf: Conf) -> EngineResult<Self> {
    std::fs::create_dir_all(&conf.torrent_dir)?;
    std::fs::create_dir_all(&conf.download_dir)?;

    let listener =
      TcpListener::bind(("0.0.0.0", conf.listen_port)).await?;
    let listen_addr = listener.local_addr()?;
    log::info!("Peer engine listening on {}", listen_addr);

    let engine = PeerEngine {
      inner: Arc::new(Inner {
        conf,
        listen_addr,
        seeding: RwLock::new(HashMap::new()),
        leeching: RwLock::new(HashMap::new()),
      }),
    };

    let accept_engine = engine.clone();
    tokio::spawn(async move { accept_engine.accept_loop(listener).await });

    Ok(engine)
  }

  /// The port the wire protocol listener is bound to.
  pub fn listen_port(&self) -> u16 {
    self.inner.listen_addr.port()
  }

  /// Creates a torrent for `params.input_path`, registers it for serving
  /// and announces it to the tracker.
  ///
  /// Returns the torrent's info hash and the path of the created
  /// descriptor.
  pub async fn seed(
    &self,
    params: SeedParams,
  ) -> EngineResult<(Sha1Hash, PathBuf)> {
    // one request fetches one whole piece, so cap the piece size
    let piece_len = params
      .piece_length
      .unwrap_or(MAX_PIECE_LEN)
      .min(MAX_PIECE_LEN);

    let trackers = if params.trackers.is_empty() {
      vec![vec![self.inner.conf.tracker_url.to_string()]]
    } else {
      params.trackers
    };

    let metainfo_path = Metainfo::create_file(
      &params.input_path,
      &trackers,
      piece_len,
      params.output_path.as_deref(),
    )?;
    let metainfo = Metainfo::from_file(&metainfo_path)?;
    let info_hash = metainfo.info_hash;

    let storage =
      StorageInfo::new(&metainfo, params.input_path.clone());
    self.inner.seeding.write().expect("seeding lock poisoned").insert(
      info_hash,
      SeedEntry {
        metainfo_path: metainfo_path.clone(),
        storage,
        name: metainfo.name.clone(),
      },
    );
    log::info!(
      "Seeding {} as {}",
      metainfo.name,
      hex::encode(info_hash)
    );

    let tracker_url = metainfo
      .trackers
      .first()
      .cloned()
      .ok_or(Error::NoTracker)?;
    let tracker = Tracker::new(tracker_url);
    let announce = Announce {
      info_hash,
      port: self.listen_port(),
      ip: None,
      event: Some(Event::Started),
    };
    if params.public {
      tracker
        .upload(
          &metainfo_path,
          announce,
          &params.name,
          &params.description,
        )
        .await?;
    } else {
      tracker.announce(announce).await?;
    }

    Ok((info_hash, metainfo_path))
  }

  /// Downloads the torrent described by the file at `torrent_path`, running
  /// until every piece is on disk.
  pub async fn download(&self, torrent_path: &Path) -> EngineResult<()> {
    let metainfo = Metainfo::from_file(torrent_path)?;
    let info_hash = metainfo.info_hash;

    let manager = {
      let mut leeching =
        self.inner.leeching.write().expect("leeching lock poisoned");
      if leeching.contains_key(&info_hash) {
        log::info!(
          "Torrent {} is already downloading",
          hex::encode(info_hash)
        );
        None
      } else {
        let output_root = fsutil::unique_path(
          &self.inner.conf.download_dir.join(&metainfo.name),
        );
        let manager =
          Arc::new(PieceManager::new(&metainfo, output_root)?);
        leeching.insert(info_hash, manager.clone());
        Some(manager)
      }
    };

    let Some(manager) = manager else {
      return Ok(());
    };

    let result = self.download_loop(&metainfo, manager.clone()).await;
    self
      .inner
      .leeching
      .write()
      .expect("leeching lock poisoned")
      .remove(&info_hash);
    result
  }

  /// Parses the torrent file and spawns its download in the background.
  pub fn leech(&self, torrent_path: PathBuf) {
    let engine = self.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.download(&torrent_path).await {
        log::error!("Download of {:?} failed: {}", torrent_path, e);
      }
    });
  }

  /// A snapshot of every seeded and leeched torrent.
  pub fn status(&self) -> Status {
    let seeding = self
      .inner
      .seeding
      .read()
      .expect("seeding lock poisoned")
      .iter()
      .map(|(hash, entry)| SeedingStatus {
        info_hash: hex::encode(hash),
        name: entry.name.clone(),
        metainfo_path: entry.metainfo_path.clone(),
      })
      .collect();
    let leeching = self
      .inner
      .leeching
      .read()
      .expect("leeching lock poisoned")
      .iter()
      .map(|(hash, manager)| LeechingStatus {
        info_hash: hex::encode(hash),
        name: manager.name().to_string(),
        percent: manager.percent_complete(),
      })
      .collect();
    Status { seeding, leeching }
  }

  /// Fetches the configured tracker's catalog.
  pub async fn remote_catalog(
    &self,
  ) -> EngineResult<HashMap<String, CatalogEntry>> {
    let tracker = Tracker::new(self.inner.conf.tracker_url.clone());
    Ok(tracker.catalog().await?)
  }

  /// Downloads the metainfo file for `hex_info_hash` from the configured
  /// tracker into the torrent directory and returns its local path.
  pub async fn fetch_torrent(
    &self,
    hex_info_hash: &str,
  ) -> EngineResult<PathBuf> {
    let tracker = Tracker::new(self.inner.conf.tracker_url.clone());

    let catalog = tracker.catalog().await?;
    let name = catalog
      .get(hex_info_hash)
      .map(|entry| entry.name.clone())
      .unwrap_or_else(|| format!("{hex_info_hash}.torrent"));

    let bytes = tracker.fetch_torrent(hex_info_hash).await?;
    let path =
      fsutil::unique_path(&self.inner.conf.torrent_dir.join(name));
    tokio::fs::write(&path, bytes).await?;
    log::info!("Fetched torrent {} to {:?}", hex_info_hash, path);
    Ok(path)
  }

  /// Announces periodically and keeps one session task per fresh peer until
  /// the download completes.
  async fn download_loop(
    &self,
    metainfo: &Metainfo,
    manager: Arc<PieceManager>,
  ) -> EngineResult<()> {
    let tracker_url = metainfo
      .trackers
      .first()
      .cloned()
      .ok_or(Error::NoTracker)?;
    let tracker = Tracker::new(tracker_url);
    let interval = self.inner.conf.announce_interval;

    let progress =
      ProgressBar::new(manager.storage().piece_count as u64);
    log::info!(
      "Downloading {} ({} pieces)",
      metainfo.name,
      manager.storage().piece_count
    );

    let mut next_announce = Instant::now();
    while !manager.is_complete() {
      if Instant::now() >= next_announce {
        match tracker
          .announce(Announce {
            info_hash: metainfo.info_hash,
            port: self.listen_port(),
            ip: None,
            event: None,
          })
          .await
        {
          Ok(resp) => {
            for peer in resp.peers {
              self.spawn_session(peer.addr(), metainfo.info_hash, &manager);
            }
          }
          // transient; re-query on the next interval
          Err(e) => log::warn!("Announce failed: {}", e),
        }
        next_announce = Instant::now() + interval;
      }

      progress.set_position(manager.downloaded_count() as u64);

      tokio::select! {
        _ = manager.wait_complete() => {}
        _ = tokio::time::sleep_until(next_announce) => {}
      }
    }

    progress.set_position(manager.downloaded_count() as u64);
    progress.finish();
    log::info!("Download of {} complete", metainfo.name);
    Ok(())
  }

  /// Spawns a session task for `addr` unless one is already running.
  fn spawn_session(
    &self,
    addr: SocketAddr,
    info_hash: Sha1Hash,
    manager: &Arc<PieceManager>,
  ) {
    if !manager.register_peer(addr) {
      return;
    }

    let session = PeerSession::new(
      addr,
      info_hash,
      manager.clone(),
      self.inner.conf.connect_timeout,
    );
    let manager = manager.clone();
    tokio::spawn(async move {
      if let Err(e) = session.run().await {
        log::warn!("Session with {} ended: {}", addr, e);
      }
      manager.unregister_peer(addr);
    });
  }

  /// Accepts inbound wire protocol connections for as long as the engine
  /// lives.
  async fn accept_loop(&self, listener: TcpListener) {
    loop {
      match listener.accept().await {
        Ok((stream, addr)) => {
          let engine = self.clone();
          tokio::spawn(async move {
            if let Err(e) = engine.serve_peer(stream, addr).await {
              log::warn!("Inbound peer {} closed: {}", addr, e);
            }
          });
        }
        Err(e) => {
          log::warn!("Accept failed: {}", e);
          tokio::time::sleep(Duration::from_millis(100)).await;
        }
      }
    }
  }

  /// Serves one inbound connection: validate the handshake against the
  /// seeding registry, answer with our own, then answer piece requests from
  /// disk until the peer goes away.
  async fn serve_peer(
    &self,
    stream: TcpStream,
    addr: SocketAddr,
  ) -> PeerResult<()> {
    let mut handshake_stream = Framed::new(stream, HandshakeCodec);
    let handshake = handshake_stream
      .next()
      .await
      .ok_or(PeerError::ConnectionClosed)??;

    let storage = self
      .inner
      .seeding
      .read()
      .expect("seeding lock poisoned")
      .get(&handshake.info_hash)
      .map(|entry| entry.storage.clone());
    let Some(storage) = storage else {
      log::warn!(
        "Peer {} asked for unknown torrent {}",
        addr,
        hex::encode(handshake.info_hash)
      );
      return Err(PeerError::InvalidInfoHash);
    };

    handshake_stream
      .send(Handshake::new(handshake.info_hash))
      .await?;
    log::debug!("Handshake with {} complete", addr);

    let mut stream = handshake_stream.map_codec(|_| PeerCodec);
    while let Some(msg) = stream.next().await {
      match msg? {
        Message::Request(block) => {
          log::debug!("Peer {} requested {}", addr, block);
          let data = storage
            .read_block(block.piece_index, block.offset, block.len)
            .await?;
          stream
            .send(Message::Piece {
              piece_index: block.piece_index,
              offset: block.offset,
              data,
            })
            .await?;
        }
        Message::KeepAlive => {}
        // tolerated so full clients can talk to us, but nothing to do:
        // every peer is implicitly unchoked and we serve whole pieces
        Message::Choke
        | Message::Unchoke
        | Message::Interested
        | Message::NotInterested
        | Message::Have { .. }
        | Message::Bitfield(_)
        | Message::Cancel(_) => {}
        Message::Piece { .. } => {
          // a leecher has no business pushing pieces at a seeder
          return Err(PeerError::UnexpectedMessage);
        }
      }
    }

    log::debug!("Peer {} disconnected", addr);
    Ok(())
  }
}
