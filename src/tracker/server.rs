//! The tracker service: swarm membership and the torrent catalog behind a
//! small HTTP surface.
//!
//! All state lives in memory behind a single lock and is written through to
//! `peers.json` / `torrents.json` on every mutation, so the on-disk format
//! stays inspectable and survives restarts (the catalog does; swarm
//! membership is reset on startup since its peers are gone anyway).

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_derive::{Deserialize, Serialize};

use super::response::{AnnounceResponse, CatalogEntry, PeerEntry};
use crate::conf::TrackerConf;

/// The re-announce hint handed to every announcing peer, in seconds.
const ANNOUNCE_INTERVAL_SECS: u64 = 1800;

/// A catalog row as persisted in `torrents.json`. The `file_path` never
/// leaves the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTorrent {
  file_path: PathBuf,
  name: String,
  description: String,
}

/// The in-memory mirror of the tracker's two JSON files.
#[derive(Default)]
struct Stores {
  /// info_hash -> swarm members, in registration order.
  swarms: HashMap<String, Vec<PeerEntry>>,
  /// info_hash -> stored torrent file and display metadata.
  catalog: HashMap<String, StoredTorrent>,
}

impl Stores {
  /// Applies one announce to the swarm of `info_hash` and returns the swarm
  /// afterwards, along with whether anything changed.
  ///
  /// `started` registers the observed source address, and the explicitly
  /// supplied address as a second entry when the client advertised one;
  /// `stopped` removes every matching entry; any other (or absent) event is
  /// a pure query.
  fn apply_announce(
    &mut self,
    info_hash: &str,
    source: PeerEntry,
    extra: Option<PeerEntry>,
    event: Option<&str>,
  ) -> (Vec<PeerEntry>, bool) {
    let swarm = self.swarms.entry(info_hash.to_string()).or_default();
    let mut mutated = false;

    for peer in std::iter::once(source).chain(extra) {
      match event {
        Some("started") => {
          if !swarm.contains(&peer) {
            swarm.push(peer);
            mutated = true;
          }
        }
        Some("stopped") => {
          let before = swarm.len();
          swarm.retain(|p| *p != peer);
          mutated |= swarm.len() != before;
        }
        _ => {}
      }
    }

    (swarm.clone(), mutated)
  }
}

/// Process-wide tracker state: the store mirror plus the paths it is written
/// through to. Requests serialize on the single async lock, which is held
/// across the snapshot write so no announce can observe a half-written file.
pub struct TrackerState {
  torrent_dir: PathBuf,
  peers_file: PathBuf,
  torrents_file: PathBuf,
  stores: tokio::sync::Mutex<Stores>,
}

impl TrackerState {
  /// Creates the storage directory, recovers the catalog from a previous
  /// run and resets the swarm file.
  fn load(conf: TrackerConf) -> io::Result<Self> {
    std::fs::create_dir_all(&conf.torrent_dir)?;

    let catalog = match std::fs::read(&conf.torrents_file) {
      Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        log::warn!("Could not parse {:?}: {}", conf.torrents_file, e);
        HashMap::new()
      }),
      Err(_) => HashMap::new(),
    };

    // peers of a previous run are gone, start from an empty swarm file
    std::fs::write(&conf.peers_file, b"{}")?;
    if !conf.torrents_file.exists() {
      std::fs::write(&conf.torrents_file, b"{}")?;
    }

    Ok(Self {
      torrent_dir: conf.torrent_dir,
      peers_file: conf.peers_file,
      torrents_file: conf.torrents_file,
      stores: tokio::sync::Mutex::new(Stores {
        swarms: HashMap::new(),
        catalog,
      }),
    })
  }

  async fn snapshot_swarms(&self, stores: &Stores) {
    let json = serde_json::to_vec_pretty(&stores.swarms)
      .expect("swarm map is serializable");
    if let Err(e) = tokio::fs::write(&self.peers_file, json).await {
      log::error!("Could not write {:?}: {}", self.peers_file, e);
    }
  }

  async fn snapshot_catalog(&self, stores: &Stores) {
    let json = serde_json::to_vec_pretty(&stores.catalog)
      .expect("catalog map is serializable");
    if let Err(e) = tokio::fs::write(&self.torrents_file, json).await {
      log::error!("Could not write {:?}: {}", self.torrents_file, e);
    }
  }
}

/// An error response in the `{error, details?}` shape the daemon also uses.
#[derive(Debug)]
pub enum ServiceError {
  BadRequest(String),
  NotFound(String),
  Internal(String),
}

impl From<io::Error> for ServiceError {
  fn from(value: io::Error) -> Self {
    Self::Internal(value.to_string())
  }
}

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    let (status, error, details) = match self {
      Self::BadRequest(details) => {
        (StatusCode::BAD_REQUEST, "Bad Request Error.", Some(details))
      }
      Self::NotFound(details) => {
        (StatusCode::NOT_FOUND, "Resource not found", Some(details))
      }
      Self::Internal(details) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        "An unexpected error occurred",
        Some(details),
      ),
    };
    let body = serde_json::json!({ "error": error, "details": details });
    (status, Json(body)).into_response()
  }
}

#[derive(Deserialize)]
struct AnnounceQuery {
  info_hash: String,
  port: u16,
  ip: Option<IpAddr>,
  event: Option<String>,
}

#[derive(Deserialize)]
struct UploadQuery {
  info_hash: String,
  port: u16,
  ip: Option<IpAddr>,
}

async fn status() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "Tracker is running." }))
}

/// `GET /announce`: registers, removes or just queries a peer in the swarm
/// of the given torrent, then returns the swarm.
async fn announce(
  State(state): State<Arc<TrackerState>>,
  ConnectInfo(remote): ConnectInfo<SocketAddr>,
  Query(query): Query<AnnounceQuery>,
) -> Result<Json<AnnounceResponse>, ServiceError> {
  let source = PeerEntry {
    ip: remote.ip(),
    port: query.port,
  };
  let extra = query.ip.map(|ip| PeerEntry {
    ip,
    port: query.port,
  });

  let mut stores = state.stores.lock().await;
  let (peers, mutated) = stores.apply_announce(
    &query.info_hash,
    source,
    extra,
    query.event.as_deref(),
  );
  if mutated {
    state.snapshot_swarms(&stores).await;
  }
  log::debug!(
    "Announce {} event {:?} -> {} peer(s)",
    query.info_hash,
    query.event,
    peers.len()
  );

  Ok(Json(AnnounceResponse {
    interval: ANNOUNCE_INTERVAL_SECS,
    peers,
  }))
}

/// `POST /announce`: uploads a torrent file, catalogs it and redirects into
/// the announce path above so the single swarm-insertion code path runs.
async fn upload(
  State(state): State<Arc<TrackerState>>,
  Query(query): Query<UploadQuery>,
  mut multipart: Multipart,
) -> Result<Redirect, ServiceError> {
  let mut file: Option<(String, Vec<u8>)> = None;
  let mut name = String::new();
  let mut description = String::new();

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ServiceError::BadRequest(e.to_string()))?
  {
    let field_name = field.name().unwrap_or_default().to_string();
    match field_name.as_str() {
      "file" => {
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
          .bytes()
          .await
          .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        file = Some((file_name, bytes.to_vec()));
      }
      "name" => {
        name = field.text().await.unwrap_or_default();
      }
      "description" => {
        description = field.text().await.unwrap_or_default();
      }
      _ => {}
    }
  }

  let (file_name, bytes) = file.ok_or_else(|| {
    ServiceError::BadRequest("Missing `file` form field.".to_string())
  })?;
  if !file_name.ends_with(".torrent") {
    return Err(ServiceError::BadRequest(
      "Accept file with .torrent file extension only.".to_string(),
    ));
  }

  let mut stores = state.stores.lock().await;
  let known = stores
    .catalog
    .get(&query.info_hash)
    .map(|t| t.file_path.exists())
    .unwrap_or(false);

  if !known {
    // opaque storage name so colliding display names cannot clobber
    let file_path = state
      .torrent_dir
      .join(format!("{:032x}.torrent", rand::random::<u128>()));
    tokio::fs::write(&file_path, &bytes).await?;

    let name = if name.is_empty() {
      file_name
    } else {
      format!("{name}.torrent")
    };
    log::info!("Cataloged torrent {} as {:?}", query.info_hash, name);

    stores.catalog.insert(
      query.info_hash.clone(),
      StoredTorrent {
        file_path,
        name,
        description,
      },
    );
    state.snapshot_catalog(&stores).await;
  }
  drop(stores);

  let ip = query
    .ip
    .map(|ip| format!("ip={ip}&"))
    .unwrap_or_default();
  Ok(Redirect::to(&format!(
    "/announce?info_hash={}&port={}&{}event=started",
    query.info_hash, query.port, ip
  )))
}

/// `GET /torrents`: the catalog with internal storage paths redacted.
async fn torrents(
  State(state): State<Arc<TrackerState>>,
) -> Json<HashMap<String, CatalogEntry>> {
  let stores = state.stores.lock().await;
  let catalog = stores
    .catalog
    .iter()
    .map(|(hash, stored)| {
      (
        hash.clone(),
        CatalogEntry {
          name: stored.name.clone(),
          description: stored.description.clone(),
        },
      )
    })
    .collect();
  Json(catalog)
}

/// `GET /torrents/{info_hash}`: streams back the stored metainfo file.
async fn torrent_file(
  State(state): State<Arc<TrackerState>>,
  Path(info_hash): Path<String>,
) -> Result<Response, ServiceError> {
  let stored = {
    let stores = state.stores.lock().await;
    stores.catalog.get(&info_hash).cloned()
  };

  let stored = stored
    .filter(|t| t.file_path.exists())
    .ok_or_else(|| ServiceError::NotFound(format!("{info_hash} not found")))?;

  let bytes = tokio::fs::read(&stored.file_path).await?;
  Ok(
    (
      [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
          header::CONTENT_DISPOSITION,
          format!("attachment; filename=\"{}\"", stored.name),
        ),
      ],
      bytes,
    )
      .into_response(),
  )
}

fn router(state: Arc<TrackerState>) -> Router {
  Router::new()
    .route("/", get(status))
    .route("/announce", get(announce).post(upload))
    .route("/torrents", get(torrents))
    .route("/torrents/:info_hash", get(torrent_file))
    .with_state(state)
}

/// Binds the tracker service and returns the bound address together with the
/// serving future. Splitting bind from serve lets a caller with port 0 learn
/// the real port before the service runs.
pub fn bind(
  conf: TrackerConf,
  addr: SocketAddr,
) -> io::Result<(SocketAddr, impl Future<Output = io::Result<()>>)> {
  let state = Arc::new(TrackerState::load(conf)?);
  let server = axum::Server::try_bind(&addr)
    .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, e))?
    .serve(router(state).into_make_service_with_connect_info::<SocketAddr>());
  let local_addr = server.local_addr();

  Ok((local_addr, async move {
    server
      .await
      .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
  }))
}

/// Runs the tracker service until the process is stopped.
pub async fn run(conf: TrackerConf, addr: SocketAddr) -> io::Result<()> {
  let (addr, server) = bind(conf, addr)?;
  log::info!("Tracker serving on {}", addr);
  server.await
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn peer(ip: &str, port: u16) -> PeerEntry {
    PeerEntry {
      ip: ip.parse().unwrap(),
      port,
    }
  }

  #[test]
  fn test_started_registers_peer() {
    let mut stores = Stores::default();
    let (peers, mutated) = stores.apply_announce(
      "aa",
      peer("127.0.0.1", 6881),
      None,
      Some("started"),
    );
    assert!(mutated);
    assert_eq!(peers, vec![peer("127.0.0.1", 6881)]);
  }

  #[test]
  fn test_started_is_idempotent() {
    let mut stores = Stores::default();
    stores.apply_announce("aa", peer("127.0.0.1", 6881), None, Some("started"));
    let (peers, mutated) = stores.apply_announce(
      "aa",
      peer("127.0.0.1", 6881),
      None,
      Some("started"),
    );
    assert!(!mutated);
    assert_eq!(peers, vec![peer("127.0.0.1", 6881)]);
  }

  #[test]
  fn test_explicit_ip_registers_second_entry() {
    let mut stores = Stores::default();
    let (peers, _) = stores.apply_announce(
      "aa",
      peer("8.8.8.8", 6881),
      Some(peer("192.168.1.5", 6881)),
      Some("started"),
    );
    assert_eq!(
      peers,
      vec![peer("8.8.8.8", 6881), peer("192.168.1.5", 6881)]
    );
  }

  #[test]
  fn test_stopped_removes_matching_entries() {
    let mut stores = Stores::default();
    stores.apply_announce("aa", peer("127.0.0.1", 6881), None, Some("started"));
    stores.apply_announce("aa", peer("127.0.0.1", 6882), None, Some("started"));

    let (peers, mutated) = stores.apply_announce(
      "aa",
      peer("127.0.0.1", 6881),
      None,
      Some("stopped"),
    );
    assert!(mutated);
    assert_eq!(peers, vec![peer("127.0.0.1", 6882)]);
  }

  #[test]
  fn test_absent_event_is_a_pure_query() {
    let mut stores = Stores::default();
    stores.apply_announce("aa", peer("127.0.0.1", 6881), None, Some("started"));

    let (peers, mutated) =
      stores.apply_announce("aa", peer("127.0.0.1", 9999), None, None);
    assert!(!mutated);
    assert_eq!(peers, vec![peer("127.0.0.1", 6881)]);
  }

  #[test]
  fn test_swarms_are_separate_per_info_hash() {
    let mut stores = Stores::default();
    stores.apply_announce("aa", peer("127.0.0.1", 6881), None, Some("started"));
    let (peers, _) =
      stores.apply_announce("bb", peer("127.0.0.1", 7000), None, None);
    assert!(peers.is_empty());
  }

  #[test]
  fn test_swarm_snapshot_format() {
    let mut stores = Stores::default();
    stores.apply_announce("aa", peer("127.0.0.1", 6881), None, Some("started"));

    // the on-disk shape is {hex_info_hash: [{ip, port}]}
    let json = serde_json::to_value(&stores.swarms).unwrap();
    assert_eq!(
      json,
      serde_json::json!({ "aa": [{ "ip": "127.0.0.1", "port": 6881 }] })
    );
  }

  #[test]
  fn test_catalog_snapshot_format() {
    let stored = StoredTorrent {
      file_path: "/data/0042.torrent".into(),
      name: "demo.torrent".into(),
      description: "".into(),
    };
    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "file_path": "/data/0042.torrent",
        "name": "demo.torrent",
        "description": "",
      })
    );
  }
}
