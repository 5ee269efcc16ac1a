use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use url::Url;

use freshet::conf::Conf;
use freshet::engine::{PeerEngine, SeedParams, Status};
use freshet::error::{Error, TrackerError};
use freshet::tracker::CatalogEntry;

/// The peer daemon: runs the seeding/leeching engine and exposes its
/// operations over a small HTTP control surface.
#[derive(Parser)]
#[command(name = "freshetd", version)]
struct Args {
  /// The host the control surface binds to.
  #[arg(short = 'H', long, default_value = "127.0.0.1")]
  host: IpAddr,

  /// The control surface port.
  #[arg(short, long, default_value_t = 7878)]
  port: u16,

  /// The port the wire protocol listener binds to; 0 lets the OS pick.
  #[arg(long, default_value_t = 0)]
  peer_port: u16,

  /// The tracker this peer announces to and fetches catalogs from.
  #[arg(long, default_value = "http://127.0.0.1:8000")]
  tracker_url: Url,

  /// Where fetched .torrent files are kept.
  #[arg(long, default_value = "torrents")]
  torrent_dir: PathBuf,

  /// Where downloads are placed.
  #[arg(long, default_value = "downloads")]
  download_dir: PathBuf,
}

/// The `{error, details?}` JSON shape shared with the tracker service.
struct DaemonError {
  status: StatusCode,
  error: &'static str,
  details: String,
}

impl DaemonError {
  fn bad_request(error: &'static str, details: impl Into<String>) -> Self {
    Self {
      status: StatusCode::BAD_REQUEST,
      error,
      details: details.into(),
    }
  }
}

impl From<Error> for DaemonError {
  fn from(value: Error) -> Self {
    let status = match &value {
      Error::Metainfo(_) => StatusCode::BAD_REQUEST,
      Error::Tracker(TrackerError::NotFound(_)) => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Self {
      status,
      error: "Operation failed",
      details: value.to_string(),
    }
  }
}

impl IntoResponse for DaemonError {
  fn into_response(self) -> Response {
    let body = serde_json::json!({
      "error": self.error,
      "details": self.details,
    });
    (self.status, Json(body)).into_response()
  }
}

#[derive(Deserialize)]
struct SeedRequest {
  input_path: PathBuf,
  #[serde(default)]
  trackers: Vec<Vec<String>>,
  #[serde(default = "default_public")]
  public: bool,
  piece_length: Option<u32>,
  output_path: Option<PathBuf>,
  #[serde(default)]
  name: String,
  #[serde(default)]
  description: String,
}

fn default_public() -> bool {
  true
}

#[derive(Serialize)]
struct SeedResponse {
  message: &'static str,
  info_hash: String,
  metainfo_path: PathBuf,
}

#[derive(Deserialize)]
struct LeechRequest {
  torrent_path: PathBuf,
}

async fn daemon_status() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "OK" }))
}

async fn seed(
  State(engine): State<PeerEngine>,
  Json(req): Json<SeedRequest>,
) -> Result<Json<SeedResponse>, DaemonError> {
  if !req.input_path.exists() {
    return Err(DaemonError::bad_request(
      "File not found error.",
      format!("{:?} doesn't exist", req.input_path),
    ));
  }

  let (info_hash, metainfo_path) = engine
    .seed(SeedParams {
      input_path: req.input_path,
      trackers: req.trackers,
      public: req.public,
      piece_length: req.piece_length,
      output_path: req.output_path,
      name: req.name,
      description: req.description,
    })
    .await?;

  Ok(Json(SeedResponse {
    message: "Seeding started",
    info_hash: hex::encode(info_hash),
    metainfo_path,
  }))
}

async fn leech(
  State(engine): State<PeerEngine>,
  Json(req): Json<LeechRequest>,
) -> Result<Json<serde_json::Value>, DaemonError> {
  if !req.torrent_path.exists() {
    return Err(DaemonError::bad_request(
      "File not found error.",
      "Torrent file not exists.",
    ));
  }

  engine.leech(req.torrent_path);
  Ok(Json(serde_json::json!({
    "message": "Added file to be downloaded successfully"
  })))
}

async fn status(State(engine): State<PeerEngine>) -> Json<Status> {
  Json(engine.status())
}

async fn torrents(
  State(engine): State<PeerEngine>,
) -> Result<Json<HashMap<String, CatalogEntry>>, DaemonError> {
  Ok(Json(engine.remote_catalog().await?))
}

async fn torrent_by_info_hash(
  State(engine): State<PeerEngine>,
  Path(info_hash): Path<String>,
) -> Result<Json<serde_json::Value>, DaemonError> {
  let path = engine.fetch_torrent(&info_hash).await?;
  Ok(Json(serde_json::json!({ "data": path })))
}

async fn run(args: Args) -> Result<()> {
  let conf = Conf {
    listen_port: args.peer_port,
    ..Conf::new(args.tracker_url, args.torrent_dir, args.download_dir)
  };
  let engine = PeerEngine::spawn(conf).await?;
  log::info!("Peer wire protocol on port {}", engine.listen_port());

  let app = Router::new()
    .route("/", get(daemon_status))
    .route("/seed", post(seed))
    .route("/leech", post(leech))
    .route("/status", get(status))
    .route("/torrents", get(torrents))
    .route("/torrents/:info_hash", get(torrent_by_info_hash))
    .with_state(engine);

  let addr = SocketAddr::new(args.host, args.port);
  log::info!("Daemon control surface on {}", addr);
  axum::Server::bind(&addr)
    .serve(app.into_make_service())
    .await?;
  Ok(())
}

#[tokio::main]
async fn main() {
  pretty_env_logger::init_timed();

  let args = Args::parse();
  if let Err(error) = run(args).await {
    eprintln!("Error: {error}");
    std::process::exit(1);
  }
}
