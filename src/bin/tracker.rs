use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use freshet::conf::TrackerConf;
use freshet::tracker::server;

/// The central tracker: catalogs uploaded torrents and tracks swarm
/// membership for announcing peers.
#[derive(Parser)]
#[command(name = "freshet-tracker", version)]
struct Args {
  /// The host to bind the tracker to. Use 0.0.0.0 to accept announces from
  /// outside this machine.
  #[arg(short = 'H', long, default_value = "127.0.0.1")]
  host: IpAddr,

  /// The binding port.
  #[arg(short, long, default_value_t = 8000)]
  port: u16,

  /// Where the torrent store and the catalog/swarm snapshots live.
  #[arg(long, default_value = "tracker-data")]
  data_dir: PathBuf,
}

async fn run(args: Args) -> Result<()> {
  let conf = TrackerConf::new(args.data_dir);
  let addr = SocketAddr::new(args.host, args.port);
  server::run(conf, addr).await?;
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
