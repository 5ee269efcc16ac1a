use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use super::announce::Announce;
use super::response::{AnnounceResponse, CatalogEntry};
use crate::error::tracker::{Result, TrackerError};

/// Announce requests that take longer than this count as a tracker error.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP tracker for a torrent, from which we can request peers as well
/// as announce our own presence.
pub struct Tracker {
  /// The HTTP client (from reqwest::Client)
  client: Client,
  url: Url,
}

impl Tracker {
  pub fn new(url: Url) -> Self {
    Tracker {
      client: Client::new(),
      url,
    }
  }

  /// The tracker's base URL.
  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Sends an announce request to the tracker with the specified parameters.
  ///
  /// This may be used by a torrent to request peers to download from, and to
  /// report presence (or departure) in the torrent's swarm.
  pub async fn announce(&self, params: Announce) -> Result<AnnounceResponse> {
    let mut query = vec![
      ("info_hash", hex::encode(params.info_hash)),
      ("port", params.port.to_string()),
    ];
    if let Some(ip) = &params.ip {
      query.push(("ip", ip.to_string()));
    }
    if let Some(event) = &params.event {
      query.push(("event", event.as_str().to_string()));
    }

    let resp = self
      .client
      .get(self.endpoint("announce"))
      .query(&query)
      .timeout(HTTP_TIMEOUT)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(resp)
  }

  /// Uploads a torrent file to the tracker and registers this peer as its
  /// first seeder.
  ///
  /// The tracker stores the file, catalogs it under its info hash and
  /// redirects to the announce endpoint with `event=started`, so a
  /// successful upload also returns the fresh swarm.
  pub async fn upload(
    &self,
    metainfo_path: &Path,
    params: Announce,
    name: &str,
    description: &str,
  ) -> Result<AnnounceResponse> {
    let file_name = metainfo_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let bytes = tokio::fs::read(metainfo_path).await?;

    let form = reqwest::multipart::Form::new()
      .part(
        "file",
        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
      )
      .text("name", name.to_string())
      .text("description", description.to_string());

    let mut query = vec![
      ("info_hash", hex::encode(params.info_hash)),
      ("port", params.port.to_string()),
    ];
    if let Some(ip) = &params.ip {
      query.push(("ip", ip.to_string()));
    }

    let resp = self
      .client
      .post(self.endpoint("announce"))
      .query(&query)
      .multipart(form)
      .timeout(HTTP_TIMEOUT)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(resp)
  }

  /// Fetches the tracker's catalog of known torrents, keyed by hex info
  /// hash.
  pub async fn catalog(&self) -> Result<HashMap<String, CatalogEntry>> {
    let resp = self
      .client
      .get(self.endpoint("torrents"))
      .timeout(HTTP_TIMEOUT)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(resp)
  }

  /// Downloads the stored metainfo file for `hex_info_hash`.
  pub async fn fetch_torrent(&self, hex_info_hash: &str) -> Result<Vec<u8>> {
    let resp = self
      .client
      .get(self.endpoint(&format!("torrents/{hex_info_hash}")))
      .timeout(HTTP_TIMEOUT)
      .send()
      .await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Err(TrackerError::NotFound(hex_info_hash.to_string()));
    }
    let bytes = resp.error_for_status()?.bytes().await?;
    Ok(bytes.to_vec())
  }

  /// Joins `path` onto the tracker base URL.
  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.url.as_str().trim_end_matches('/'), path)
  }
}

#[cfg(test)]
mod tests {
  use std::net::{IpAddr, Ipv4Addr};

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::tracker::announce::Event;
  use crate::tracker::response::PeerEntry;

  const INFO_HASH: [u8; 20] = [0xab; 20];

  #[tokio::test]
  async fn test_announce_decodes_peers() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    let mock = server
      .mock("GET", "/announce")
      .match_query(mockito::Matcher::AllOf(vec![
        mockito::Matcher::UrlEncoded(
          "info_hash".into(),
          hex::encode(INFO_HASH),
        ),
        mockito::Matcher::UrlEncoded("port".into(), "6881".into()),
        mockito::Matcher::UrlEncoded("event".into(), "started".into()),
      ]))
      .with_status(200)
      .with_body(
        r#"{"interval": 1800, "peers": [{"ip": "192.168.0.1", "port": 8989}]}"#,
      )
      .create_async()
      .await;

    let resp = tracker
      .announce(Announce {
        info_hash: INFO_HASH,
        port: 6881,
        ip: None,
        event: Some(Event::Started),
      })
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(
      resp,
      AnnounceResponse {
        interval: 1800,
        peers: vec![PeerEntry {
          ip: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
          port: 8989,
        }],
      }
    );
  }

  #[tokio::test]
  async fn test_announce_carries_explicit_ip() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    let mock = server
      .mock("GET", "/announce")
      .match_query(mockito::Matcher::AllOf(vec![
        mockito::Matcher::UrlEncoded("ip".into(), "10.0.0.7".into()),
      ]))
      .with_status(200)
      .with_body(r#"{"interval": 1800, "peers": []}"#)
      .create_async()
      .await;

    tracker
      .announce(Announce {
        info_hash: INFO_HASH,
        port: 6881,
        ip: Some("10.0.0.7".parse().unwrap()),
        event: None,
      })
      .await
      .unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_announce_error_status_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    server
      .mock("GET", "/announce")
      .match_query(mockito::Matcher::Any)
      .with_status(500)
      .create_async()
      .await;

    let result = tracker
      .announce(Announce {
        info_hash: INFO_HASH,
        port: 6881,
        ip: None,
        event: None,
      })
      .await;
    assert!(matches!(result, Err(TrackerError::Http(_))));
  }

  #[tokio::test]
  async fn test_catalog_redacts_nothing_client_side() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    server
      .mock("GET", "/torrents")
      .with_status(200)
      .with_body(
        r#"{"abab": {"name": "demo.torrent", "description": "a demo"}}"#,
      )
      .create_async()
      .await;

    let catalog = tracker.catalog().await.unwrap();
    assert_eq!(
      catalog.get("abab"),
      Some(&CatalogEntry {
        name: "demo.torrent".into(),
        description: "a demo".into(),
      })
    );
  }

  #[tokio::test]
  async fn test_fetch_unknown_torrent_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let tracker = Tracker::new(server.url().parse().unwrap());

    server
      .mock("GET", "/torrents/dead")
      .with_status(404)
      .create_async()
      .await;

    let result = tracker.fetch_torrent("dead").await;
    assert!(matches!(result, Err(TrackerError::NotFound(_))));
  }
}
