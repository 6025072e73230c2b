//! Remote containers behave exactly like the same bytes on local disk

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{ContainerBuilder, Fixture, key_entry, pattern};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use xvdkit_crypto::{KeyEntry, hardware_aes_available};
use xvdkit_stream::{
    NoProgress, RemoteConfig, StreamConfig, WalkOptions, XvdContainer, XvdError,
    ensure_crypto_provider,
};

/// Serves `bytes=START-END` ranges of a fixed body
struct RangeResponder {
    data: Arc<Vec<u8>>,
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.data.len();
        let Some((start, end)) = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range)
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.data.to_vec());
        };

        if start >= total {
            return ResponseTemplate::new(416);
        }
        let end = end.min(total - 1);
        ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {start}-{end}/{total}").as_str())
            .set_body_bytes(self.data[start..=end].to_vec())
    }
}

fn config() -> StreamConfig {
    StreamConfig::default().with_remote(
        RemoteConfig::default()
            .with_max_retries(1)
            .with_retry_backoff(Duration::from_millis(10)),
    )
}

async fn serve(fixture: &Fixture) -> MockServer {
    ensure_crypto_provider();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/content/game.xvc"))
        .respond_with(RangeResponder {
            data: Arc::new(fixture.bytes.clone()),
        })
        .mount(&server)
        .await;
    server
}

type Snapshot = BTreeMap<String, Vec<u8>>;

fn snapshot(dir: &Path) -> Snapshot {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let name = path
                    .strip_prefix(dir)
                    .expect("relative")
                    .to_string_lossy()
                    .replace('\\', "/");
                files.insert(name, std::fs::read(&path).expect("read file"));
            }
        }
    }
    files
}

async fn extract_both(fixture: &Fixture, key: Option<&KeyEntry>) -> (Snapshot, Snapshot) {
    let server = serve(fixture).await;
    let url = format!("{}/content/game.xvc", server.uri());
    let remote = XvdContainer::open_url(&url, config()).await.expect("open remote");
    assert_eq!(remote.provider().kind(), "remote");
    assert_eq!(remote.provider().len(), fixture.bytes.len() as u64);

    let file = fixture.write_temp();
    let local = XvdContainer::open_local(file.path(), false, config())
        .await
        .expect("open local");
    assert_eq!(remote.header(), local.header());
    assert_eq!(remote.summary().regions, local.summary().regions);

    let remote_out = TempDir::new().expect("temp dir");
    let local_out = TempDir::new().expect("temp dir");
    let remote_summary = remote
        .extract_files(remote_out.path(), key, &WalkOptions::default(), &NoProgress)
        .await
        .expect("remote extract");
    let local_summary = local
        .extract_files(local_out.path(), key, &WalkOptions::default(), &NoProgress)
        .await
        .expect("local extract");
    assert_eq!(remote_summary, local_summary);

    (snapshot(remote_out.path()), snapshot(local_out.path()))
}

#[tokio::test]
async fn test_remote_extraction_matches_local() {
    let fixture = ContainerBuilder::new()
        .encrypted(false)
        .files(vec![
            ("a.bin", pattern(0x2345, 1)),
            ("empty.bin", Vec::new()),
            ("sub/b.bin", pattern(0x800, 2)),
        ])
        .build();

    let (remote, local) = extract_both(&fixture, None).await;
    assert_eq!(remote.len(), 3);
    assert_eq!(remote, local);
    assert_eq!(remote["a.bin"], pattern(0x2345, 1));
}

#[tokio::test]
async fn test_remote_encrypted_extraction_matches_local() {
    if !hardware_aes_available() {
        return;
    }
    let fixture = ContainerBuilder::new().build();
    let key = key_entry();

    let (remote, local) = extract_both(&fixture, Some(&key)).await;
    assert_eq!(remote, local);
    assert_eq!(remote["Content/data.bin"], fixture.files[0].1);
}

#[tokio::test]
async fn test_remote_verify_and_decrypt() {
    let mut fixture = ContainerBuilder::new().encrypted(false).build();
    let block = fixture
        .layout
        .block_for_offset(fixture.file_region_offset)
        .expect("block");
    fixture.tamper_block(block, 17);

    let server = serve(&fixture).await;
    let url = format!("{}/content/game.xvc", server.uri());
    let mut remote = XvdContainer::open_url(&url, config()).await.expect("open remote");

    let report = remote.verify_all_pages(&NoProgress).await.expect("verify");
    assert_eq!(report.mismatches, vec![block]);

    let err = remote
        .decrypt_whole(&key_entry(), false, &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, XvdError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn test_server_without_ranges_is_rejected() {
    ensure_crypto_provider();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain.xvc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 0x4000]))
        .mount(&server)
        .await;

    let url = format!("{}/plain.xvc", server.uri());
    let result = XvdContainer::open_url(&url, config()).await;
    assert!(matches!(result, Err(XvdError::RangeNotSupported)));
}

#[tokio::test]
async fn test_missing_remote_file() {
    ensure_crypto_provider();
    let server = MockServer::start().await;
    let url = format!("{}/missing.xvc", server.uri());

    let result = XvdContainer::open_url(&url, config()).await;
    assert!(matches!(result, Err(XvdError::HttpStatus(status)) if status.as_u16() == 404));
}
